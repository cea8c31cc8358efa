//! External read-only collaborators consumed by tool handlers and stages.
//!
//! - [`ContextProvider`]: subject profile lookup
//! - [`SafetyClassifier`]: per-category content severity
//! - [`TriageClassifier`]: deterministic message triage

pub mod context;
pub mod safety;
pub mod triage;

use async_trait::async_trait;
use serde_json::Value;

pub use context::{HttpContextProvider, HttpContextSettings};
pub use safety::{HttpSafetyClassifier, HttpSafetySettings, SeverityReport};
pub use triage::{HttpTriageClassifier, HttpTriageSettings, TriageRequest};

/// Read-only source of subject profiles.
#[async_trait]
pub trait ContextProvider: Send + Sync + std::fmt::Debug {
    /// Profile for `subject_id` as a JSON object.
    async fn fetch_profile(&self, subject_id: &str) -> anyhow::Result<Value>;
}

/// Content-safety classifier.
#[async_trait]
pub trait SafetyClassifier: Send + Sync + std::fmt::Debug {
    async fn analyze(&self, text: &str) -> anyhow::Result<SeverityReport>;
}

/// Deterministic triage service tried before the triage agent.
#[async_trait]
pub trait TriageClassifier: Send + Sync + std::fmt::Debug {
    /// Triage object (intent, priority, SLA, route) for one message.
    async fn classify(&self, request: &TriageRequest) -> anyhow::Result<Value>;
}
