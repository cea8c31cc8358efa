//! Local tool handlers served to remote runs.
//!
//! The set of tools is closed: every tool a model may call is a [`ToolKind`].
//! A [`ToolRegistry`] maps kinds to [`ToolHandler`]s for one run. Dispatch is
//! fail-soft in both directions:
//!
//! - an unknown name, or a known kind with no registered handler, answers `{}`
//! - a handler error answers the handler's documented [`ToolHandler::fallback`]
//!
//! so a single flaky or missing tool never stalls or fails the run.

pub mod context;
pub mod pricing;
pub mod safety;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

pub use context::FetchContextTool;
pub use pricing::ComputePriceTool;
pub use safety::AnalyzeSafetyTool;

/// Every tool a model can request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Profile and history of the subject the message is about.
    FetchContext,
    /// Heuristic price suggestion for paid content.
    ComputePrice,
    /// Content-safety analysis of a text.
    AnalyzeSafety,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [Self::FetchContext, Self::ComputePrice, Self::AnalyzeSafety];

    /// Wire name the model uses to call this tool.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::FetchContext => "fetch_context",
            Self::ComputePrice => "compute_price",
            Self::AnalyzeSafety => "analyze_safety",
        }
    }

    /// Resolve a wire name. Unrecognized names resolve to `None`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            Self::FetchContext => "Fetch the subject's profile, history and preferences.",
            Self::ComputePrice => "Suggest a price for paid content given segment and content type.",
            Self::AnalyzeSafety => "Run a content-safety analysis on a text.",
        }
    }

    fn parameters(self) -> Value {
        match self {
            Self::FetchContext => json!({
                "type": "object",
                "properties": { "subject_id": { "type": "string" } }
            }),
            Self::ComputePrice => json!({
                "type": "object",
                "properties": {
                    "segment": { "type": "string" },
                    "content_type": { "type": "string" }
                }
            }),
            Self::AnalyzeSafety => json!({
                "type": "object",
                "properties": { "text": { "type": "string" } }
            }),
        }
    }

    /// Function-tool declaration used when registering an agent.
    #[must_use]
    pub fn declaration(self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters()
            }
        })
    }
}

/// A local implementation of one [`ToolKind`].
#[async_trait]
pub trait ToolHandler: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ToolKind;

    async fn call(&self, args: &Value) -> anyhow::Result<Value>;

    /// Answer used when [`call`](Self::call) fails.
    fn fallback(&self) -> Value {
        json!({})
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("no handler registered for tool '{0}'")]
    NotFound(String),
}

/// Tool handlers available to one run.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<ToolKind, Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(|k| k.name()).collect();
        kinds.sort_unstable();
        f.debug_struct("ToolRegistry").field("tools", &kinds).finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its kind, replacing any previous handler.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    #[must_use]
    pub fn with(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolHandler>, ToolError> {
        ToolKind::from_name(name)
            .and_then(|kind| self.handlers.get(&kind))
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = ToolKind> + '_ {
        self.handlers.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Answer a tool call. Never fails.
    pub async fn dispatch(&self, name: &str, args: &Value) -> Value {
        let handler = match self.resolve(name) {
            Ok(handler) => handler,
            Err(err) => {
                tracing::warn!(tool_name = %name, error = %err, "Unknown tool, answering {{}}");
                return json!({});
            }
        };
        match handler.call(args).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    tool_name = %name,
                    error = %err,
                    "Tool handler failed, answering fallback"
                );
                handler.fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        fn kind(&self) -> ToolKind {
            ToolKind::FetchContext
        }

        async fn call(&self, args: &Value) -> anyhow::Result<Value> {
            Ok(args.clone())
        }
    }

    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl ToolHandler for Broken {
        fn kind(&self) -> ToolKind {
            ToolKind::ComputePrice
        }

        async fn call(&self, _args: &Value) -> anyhow::Result<Value> {
            Err(anyhow!("pricing backend down"))
        }

        fn fallback(&self) -> Value {
            json!({"price": null})
        }
    }

    #[test]
    fn names_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("unknown_tool"), None);
    }

    #[test]
    fn declaration_is_a_function_tool() {
        let decl = ToolKind::ComputePrice.declaration();
        assert_eq!(decl["type"], "function");
        assert_eq!(decl["function"]["name"], "compute_price");
        assert_eq!(decl["function"]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn dispatch_invokes_registered_handler() {
        let registry = ToolRegistry::new().with(Arc::new(Echo));
        let out = registry.dispatch("fetch_context", &json!({"subject_id": "s1"})).await;
        assert_eq!(out, json!({"subject_id": "s1"}));
    }

    #[tokio::test]
    async fn unknown_and_unregistered_tools_answer_empty_object() {
        let registry = ToolRegistry::new().with(Arc::new(Echo));
        assert_eq!(registry.dispatch("unknown_tool", &json!({})).await, json!({}));
        assert_eq!(registry.dispatch("analyze_safety", &json!({})).await, json!({}));
        assert_eq!(
            registry.resolve("analyze_safety").unwrap_err(),
            ToolError::NotFound("analyze_safety".to_string())
        );
    }

    #[tokio::test]
    async fn failing_handler_answers_its_fallback() {
        let registry = ToolRegistry::new().with(Arc::new(Broken));
        let out = registry.dispatch("compute_price", &json!({})).await;
        assert_eq!(out, json!({"price": null}));
    }
}
