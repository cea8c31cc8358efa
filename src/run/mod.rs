//! Remote run execution.
//!
//! - [`client`]: the [`RunClient`] boundary trait
//! - [`http`]: REST implementation of [`RunClient`]
//! - [`controller`]: [`RunController`], the per-run state machine
//! - [`agents`]: [`AgentRegistry`], remote agent id cache

pub mod agents;
pub mod client;
pub mod controller;
pub mod http;
pub mod types;

pub use agents::AgentRegistry;
pub use client::RunClient;
pub use controller::{RunController, RunSettings};
pub use http::{HttpRunClient, HttpRunSettings};
pub use types::{AgentDefinition, Run, RunFailure, RunStatus, ToolCall, ToolOutput};
