//! Boundary to the remote run-execution service.

use async_trait::async_trait;
use serde_json::Value;

use super::types::{AgentDefinition, Run, ToolOutput};

/// Remote service that executes model runs against sessions.
///
/// Implementations are transport adapters only; run lifecycle policy
/// (polling, tool servicing, timeouts) lives in
/// [`RunController`](super::controller::RunController).
#[async_trait]
pub trait RunClient: Send + Sync + std::fmt::Debug {
    /// Register an agent definition and return its remote identifier.
    async fn create_agent(&self, definition: &AgentDefinition) -> anyhow::Result<String>;

    /// Open a new session (thread) carrying the given metadata.
    async fn create_session(&self, metadata: Value) -> anyhow::Result<String>;

    /// Post `message` to the session and start a run of `agent_id` on it.
    async fn submit(&self, session_id: &str, agent_id: &str, message: &str) -> anyhow::Result<Run>;

    /// Fetch the current state of a run.
    async fn poll(&self, session_id: &str, run_id: &str) -> anyhow::Result<Run>;

    /// Answer the pending tool-call batch of a run in a single call.
    async fn submit_tool_outputs(
        &self,
        session_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> anyhow::Result<Run>;

    /// Text of the most recent assistant message in the session.
    async fn latest_message(&self, session_id: &str) -> anyhow::Result<String>;
}
