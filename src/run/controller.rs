//! Drives a single remote run from submission to completion.
//!
//! The controller owns the run for the duration of [`RunController::run`]:
//!
//! 1. Submit the message and start the run
//! 2. Poll on a fixed interval while the run is queued or in progress
//! 3. On `requires_action`, answer every pending tool call through the
//!    [`ToolRegistry`] and submit the whole batch in one call
//! 4. On `completed`, fetch the latest assistant message
//!
//! Every loop iteration (poll or tool submission) spends one unit of the poll
//! budget, so a run that keeps asking for tools still terminates. Each call
//! to the run service is bounded by `request_timeout`, so a hung transport
//! cannot stall the loop between polls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::instrument;

use crate::tools::ToolRegistry;

use super::client::RunClient;
use super::types::{Run, RunFailure, RunStatus, ToolCall, ToolOutput};

/// Polling policy for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Maximum number of loop iterations before giving up.
    pub max_polls: u32,
    /// Upper bound on each individual call to the run service.
    pub request_timeout: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 120,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs one message to completion against a remote agent.
#[derive(Debug, Clone)]
pub struct RunController {
    client: Arc<dyn RunClient>,
    settings: RunSettings,
}

impl RunController {
    pub fn new(client: Arc<dyn RunClient>, settings: RunSettings) -> Self {
        Self { client, settings }
    }

    #[must_use]
    pub fn client(&self) -> &Arc<dyn RunClient> {
        &self.client
    }

    #[must_use]
    pub fn settings(&self) -> RunSettings {
        self.settings
    }

    /// Submit `message` to `session_id`, service tool calls, and return the
    /// final assistant text.
    #[instrument(
        skip(self, message, tools),
        fields(run_id = tracing::field::Empty, message_len = message.len())
    )]
    pub async fn run(
        &self,
        session_id: &str,
        agent_id: &str,
        message: &str,
        tools: &ToolRegistry,
    ) -> Result<String, RunFailure> {
        let mut run = self
            .bounded("submit", self.client.submit(session_id, agent_id, message))
            .await?;
        tracing::Span::current().record("run_id", run.id.as_str());
        tracing::debug!(status = %run.status, "Run submitted");

        for poll in 0..self.settings.max_polls {
            match run.status {
                RunStatus::Queued | RunStatus::InProgress => {
                    tokio::time::sleep(self.settings.poll_interval).await;
                    let next = self.bounded("poll", self.client.poll(session_id, &run.id)).await?;
                    run = self.observe(&run, next);
                }
                RunStatus::RequiresAction => {
                    let answered = self.answer_tool_calls(&run, tools).await;
                    let outputs: Vec<ToolOutput> = answered.iter().filter_map(ToolCall::output).collect();
                    tracing::info!(
                        poll,
                        tool_call_count = outputs.len(),
                        "Submitting tool outputs"
                    );
                    let next = self
                        .bounded(
                            "submit_tool_outputs",
                            self.client.submit_tool_outputs(session_id, &run.id, outputs),
                        )
                        .await?;
                    run = self.observe(&run, next);
                }
                RunStatus::Completed => {
                    let text = self
                        .bounded("latest_message", self.client.latest_message(session_id))
                        .await?;
                    tracing::info!(poll, output_len = text.len(), "Run completed");
                    return Ok(text);
                }
                status @ (RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired) => {
                    tracing::warn!(%status, poll, "Run ended without output");
                    return Err(RunFailure::RemoteFailure { status });
                }
            }
        }

        // The final observation may already be terminal.
        match run.status {
            RunStatus::Completed => {
                let text = self
                    .bounded("latest_message", self.client.latest_message(session_id))
                    .await?;
                Ok(text)
            }
            status @ (RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired) => {
                Err(RunFailure::RemoteFailure { status })
            }
            _ => {
                tracing::warn!(
                    max_polls = self.settings.max_polls,
                    status = %run.status,
                    "Run poll budget exhausted"
                );
                Err(RunFailure::Timeout {
                    polls: self.settings.max_polls,
                })
            }
        }
    }

    /// Await one run-service call, failing it once `request_timeout` elapses.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, RunFailure> {
        let limit = self.settings.request_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => Ok(result?),
            Err(_elapsed) => {
                tracing::warn!(operation, timeout = ?limit, "Run service call timed out");
                Err(RunFailure::Transport(format!("{operation} timed out after {limit:?}")))
            }
        }
    }

    /// Dispatch every pending call and return the batch with each call's
    /// `result` filled in.
    ///
    /// Handlers run concurrently; results keep the order of the batch.
    async fn answer_tool_calls(&self, run: &Run, tools: &ToolRegistry) -> Vec<ToolCall> {
        let futures = run.pending_tool_calls.iter().cloned().map(|mut call| async move {
            tracing::debug!(
                tool_call_id = %call.id,
                tool_name = %call.name,
                "Dispatching tool call"
            );
            let output = tools.dispatch(&call.name, &call.arguments).await;
            call.answer(output);
            call
        });
        join_all(futures).await
    }

    fn observe(&self, previous: &Run, next: Run) -> Run {
        if !previous.status.can_transition_to(next.status) {
            tracing::warn!(
                run_id = %next.id,
                from = %previous.status,
                to = %next.status,
                "Unexpected run status transition"
            );
        }
        next
    }
}
