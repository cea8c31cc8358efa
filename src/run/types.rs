//! Domain types for remote runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tools::ToolKind;

/// Lifecycle status of a remote run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl RunStatus {
    /// Whether the run can no longer change status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Staying in the same non-terminal status is legal (a poll may observe no
    /// change). `requires_action` may only move back to `in_progress` or end.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use RunStatus::{Cancelled, Completed, Expired, Failed, InProgress, Queued, RequiresAction};
        match (self, next) {
            (from, to) if from.is_terminal() => from == to,
            (Queued, Queued | InProgress) => true,
            (InProgress, InProgress | RequiresAction) => true,
            (RequiresAction, RequiresAction | InProgress) => true,
            (Queued | InProgress | RequiresAction, Completed | Failed | Cancelled | Expired) => {
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A tool invocation requested by the model mid-run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments as a JSON object. Malformed argument strings arrive as `{}`.
    pub arguments: Value,
    /// Filled in once the call has been answered.
    #[serde(default)]
    pub result: Option<Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            result: None,
        }
    }

    /// Record the handler's answer for this call.
    pub fn answer(&mut self, output: Value) {
        self.result = Some(output);
    }

    pub fn is_answered(&self) -> bool {
        self.result.is_some()
    }

    /// Wire answer for the run service; `None` until answered.
    pub fn output(&self) -> Option<ToolOutput> {
        self.result.as_ref().map(|output| ToolOutput {
            tool_call_id: self.id.clone(),
            output: output.clone(),
        })
    }
}

/// Answer for one [`ToolCall`], submitted back to the run service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: Value,
}

/// Snapshot of a remote run as last observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub session_id: String,
    pub status: RunStatus,
    /// Pending tool calls; only non-empty while `requires_action`.
    #[serde(default)]
    pub pending_tool_calls: Vec<ToolCall>,
}

/// Definition of a remote agent (assistant) a run executes against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefinition {
    pub name: String,
    pub model: String,
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<ToolKind>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, model: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            instructions: instructions.into(),
            tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolKind>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Function-tool declarations in the wire format the run service expects.
    pub fn tool_declarations(&self) -> Vec<Value> {
        self.tools.iter().map(|kind| kind.declaration()).collect()
    }
}

/// Why a run did not produce output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunFailure {
    /// The poll budget ran out before the run reached a terminal status.
    #[error("run did not complete within {polls} polls")]
    Timeout { polls: u32 },

    /// The run ended in `failed`, `cancelled` or `expired`.
    #[error("run ended with status {status}")]
    RemoteFailure { status: RunStatus },

    /// The run service could not be reached or returned garbage.
    #[error("run service transport error: {0}")]
    Transport(String),
}

impl From<anyhow::Error> for RunFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::Transport(format!("{err:#}"))
    }
}
