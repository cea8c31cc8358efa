//! In-memory doubles for the remote boundaries.
//!
//! [`ScriptedRunClient`] plays back per-agent run scripts and records every
//! call made against it, so tests can assert ordering directly.
//! [`RecordingSink`] records every publish attempt and can be told to fail.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;

use crate::actions::{ActionEvent, ActionSink, PublishOptions};
use crate::run::{AgentDefinition, Run, RunClient, RunStatus, ToolCall, ToolOutput};

/// One step of a scripted run, consumed by polls.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Report `in_progress` for this many polls.
    Pending(u32),
    /// Ask for a batch of tool calls; repeated until answered.
    Tools(Vec<ToolCall>),
    /// Complete with this assistant message.
    Complete(String),
    /// End in the given status without output.
    End(RunStatus),
    /// Never answer this or any later poll.
    Hang,
}

impl ScriptStep {
    pub fn complete(text: impl Into<String>) -> Self {
        Self::Complete(text.into())
    }

    pub fn tools(calls: Vec<(&str, &str, Value)>) -> Self {
        Self::Tools(
            calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCall::new(id, name, arguments))
                .collect(),
        )
    }
}

/// Everything the scripted client was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    CreateAgent { name: String },
    CreateSession { metadata: Value },
    Submit { session_id: String, agent_id: String, message: String },
    Poll { run_id: String },
    /// Status returned by the preceding submit, poll or tool submission.
    Observed { run_id: String, status: RunStatus },
    SubmitToolOutputs { run_id: String, outputs: Vec<ToolOutput> },
    LatestMessage { session_id: String },
}

#[derive(Debug)]
struct ScriptedRun {
    session_id: String,
    steps: VecDeque<ScriptStep>,
    status: RunStatus,
    pending: Vec<ToolCall>,
}

impl ScriptedRun {
    fn hangs(&self) -> bool {
        matches!(self.steps.front(), Some(ScriptStep::Hang))
    }

    fn snapshot(&self, id: &str) -> Run {
        Run {
            id: id.to_string(),
            session_id: self.session_id.clone(),
            status: self.status,
            pending_tool_calls: self.pending.clone(),
        }
    }

    /// Advance one poll. Returns the completion text when the run completes.
    fn advance(&mut self) -> Option<String> {
        if self.status.is_terminal() || !self.pending.is_empty() {
            return None;
        }
        loop {
            match self.steps.front_mut() {
                None => {
                    self.status = RunStatus::InProgress;
                    return None;
                }
                Some(ScriptStep::Pending(0)) => {
                    self.steps.pop_front();
                }
                Some(ScriptStep::Pending(remaining)) => {
                    *remaining -= 1;
                    if *remaining == 0 {
                        self.steps.pop_front();
                    }
                    self.status = RunStatus::InProgress;
                    return None;
                }
                Some(_) => break,
            }
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Tools(calls)) => {
                self.pending = calls;
                self.status = RunStatus::RequiresAction;
                None
            }
            Some(ScriptStep::Complete(text)) => {
                self.status = RunStatus::Completed;
                Some(text)
            }
            Some(ScriptStep::End(status)) => {
                self.status = status;
                None
            }
            Some(ScriptStep::Pending(_) | ScriptStep::Hang) | None => None,
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    scripts: HashMap<String, VecDeque<Vec<ScriptStep>>>,
    runs: HashMap<String, ScriptedRun>,
    messages: HashMap<String, String>,
    calls: Vec<RemoteCall>,
    next_run: u64,
    next_session: u64,
    fail_sessions: bool,
}

/// [`RunClient`] that plays back scripted runs.
///
/// Agents are created as `agent-{name}`. Each [`script`](Self::script) call
/// queues one run for that agent id; every `submit` consumes the next queued
/// script and fails when none is left.
#[derive(Debug, Default)]
pub struct ScriptedRunClient {
    state: Mutex<ScriptState>,
}

impl ScriptedRunClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one run script for `agent_id`.
    pub fn script(&self, agent_id: &str, steps: Vec<ScriptStep>) {
        self.lock()
            .scripts
            .entry(agent_id.to_string())
            .or_default()
            .push_back(steps);
    }

    /// Queue a run that completes straight away with `text`.
    pub fn reply(&self, agent_id: &str, text: impl Into<String>) {
        self.script(agent_id, vec![ScriptStep::complete(text)]);
    }

    /// Make every subsequent `create_session` fail.
    pub fn fail_sessions(&self) {
        self.lock().fail_sessions = true;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn created_agents(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::CreateAgent { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sessions(&self) -> Vec<Value> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::CreateSession { metadata } => Some(metadata.clone()),
                _ => None,
            })
            .collect()
    }

    /// Messages submitted to `agent_id`, in order.
    pub fn submitted_messages(&self, agent_id: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Submit {
                    agent_id: id,
                    message,
                    ..
                } if id == agent_id => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_submissions(&self) -> Vec<Vec<ToolOutput>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::SubmitToolOutputs { outputs, .. } => Some(outputs.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn poll_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, RemoteCall::Poll { .. }))
            .count()
    }

    /// Advance `run_id` by one poll. `None` means the run hangs.
    fn poll_step(&self, run_id: &str) -> anyhow::Result<Option<Run>> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Poll {
            run_id: run_id.to_string(),
        });
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| anyhow!("unknown run {run_id}"))?;
        if run.hangs() {
            return Ok(None);
        }
        let completed = run.advance();
        let snapshot = run.snapshot(run_id);
        if let Some(text) = completed {
            state.messages.insert(snapshot.session_id.clone(), text);
        }
        state.calls.push(RemoteCall::Observed {
            run_id: run_id.to_string(),
            status: snapshot.status,
        });
        Ok(Some(snapshot))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RunClient for ScriptedRunClient {
    async fn create_agent(&self, definition: &AgentDefinition) -> anyhow::Result<String> {
        self.lock().calls.push(RemoteCall::CreateAgent {
            name: definition.name.clone(),
        });
        Ok(format!("agent-{}", definition.name))
    }

    async fn create_session(&self, metadata: Value) -> anyhow::Result<String> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::CreateSession { metadata });
        if state.fail_sessions {
            return Err(anyhow!("session service unavailable"));
        }
        state.next_session += 1;
        Ok(format!("session-{}", state.next_session))
    }

    async fn submit(&self, session_id: &str, agent_id: &str, message: &str) -> anyhow::Result<Run> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Submit {
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            message: message.to_string(),
        });
        let steps = state
            .scripts
            .get_mut(agent_id)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted run left for {agent_id}"))?;

        state.next_run += 1;
        let run_id = format!("run-{}", state.next_run);
        let run = ScriptedRun {
            session_id: session_id.to_string(),
            steps: steps.into(),
            status: RunStatus::Queued,
            pending: Vec::new(),
        };
        let snapshot = run.snapshot(&run_id);
        state.runs.insert(run_id.clone(), run);
        state.calls.push(RemoteCall::Observed {
            run_id,
            status: RunStatus::Queued,
        });
        Ok(snapshot)
    }

    async fn poll(&self, _session_id: &str, run_id: &str) -> anyhow::Result<Run> {
        match self.poll_step(run_id)? {
            Some(run) => Ok(run),
            None => std::future::pending().await,
        }
    }

    async fn submit_tool_outputs(
        &self,
        _session_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> anyhow::Result<Run> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::SubmitToolOutputs {
            run_id: run_id.to_string(),
            outputs: outputs.clone(),
        });
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| anyhow!("unknown run {run_id}"))?;
        if run.status != RunStatus::RequiresAction {
            return Err(anyhow!("run {run_id} is {} and takes no tool outputs", run.status));
        }
        let expected: Vec<&str> = run.pending.iter().map(|c| c.id.as_str()).collect();
        let answered: Vec<&str> = outputs.iter().map(|o| o.tool_call_id.as_str()).collect();
        if expected != answered {
            return Err(anyhow!(
                "tool outputs {answered:?} do not answer pending batch {expected:?}"
            ));
        }
        run.pending.clear();
        run.status = RunStatus::InProgress;
        let snapshot = run.snapshot(run_id);
        state.calls.push(RemoteCall::Observed {
            run_id: run_id.to_string(),
            status: snapshot.status,
        });
        Ok(snapshot)
    }

    async fn latest_message(&self, session_id: &str) -> anyhow::Result<String> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::LatestMessage {
            session_id: session_id.to_string(),
        });
        Ok(state.messages.get(session_id).cloned().unwrap_or_default())
    }
}

/// One attempt seen by a [`RecordingSink`].
#[derive(Debug, Clone)]
pub struct PublishAttempt {
    pub event: ActionEvent,
    pub options: PublishOptions,
    pub succeeded: bool,
}

/// [`ActionSink`] that records every publish attempt.
#[derive(Debug, Default)]
pub struct RecordingSink {
    attempts: Mutex<Vec<PublishAttempt>>,
    failures_left: Mutex<u32>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` attempts with an error.
    #[must_use]
    pub fn failing(self, n: u32) -> Self {
        *self
            .failures_left
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = n;
        self
    }

    pub fn attempts(&self) -> Vec<PublishAttempt> {
        self.attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn publish_count(&self) -> usize {
        self.attempts().len()
    }

    /// Events that were delivered.
    pub fn published(&self) -> Vec<ActionEvent> {
        self.attempts()
            .into_iter()
            .filter(|a| a.succeeded)
            .map(|a| a.event)
            .collect()
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn publish(&self, event: &ActionEvent, options: &PublishOptions) -> anyhow::Result<bool> {
        let fail = {
            let mut left = self
                .failures_left
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *left > 0 {
                *left -= 1;
                true
            } else {
                false
            }
        };
        self.attempts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(PublishAttempt {
                event: event.clone(),
                options: options.clone(),
                succeeded: !fail,
            });
        if fail {
            return Err(anyhow!("sink unavailable"));
        }
        Ok(true)
    }
}
