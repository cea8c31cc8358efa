use serde::Serialize;
use serde_json::Value;

use crate::stage::StageResult;

/// State carried through one pipeline execution.
///
/// Created once per inbound event and handed to every stage by reference.
/// Stage results keep their first insertion position; re-running a stage
/// (as the retry loop does) replaces its result in place.
#[derive(Debug, Serialize)]
pub struct PipelineContext {
    correlation_id: String,
    session_id: String,
    subject_id: String,
    input: Value,
    results: Vec<StageResult>,
    iteration: u32,
    executions: u32,
}

impl PipelineContext {
    pub fn new(
        correlation_id: impl Into<String>,
        session_id: impl Into<String>,
        subject_id: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            session_id: session_id.into(),
            subject_id: subject_id.into(),
            input,
            results: Vec::new(),
            iteration: 0,
            executions: 0,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// The inbound event as received.
    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn insert(&mut self, result: StageResult) {
        match self.results.iter_mut().find(|r| r.stage == result.stage) {
            Some(slot) => *slot = result,
            None => self.results.push(result),
        }
    }

    pub fn get(&self, stage: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    pub fn payload(&self, stage: &str) -> Option<&Value> {
        self.get(stage).map(|r| &r.payload)
    }

    /// Results in first-insertion order.
    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    /// Current retry iteration, zero-based.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// Number of stage invocations so far, across all iterations.
    pub fn executions(&self) -> u32 {
        self.executions
    }

    pub(crate) fn record_execution(&mut self) {
        self.executions += 1;
    }
}
