//! Pipeline stages and their sequencing.
//!
//! A [`Stage`] produces raw output (model text or a JSON value). The
//! [`StageOrchestrator`] parses that output against the stage's
//! [`SchemaKind`], substitutes the schema fallback when parsing fails, and
//! records the [`StageResult`] in the [`PipelineContext`]. A failed run is a
//! [`StageError`]; unparseable output never is.

pub mod agent;
pub mod context;
pub mod execute;
pub mod schema;
pub mod triage;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::pipeline::PipelineContext;
use crate::run::RunFailure;

pub use agent::{AgentRuntime, AgentStage};
pub use context::ContextualizeStage;
pub use execute::ExecuteStage;
pub use schema::{SchemaError, SchemaKind};
pub use triage::TriageStage;

/// Where a stage payload came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadSource {
    /// The stage output parsed against its schema.
    Structured,
    /// The output did not parse; the payload was synthesized from it.
    Fallback { raw: String, reason: String },
}

/// Typed outcome of one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    pub stage: String,
    pub payload: Value,
    pub source: PayloadSource,
}

impl StageResult {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, PayloadSource::Fallback { .. })
    }

    pub fn typed<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Raw output of a stage before schema handling.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// Model text, possibly fenced or freeform.
    Text(String),
    /// Output of a deterministic sub-step.
    Json(Value),
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage '{stage}' failed: {source}")]
    Run {
        stage: String,
        #[source]
        source: RunFailure,
    },

    #[error("stage '{stage}' requires the result of stage '{missing}'")]
    MissingInput { stage: String, missing: String },
}

impl StageError {
    pub fn stage(&self) -> &str {
        match self {
            Self::Run { stage, .. } | Self::MissingInput { stage, .. } => stage,
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn schema(&self) -> SchemaKind;

    async fn invoke(&self, ctx: &PipelineContext) -> Result<StageOutput, StageError>;
}

/// Fixed, ordered sequence of stages.
#[derive(Debug, Clone, Default)]
pub struct StageOrchestrator {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageOrchestrator {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order, stopping at the first failure.
    pub async fn run_all(&self, ctx: &mut PipelineContext) -> Result<(), StageError> {
        for stage in &self.stages {
            self.run_stage(stage.as_ref(), ctx).await?;
        }
        Ok(())
    }

    /// Invoke one stage and record its result.
    #[instrument(
        skip(self, stage, ctx),
        fields(stage = %stage.name(), correlation_id = %ctx.correlation_id(), iteration = ctx.iteration())
    )]
    pub async fn run_stage(
        &self,
        stage: &dyn Stage,
        ctx: &mut PipelineContext,
    ) -> Result<StageResult, StageError> {
        ctx.record_execution();
        let output = match stage.invoke(ctx).await {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(error = %err, "Stage failed");
                return Err(err);
            }
        };
        let result = Self::interpret(stage.name(), stage.schema(), output);
        if let PayloadSource::Fallback { reason, .. } = &result.source {
            tracing::warn!(%reason, "Stage output did not match schema, using fallback payload");
        } else {
            tracing::debug!("Stage output parsed");
        }
        ctx.insert(result.clone());
        Ok(result)
    }

    fn interpret(name: &str, schema: SchemaKind, output: StageOutput) -> StageResult {
        let (parsed, raw) = match output {
            StageOutput::Text(text) => (schema.parse(&text), text),
            StageOutput::Json(value) => {
                let raw = value.to_string();
                (schema.normalize(value), raw)
            }
        };
        match parsed {
            Ok(payload) => StageResult {
                stage: name.to_string(),
                payload,
                source: PayloadSource::Structured,
            },
            Err(err) => StageResult {
                stage: name.to_string(),
                payload: schema.fallback(&raw),
                source: PayloadSource::Fallback {
                    raw,
                    reason: err.to_string(),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Fixed {
        name: &'static str,
        schema: SchemaKind,
        output: Result<StageOutput, RunFailure>,
    }

    #[async_trait]
    impl Stage for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn schema(&self) -> SchemaKind {
            self.schema
        }

        async fn invoke(&self, _ctx: &PipelineContext) -> Result<StageOutput, StageError> {
            self.output.clone().map_err(|source| StageError::Run {
                stage: self.name.to_string(),
                source,
            })
        }
    }

    fn stage(name: &'static str, schema: SchemaKind, text: &str) -> Arc<dyn Stage> {
        Arc::new(Fixed {
            name,
            schema,
            output: Ok(StageOutput::Text(text.to_string())),
        })
    }

    fn ctx() -> PipelineContext {
        PipelineContext::new("corr", "session", "subject", json!({}))
    }

    #[tokio::test]
    async fn stages_run_in_order_and_fallback_on_prose() {
        let orchestrator = StageOrchestrator::new(vec![
            stage("triage", SchemaKind::Triage, r#"{"intent":"sales","priority":"low","sla_minutes":240,"route":"sales"}"#),
            stage("plan", SchemaKind::Plan, "just some prose"),
        ]);
        let mut ctx = ctx();
        orchestrator.run_all(&mut ctx).await.unwrap();

        assert_eq!(orchestrator.stage_names(), vec!["triage", "plan"]);
        let triage = ctx.get("triage").unwrap();
        assert!(!triage.is_fallback());
        assert_eq!(triage.payload["route"], "sales");

        let plan = ctx.get("plan").unwrap();
        assert!(plan.is_fallback());
        assert_eq!(
            plan.payload,
            json!({"plan": [{"action": "send_message", "data": {"text": "just some prose"}}]})
        );
        assert_eq!(ctx.executions(), 2);
    }

    #[tokio::test]
    async fn run_failure_stops_the_sequence() {
        let failing: Arc<dyn Stage> = Arc::new(Fixed {
            name: "triage",
            schema: SchemaKind::Triage,
            output: Err(RunFailure::Timeout { polls: 3 }),
        });
        let orchestrator =
            StageOrchestrator::new(vec![failing, stage("plan", SchemaKind::Plan, "{}")]);
        let mut ctx = ctx();
        let err = orchestrator.run_all(&mut ctx).await.unwrap_err();

        assert_eq!(err.stage(), "triage");
        assert!(matches!(
            err,
            StageError::Run {
                source: RunFailure::Timeout { polls: 3 },
                ..
            }
        ));
        assert!(ctx.results().is_empty());
    }

    #[tokio::test]
    async fn json_output_is_normalized_like_text() {
        let orchestrator = StageOrchestrator::default();
        let mut ctx = ctx();
        let review = Fixed {
            name: "review",
            schema: SchemaKind::Verdict,
            output: Ok(StageOutput::Json(json!({"label": "red", "score": 400}))),
        };
        let result = orchestrator.run_stage(&review, &mut ctx).await.unwrap();
        assert_eq!(result.payload["score"], 100);

        let broken = Fixed {
            name: "review",
            schema: SchemaKind::Verdict,
            output: Ok(StageOutput::Json(json!({"status": "failed"}))),
        };
        let result = orchestrator.run_stage(&broken, &mut ctx).await.unwrap();
        assert!(result.is_fallback());
        assert_eq!(result.payload["label"], "yellow");
        assert_eq!(ctx.results().len(), 1);
    }
}
