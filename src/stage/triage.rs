use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use super::{AgentStage, SchemaKind, Stage, StageError, StageOutput};
use crate::pipeline::PipelineContext;
use crate::providers::{TriageClassifier, TriageRequest};

/// Triage that asks the deterministic classifier first.
///
/// When no classifier is configured, or it fails, the wrapped agent stage
/// classifies the message instead.
#[derive(Debug, Clone)]
pub struct TriageStage {
    classifier: Option<Arc<dyn TriageClassifier>>,
    agent: AgentStage,
}

impl TriageStage {
    pub fn new(classifier: Option<Arc<dyn TriageClassifier>>, agent: AgentStage) -> Self {
        Self { classifier, agent }
    }

    fn request(ctx: &PipelineContext) -> TriageRequest {
        let field = |key: &str| {
            ctx.input()
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        TriageRequest {
            message_id: ctx.correlation_id().to_string(),
            subject_id: ctx.subject_id().to_string(),
            text: field("message"),
            lang: field("lang"),
        }
    }
}

#[async_trait]
impl Stage for TriageStage {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn schema(&self) -> SchemaKind {
        SchemaKind::Triage
    }

    #[instrument(skip_all, fields(stage = %self.agent.name()))]
    async fn invoke(&self, ctx: &PipelineContext) -> Result<StageOutput, StageError> {
        if let Some(classifier) = &self.classifier {
            match classifier.classify(&Self::request(ctx)).await {
                Ok(triage) => {
                    tracing::debug!("Triage answered by classifier");
                    return Ok(StageOutput::Json(triage));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Triage classifier failed, falling back to the triage agent");
                }
            }
        }
        self.agent.invoke(ctx).await
    }
}
