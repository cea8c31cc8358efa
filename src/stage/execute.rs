use async_trait::async_trait;
use serde_json::json;

use super::schema::Plan;
use super::{SchemaKind, Stage, StageError, StageOutput};
use crate::actions::{ActionContext, ActionExecutor};
use crate::pipeline::PipelineContext;

/// Hands the recorded plan to the [`ActionExecutor`].
///
/// The only stage with side effects.
#[derive(Debug, Clone)]
pub struct ExecuteStage {
    name: String,
    plan_stage: String,
    executor: ActionExecutor,
}

impl ExecuteStage {
    pub fn new(name: impl Into<String>, plan_stage: impl Into<String>, executor: ActionExecutor) -> Self {
        Self {
            name: name.into(),
            plan_stage: plan_stage.into(),
            executor,
        }
    }

    fn missing(&self) -> StageError {
        StageError::MissingInput {
            stage: self.name.clone(),
            missing: self.plan_stage.clone(),
        }
    }
}

#[async_trait]
impl Stage for ExecuteStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> SchemaKind {
        SchemaKind::Execution
    }

    async fn invoke(&self, ctx: &PipelineContext) -> Result<StageOutput, StageError> {
        let plan: Plan = ctx
            .get(&self.plan_stage)
            .ok_or_else(|| self.missing())?
            .typed()
            .map_err(|err| {
                tracing::warn!(error = %err, "Recorded plan does not decode");
                self.missing()
            })?;
        let context = ActionContext {
            correlation_id: ctx.correlation_id().to_string(),
            subject_id: ctx.subject_id().to_string(),
        };
        let report = self.executor.execute(&plan, &context).await;
        tracing::info!(
            acknowledged = report.acknowledged,
            published = report.published,
            failures = report.failures.len(),
            "Plan executed"
        );
        Ok(StageOutput::Json(json!({
            "acknowledged": report.acknowledged,
            "published": report.published,
            "failures": report.failures,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_plan_is_an_error() {
        let stage = ExecuteStage::new("execute", "plan", ActionExecutor::disabled());
        let ctx = PipelineContext::new("c", "s", "subj", json!({}));
        let err = stage.invoke(&ctx).await.unwrap_err();
        assert!(matches!(err, StageError::MissingInput { ref missing, .. } if missing == "plan"));
    }
}
