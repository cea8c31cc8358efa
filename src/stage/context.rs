use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{SchemaKind, Stage, StageError, StageOutput};
use crate::pipeline::PipelineContext;
use crate::providers::ContextProvider;

/// Deterministic step that loads the subject profile.
///
/// A missing or failing provider yields `{}`; this stage never fails.
#[derive(Debug, Clone)]
pub struct ContextualizeStage {
    name: String,
    provider: Option<Arc<dyn ContextProvider>>,
}

impl ContextualizeStage {
    pub fn new(name: impl Into<String>, provider: Option<Arc<dyn ContextProvider>>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }
}

#[async_trait]
impl Stage for ContextualizeStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> SchemaKind {
        SchemaKind::Object
    }

    async fn invoke(&self, ctx: &PipelineContext) -> Result<StageOutput, StageError> {
        let Some(provider) = &self.provider else {
            tracing::debug!("No context provider configured");
            return Ok(StageOutput::Json(json!({})));
        };
        let profile = match provider.fetch_profile(ctx.subject_id()).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::warn!(subject_id = %ctx.subject_id(), error = %err, "Profile fetch failed, continuing without context");
                Value::Object(serde_json::Map::new())
            }
        };
        Ok(StageOutput::Json(profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[derive(Debug)]
    struct Failing;

    #[async_trait]
    impl ContextProvider for Failing {
        async fn fetch_profile(&self, _subject_id: &str) -> anyhow::Result<Value> {
            Err(anyhow!("timeout"))
        }
    }

    #[tokio::test]
    async fn failing_provider_yields_empty_profile() {
        let provider: Arc<dyn ContextProvider> = Arc::new(Failing);
        let stage = ContextualizeStage::new("contextualize", Some(provider));
        let ctx = PipelineContext::new("c", "s", "subj", json!({}));
        assert_eq!(stage.invoke(&ctx).await.unwrap(), StageOutput::Json(json!({})));
    }

    #[tokio::test]
    async fn absent_provider_yields_empty_profile() {
        let stage = ContextualizeStage::new("contextualize", None);
        let ctx = PipelineContext::new("c", "s", "subj", json!({}));
        assert_eq!(stage.invoke(&ctx).await.unwrap(), StageOutput::Json(json!({})));
    }
}
