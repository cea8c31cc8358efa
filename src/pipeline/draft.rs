//! Message generation: `writer → safeguard`, retried until the gate accepts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;

use super::definitions;
use super::{PipelineContext, PipelineError, PipelineStatus, StageFailure, correlation_id, open_session, required};
use crate::providers::{ContextProvider, SafetyClassifier};
use crate::quality::{GateDecision, RetryLoop};
use crate::run::AgentDefinition;
use crate::stage::schema::{ReviewVerdict, SchemaKind};
use crate::stage::{AgentRuntime, AgentStage, StageOrchestrator};
use crate::tools::{AnalyzeSafetyTool, ComputePriceTool, FetchContextTool, ToolRegistry};

const SESSION_TYPE: &str = "message_generation";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRequest {
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub subject_id: String,
    /// What the caller already knows about the recipient (segment, history).
    #[serde(default)]
    pub subject_context: Value,
    /// Generation goals: personality, tone, max length, content type.
    #[serde(default)]
    pub objectives: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftResponse {
    pub status: PipelineStatus,
    pub correlation_id: String,
    pub session_id: String,
    pub draft: String,
    pub risk: Option<ReviewVerdict>,
    pub decision: Option<GateDecision>,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
}

#[derive(Debug, Clone)]
pub struct DraftPipeline {
    runtime: Arc<AgentRuntime>,
    writer: AgentDefinition,
    safeguard: AgentDefinition,
    retry: RetryLoop,
    context: Option<Arc<dyn ContextProvider>>,
    classifier: Option<Arc<dyn SafetyClassifier>>,
}

impl DraftPipeline {
    pub fn new(runtime: Arc<AgentRuntime>, model: &str, retry: RetryLoop) -> Self {
        Self {
            runtime,
            writer: definitions::writer(model),
            safeguard: definitions::safeguard(model),
            retry,
            context: None,
            classifier: None,
        }
    }

    #[must_use]
    pub fn with_context_provider(mut self, provider: Option<Arc<dyn ContextProvider>>) -> Self {
        self.context = provider;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Option<Arc<dyn SafetyClassifier>>) -> Self {
        self.classifier = classifier;
        self
    }

    fn writer_stage(&self, request: &DraftRequest) -> AgentStage {
        let segment = request.subject_context.get("segment").and_then(Value::as_str);
        let content_type = request.objectives.get("content_type").and_then(Value::as_str);
        let tools = ToolRegistry::new()
            .with(Arc::new(FetchContextTool::new(
                request.subject_id.clone(),
                request.subject_context.clone(),
                self.context.clone(),
            )))
            .with(Arc::new(ComputePriceTool::new(segment, content_type)));

        AgentStage::new(
            definitions::WRITER,
            SchemaKind::Draft,
            self.writer.clone(),
            Arc::clone(&self.runtime),
            |ctx: &PipelineContext| {
                let input = ctx.input();
                Ok(json!({
                    "subject_context": input.get("subject_context").cloned().unwrap_or(Value::Null),
                    "objectives": input.get("objectives").cloned().unwrap_or(Value::Null),
                    "iteration": ctx.iteration(),
                })
                .to_string())
            },
        )
        .with_tools(tools)
    }

    fn safeguard_stage(&self) -> AgentStage {
        let tools = ToolRegistry::new().with(Arc::new(AnalyzeSafetyTool::new(self.classifier.clone())));
        AgentStage::new(
            definitions::SAFEGUARD,
            SchemaKind::Verdict,
            self.safeguard.clone(),
            Arc::clone(&self.runtime),
            |ctx: &PipelineContext| {
                let draft = required(ctx, definitions::SAFEGUARD, definitions::WRITER)?;
                Ok(json!({ "draft": draft.get("draft").cloned().unwrap_or(Value::Null) }).to_string())
            },
        )
        .with_tools(tools)
    }

    /// Generate a draft and gate it.
    #[instrument(skip_all, fields(subject_id = %request.subject_id, correlation_id = tracing::field::Empty))]
    pub async fn process(&self, request: DraftRequest) -> Result<DraftResponse, PipelineError> {
        let correlation_id = correlation_id(request.correlation_id.as_deref());
        tracing::Span::current().record("correlation_id", correlation_id.as_str());

        let client = self.runtime.controller().client();
        let session_id = open_session(client.as_ref(), &correlation_id, &request.subject_id, SESSION_TYPE).await?;

        let writer = self.writer_stage(&request);
        let safeguard = self.safeguard_stage();
        let input = serde_json::to_value(&request).unwrap_or(Value::Null);
        let mut ctx = PipelineContext::new(&correlation_id, &session_id, &request.subject_id, input);
        // The retry loop sequences the two stages itself.
        let orchestrator = StageOrchestrator::default();

        match self.retry.run(&orchestrator, &writer, &safeguard, &mut ctx).await {
            Ok(outcome) => {
                tracing::info!(status = ?outcome.status, iterations = outcome.iterations, "Draft pipeline finished");
                Ok(DraftResponse {
                    status: outcome.status,
                    correlation_id,
                    session_id,
                    draft: draft_text(&outcome.payload),
                    risk: Some(outcome.verdict),
                    decision: Some(outcome.decision),
                    iterations: outcome.iterations,
                    failure: None,
                })
            }
            Err(err) => {
                tracing::warn!(error = %err, "Draft pipeline stopped by stage failure");
                Ok(DraftResponse {
                    status: PipelineStatus::NeedsReview,
                    draft: ctx.payload(definitions::WRITER).map(draft_text).unwrap_or_default(),
                    risk: ctx
                        .get(definitions::SAFEGUARD)
                        .and_then(|r| r.typed::<ReviewVerdict>().ok()),
                    decision: None,
                    iterations: ctx.iteration() + 1,
                    failure: Some(StageFailure::from(&err)),
                    correlation_id,
                    session_id,
                })
            }
        }
    }
}

fn draft_text(payload: &Value) -> String {
    payload
        .get("draft")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
