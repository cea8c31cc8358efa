//! Two-gate customer interaction pipeline.
//!
//! ```text
//! triage → contextualize → plan → pre_review ─┬─ escalate → needs_review (no side effects)
//!                                             └─ execute → post_review → ok | needs_review
//! ```
//!
//! `triage` asks the deterministic classifier when one is configured and
//! runs the triage agent otherwise, or when the classifier fails.
//!
//! Side effects performed by `execute` are not rolled back when the
//! post-execution gate escalates; that gate only decides the final status.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;

use super::definitions;
use super::{PipelineContext, PipelineError, PipelineStatus, StageFailure, correlation_id, open_session, required};
use crate::actions::{ActionExecutor, ExecutionReport};
use crate::providers::{ContextProvider, TriageClassifier};
use crate::quality::{GateDecision, QualityGate};
use crate::run::AgentDefinition;
use crate::stage::schema::{ReviewVerdict, SchemaKind};
use crate::stage::{
    AgentRuntime, AgentStage, ContextualizeStage, ExecuteStage, Stage, StageError, StageOrchestrator, TriageStage,
};

pub const TRIAGE: &str = "triage";
pub const CONTEXTUALIZE: &str = "contextualize";
pub const PLAN: &str = "plan";
pub const PRE_REVIEW: &str = "pre_review";
pub const EXECUTE: &str = "execute";
pub const POST_REVIEW: &str = "post_review";

const SESSION_TYPE: &str = "customer_interaction";

fn default_lang() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub subject_id: String,
    pub message: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionOutcome {
    pub status: PipelineStatus,
    pub correlation_id: String,
    pub session_id: String,
    pub triage: Option<Value>,
    pub context: Option<Value>,
    pub plan: Option<Value>,
    pub pre_review: Option<ReviewVerdict>,
    pub pre_decision: Option<GateDecision>,
    pub executed: Option<ExecutionReport>,
    pub review: Option<ReviewVerdict>,
    pub decision: Option<GateDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
}

impl InteractionOutcome {
    fn from_context(ctx: &PipelineContext, status: PipelineStatus) -> Self {
        let verdict = |stage| ctx.get(stage).and_then(|r| r.typed::<ReviewVerdict>().ok());
        Self {
            status,
            correlation_id: ctx.correlation_id().to_string(),
            session_id: ctx.session_id().to_string(),
            triage: ctx.payload(TRIAGE).cloned(),
            context: ctx.payload(CONTEXTUALIZE).cloned(),
            plan: ctx.payload(PLAN).cloned(),
            pre_review: verdict(PRE_REVIEW),
            pre_decision: None,
            executed: ctx.get(EXECUTE).and_then(|r| r.typed::<ExecutionReport>().ok()),
            review: verdict(POST_REVIEW),
            decision: None,
            failure: None,
        }
    }

    fn failed(ctx: &PipelineContext, failure: StageFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::from_context(ctx, PipelineStatus::NeedsReview)
        }
    }
}

#[derive(Debug, Clone)]
pub struct InteractionPipeline {
    runtime: Arc<AgentRuntime>,
    gate: QualityGate,
    pre: StageOrchestrator,
    post: StageOrchestrator,
}

impl InteractionPipeline {
    pub fn new(
        runtime: Arc<AgentRuntime>,
        model: &str,
        gate: QualityGate,
        executor: ActionExecutor,
        context: Option<Arc<dyn ContextProvider>>,
        triage_classifier: Option<Arc<dyn TriageClassifier>>,
    ) -> Self {
        let agent = |name: &'static str, schema: SchemaKind, definition: AgentDefinition, prompt: Prompt| {
            agent_stage(&runtime, name, schema, definition, prompt)
        };
        let triage: Arc<dyn Stage> = Arc::new(TriageStage::new(
            triage_classifier,
            AgentStage::new(
                TRIAGE,
                SchemaKind::Triage,
                definitions::triage(model),
                Arc::clone(&runtime),
                triage_prompt,
            ),
        ));
        let contextualize: Arc<dyn Stage> = Arc::new(ContextualizeStage::new(CONTEXTUALIZE, context));
        let execute: Arc<dyn Stage> = Arc::new(ExecuteStage::new(EXECUTE, PLAN, executor));

        let pre = StageOrchestrator::new(vec![
            triage,
            contextualize,
            agent(PLAN, SchemaKind::Plan, definitions::planner(model), plan_prompt),
            agent(PRE_REVIEW, SchemaKind::Verdict, definitions::supervisor(model), pre_review_prompt),
        ]);
        let post = StageOrchestrator::new(vec![
            execute,
            agent(POST_REVIEW, SchemaKind::Verdict, definitions::supervisor(model), post_review_prompt),
        ]);

        Self {
            runtime,
            gate,
            pre,
            post,
        }
    }

    #[instrument(skip_all, fields(subject_id = %request.subject_id, correlation_id = tracing::field::Empty))]
    pub async fn process(&self, request: InteractionRequest) -> Result<InteractionOutcome, PipelineError> {
        let correlation_id = correlation_id(request.correlation_id.as_deref());
        tracing::Span::current().record("correlation_id", correlation_id.as_str());

        let client = self.runtime.controller().client();
        let session_id = open_session(client.as_ref(), &correlation_id, &request.subject_id, SESSION_TYPE).await?;
        let input = serde_json::to_value(&request).unwrap_or(Value::Null);
        let mut ctx = PipelineContext::new(&correlation_id, &session_id, &request.subject_id, input);

        if let Err(err) = self.pre.run_all(&mut ctx).await {
            tracing::warn!(error = %err, "Interaction stopped before execution");
            return Ok(InteractionOutcome::failed(&ctx, StageFailure::from(&err)));
        }

        let pre_decision = self.decide(&ctx, PRE_REVIEW);
        if pre_decision.escalate {
            tracing::warn!(score = pre_decision.normalized_score, "Pre-execution gate escalated, actions withheld");
            return Ok(InteractionOutcome {
                pre_decision: Some(pre_decision),
                ..InteractionOutcome::from_context(&ctx, PipelineStatus::NeedsReview)
            });
        }

        if let Err(err) = self.post.run_all(&mut ctx).await {
            tracing::warn!(error = %err, "Interaction stopped after pre-execution gate");
            return Ok(InteractionOutcome {
                pre_decision: Some(pre_decision),
                ..InteractionOutcome::failed(&ctx, StageFailure::from(&err))
            });
        }

        let decision = self.decide(&ctx, POST_REVIEW);
        let status = if decision.accept {
            PipelineStatus::Ok
        } else {
            PipelineStatus::NeedsReview
        };
        tracing::info!(?status, score = decision.normalized_score, "Interaction finished");
        Ok(InteractionOutcome {
            pre_decision: Some(pre_decision),
            decision: Some(decision),
            ..InteractionOutcome::from_context(&ctx, status)
        })
    }

    fn decide(&self, ctx: &PipelineContext, stage: &str) -> GateDecision {
        let verdict = ctx
            .get(stage)
            .and_then(|r| r.typed::<ReviewVerdict>().ok())
            .unwrap_or_else(|| ReviewVerdict::unparsed(""));
        self.gate.decide(&verdict)
    }
}

type Prompt = fn(&PipelineContext) -> Result<String, StageError>;

fn agent_stage(
    runtime: &Arc<AgentRuntime>,
    name: &str,
    schema: SchemaKind,
    definition: AgentDefinition,
    prompt: Prompt,
) -> Arc<dyn Stage> {
    Arc::new(AgentStage::new(name, schema, definition, Arc::clone(runtime), prompt))
}

fn triage_prompt(ctx: &PipelineContext) -> Result<String, StageError> {
    let input = ctx.input();
    Ok(json!({
        "triage_input": {
            "text": input.get("message").cloned().unwrap_or(Value::Null),
            "lang": input.get("lang").cloned().unwrap_or(Value::Null),
            "subject_id": ctx.subject_id(),
        }
    })
    .to_string())
}

fn plan_prompt(ctx: &PipelineContext) -> Result<String, StageError> {
    Ok(json!({
        "triage": required(ctx, PLAN, TRIAGE)?,
        "context": required(ctx, PLAN, CONTEXTUALIZE)?,
    })
    .to_string())
}

fn pre_review_prompt(ctx: &PipelineContext) -> Result<String, StageError> {
    Ok(json!({
        "triage": required(ctx, PRE_REVIEW, TRIAGE)?,
        "plan": required(ctx, PRE_REVIEW, PLAN)?,
    })
    .to_string())
}

fn post_review_prompt(ctx: &PipelineContext) -> Result<String, StageError> {
    Ok(json!({
        "triage": required(ctx, POST_REVIEW, TRIAGE)?,
        "plan": required(ctx, POST_REVIEW, PLAN)?,
        "executed": required(ctx, POST_REVIEW, EXECUTE)?,
    })
    .to_string())
}
