//! Bounded generate → validate loop that stops on the first `green` verdict.

use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use super::gate::{GateDecision, QualityGate};
use crate::pipeline::{PipelineContext, PipelineStatus};
use crate::stage::schema::ReviewVerdict;
use crate::stage::{Stage, StageError, StageOrchestrator};

pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Final state of a retry loop.
#[derive(Debug, Clone, Serialize)]
pub struct RetryOutcome {
    pub status: PipelineStatus,
    /// Payload of the last generation.
    pub payload: Value,
    pub verdict: ReviewVerdict,
    pub decision: GateDecision,
    pub iterations: u32,
}

/// Bounded generate → validate → gate loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryLoop {
    gate: QualityGate,
    max_iterations: u32,
}

impl RetryLoop {
    pub fn new(gate: QualityGate, max_iterations: u32) -> Self {
        Self {
            gate,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    /// Run `generate` then `validate` until the gate accepts or the budget
    /// runs out. The iteration index is visible to both stages through
    /// [`PipelineContext::iteration`].
    #[instrument(
        skip_all,
        fields(
            correlation_id = %ctx.correlation_id(),
            generate = %generate.name(),
            validate = %validate.name(),
            max_iterations = self.max_iterations
        )
    )]
    pub async fn run(
        &self,
        orchestrator: &StageOrchestrator,
        generate: &dyn Stage,
        validate: &dyn Stage,
        ctx: &mut PipelineContext,
    ) -> Result<RetryOutcome, StageError> {
        let mut iteration = 0;
        loop {
            ctx.set_iteration(iteration);
            let generated = orchestrator.run_stage(generate, ctx).await?;
            let reviewed = orchestrator.run_stage(validate, ctx).await?;
            let verdict = reviewed
                .typed::<ReviewVerdict>()
                .unwrap_or_else(|_| ReviewVerdict::unparsed(""));
            let decision = self.gate.decide(&verdict);
            iteration += 1;

            tracing::info!(
                iteration,
                label = %verdict.label,
                score = decision.normalized_score,
                accept = decision.accept,
                "Iteration gated"
            );

            if decision.accept || iteration >= self.max_iterations {
                let status = if decision.accept {
                    PipelineStatus::Ok
                } else {
                    tracing::warn!(iterations = iteration, "Retry budget exhausted without acceptance");
                    PipelineStatus::NeedsReview
                };
                return Ok(RetryOutcome {
                    status,
                    payload: generated.payload,
                    verdict,
                    decision,
                    iterations: iteration,
                });
            }
        }
    }
}
