//! End-to-end pipelines built from stages.
//!
//! - [`draft`]: message generation, `writer → safeguard` under a retry loop
//! - [`interaction`]: two-gate customer interaction,
//!   `triage → contextualize → plan → pre_review → execute → post_review`
//!
//! Both create one remote session per execution and reuse it for every
//! stage. Stage failures end the pipeline with [`PipelineStatus::NeedsReview`]
//! and a [`StageFailure`] record; only failing to open the session is an
//! error.

pub mod context;
pub mod definitions;
pub mod draft;
pub mod interaction;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::run::{RunClient, RunFailure};
use crate::stage::StageError;

pub use context::PipelineContext;
pub use draft::{DraftPipeline, DraftRequest, DraftResponse};
pub use interaction::{InteractionOutcome, InteractionPipeline, InteractionRequest};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Ok,
    NeedsReview,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to open a session: {source}")]
    Session {
        #[source]
        source: RunFailure,
    },
}

/// Stage that stopped a pipeline, as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: String,
    pub error: String,
}

impl From<&StageError> for StageFailure {
    fn from(err: &StageError) -> Self {
        Self {
            stage: err.stage().to_string(),
            error: err.to_string(),
        }
    }
}

pub(crate) fn correlation_id(requested: Option<&str>) -> String {
    requested
        .filter(|id| !id.trim().is_empty())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
}

pub(crate) async fn open_session(
    client: &dyn RunClient,
    correlation_id: &str,
    subject_id: &str,
    session_type: &str,
) -> Result<String, PipelineError> {
    let metadata = json!({
        "correlation_id": correlation_id,
        "subject_id": subject_id,
        "session_type": session_type,
        "ts": chrono::Utc::now().timestamp(),
    });
    client.create_session(metadata).await.map_err(|err| {
        tracing::error!(%correlation_id, error = %err, "Session creation failed");
        PipelineError::Session {
            source: RunFailure::from(err),
        }
    })
}

/// Payload of `stage`, or a [`StageError::MissingInput`] naming `needed_by`.
pub(crate) fn required(ctx: &PipelineContext, needed_by: &str, stage: &str) -> Result<Value, StageError> {
    ctx.payload(stage)
        .cloned()
        .ok_or_else(|| StageError::MissingInput {
            stage: needed_by.to_string(),
            missing: stage.to_string(),
        })
}
