//! Delivery of planned actions to a downstream sink.
//!
//! The executor is the only part of the crate with externally visible side
//! effects. Delivery is at-least-once: each action carries a deterministic
//! dedup key (`{correlation_id}-{seq}`) so the sink side can drop repeats,
//! and a failed publish is retried up to the configured number of attempts.

pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::stage::schema::Plan;

pub use webhook::WebhookActionSink;

pub const EVENT_TYPE: &str = "pipeline.action";

/// Wire event handed to the sink for each planned action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub seq: usize,
    pub action: String,
    pub data: Value,
    pub context: ActionContext,
}

/// Identifiers attached to every event of one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionContext {
    pub correlation_id: String,
    pub subject_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub dedup_key: Option<String>,
    pub partition_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishFailure {
    pub seq: usize,
    pub action: String,
    pub error: String,
}

/// Outcome of executing a plan.
///
/// `acknowledged` counts actions accepted for processing, `published` counts
/// actions the sink confirmed. They differ when no sink is configured or a
/// publish failed after all attempts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionReport {
    pub acknowledged: usize,
    pub published: usize,
    #[serde(default)]
    pub failures: Vec<PublishFailure>,
}

/// Downstream destination for action events.
#[async_trait]
pub trait ActionSink: Send + Sync + std::fmt::Debug {
    /// Publish one event. `Ok(false)` means the sink declined it.
    async fn publish(&self, event: &ActionEvent, options: &PublishOptions) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone)]
pub struct ActionExecutor {
    sink: Option<Arc<dyn ActionSink>>,
    publish_attempts: u32,
}

impl ActionExecutor {
    pub fn new(sink: Option<Arc<dyn ActionSink>>, publish_attempts: u32) -> Self {
        Self {
            sink,
            publish_attempts: publish_attempts.max(1),
        }
    }

    /// Executor with no sink: everything is acknowledged, nothing published.
    pub fn disabled() -> Self {
        Self::new(None, 1)
    }

    pub fn events(plan: &Plan, context: &ActionContext) -> Vec<ActionEvent> {
        plan.plan
            .iter()
            .enumerate()
            .map(|(seq, step)| ActionEvent {
                kind: EVENT_TYPE.to_string(),
                seq,
                action: step.action.clone(),
                data: step.data.clone(),
                context: context.clone(),
            })
            .collect()
    }

    /// Publish every action of `plan` in order.
    #[instrument(skip(self, plan), fields(correlation_id = %context.correlation_id, action_count = plan.plan.len()))]
    pub async fn execute(&self, plan: &Plan, context: &ActionContext) -> ExecutionReport {
        let events = Self::events(plan, context);
        let mut report = ExecutionReport {
            acknowledged: events.len(),
            ..ExecutionReport::default()
        };
        let Some(sink) = &self.sink else {
            tracing::info!("No action sink configured, actions acknowledged only");
            return report;
        };

        for event in &events {
            let options = PublishOptions {
                dedup_key: Some(format!("{}-{}", context.correlation_id, event.seq)),
                partition_key: Some(context.subject_id.clone()),
            };
            match self.publish_with_retry(sink.as_ref(), event, &options).await {
                Ok(()) => report.published += 1,
                Err(error) => {
                    tracing::warn!(seq = event.seq, action = %event.action, %error, "Action not published");
                    report.failures.push(PublishFailure {
                        seq: event.seq,
                        action: event.action.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    async fn publish_with_retry(
        &self,
        sink: &dyn ActionSink,
        event: &ActionEvent,
        options: &PublishOptions,
    ) -> Result<(), String> {
        let mut last_error = String::new();
        for attempt in 1..=self.publish_attempts {
            match sink.publish(event, options).await {
                Ok(true) => return Ok(()),
                Ok(false) => last_error = "sink declined the event".to_string(),
                Err(err) => last_error = format!("{err:#}"),
            }
            tracing::debug!(seq = event.seq, attempt, error = %last_error, "Publish attempt failed");
        }
        Err(last_error)
    }
}
