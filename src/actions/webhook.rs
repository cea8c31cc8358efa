use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;

use super::{ActionEvent, ActionSink, PublishOptions};

pub const DEDUP_HEADER: &str = "x-dedup-key";
pub const PARTITION_HEADER: &str = "x-partition-key";
pub const TIMESTAMP_HEADER: &str = "x-event-timestamp";

/// [`ActionSink`] that POSTs each event as JSON to a webhook.
///
/// The dedup and partition keys travel as headers so the receiver can
/// discard redelivered events.
#[derive(Debug, Clone)]
pub struct WebhookActionSink {
    client: reqwest::Client,
    url: url::Url,
}

impl WebhookActionSink {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let url = url::Url::parse(url).with_context(|| format!("invalid webhook url: {url}"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build webhook http client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ActionSink for WebhookActionSink {
    async fn publish(&self, event: &ActionEvent, options: &PublishOptions) -> anyhow::Result<bool> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(TIMESTAMP_HEADER, chrono::Utc::now().timestamp().to_string())
            .json(event);
        if let Some(key) = &options.dedup_key {
            request = request.header(DEDUP_HEADER, key);
        }
        if let Some(key) = &options.partition_key {
            request = request.header(PARTITION_HEADER, key);
        }

        let response = request.send().await.context("webhook request")?;
        let status = response.status();
        if status.is_server_error() {
            return Err(anyhow!("webhook returned {status}"));
        }
        if !status.is_success() {
            tracing::warn!(%status, seq = event.seq, "Webhook rejected action event");
            return Ok(false);
        }
        Ok(true)
    }
}
