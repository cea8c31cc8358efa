//! HTTP triage classifier: `POST {base}/api/triage/classify`.

use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use super::TriageClassifier;

const KEY_HEADER: &str = "x-functions-key";

/// Message handed to a [`TriageClassifier`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TriageRequest {
    pub message_id: String,
    pub subject_id: String,
    pub text: String,
    pub lang: String,
}

#[derive(Debug, Clone)]
pub struct HttpTriageSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug)]
pub struct HttpTriageClassifier {
    client: reqwest::Client,
    url: Url,
    api_key: Option<String>,
}

impl HttpTriageClassifier {
    pub fn new(settings: HttpTriageSettings) -> anyhow::Result<Self> {
        let trimmed = settings.endpoint.trim_end_matches('/');
        let url = Url::parse(&format!("{trimmed}/"))
            .and_then(|base| base.join("api/triage/classify"))
            .with_context(|| format!("invalid triage endpoint: {}", settings.endpoint))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(12))
            .build()
            .context("build triage http client")?;
        Ok(Self {
            client,
            url,
            api_key: settings.api_key,
        })
    }
}

/// The classification inside a classifier response.
///
/// Responses either wrap it as `meta.triage` or are the classification
/// themselves.
pub fn triage_from_response(body: Value) -> anyhow::Result<Value> {
    if let Some(inner) = body.pointer("/meta/triage").filter(|inner| inner.is_object()) {
        return Ok(inner.clone());
    }
    if !body.is_object() {
        return Err(anyhow!("triage response is not a JSON object"));
    }
    Ok(body)
}

#[async_trait]
impl TriageClassifier for HttpTriageClassifier {
    async fn classify(&self, request: &TriageRequest) -> anyhow::Result<Value> {
        let mut rb = self.client.post(self.url.clone()).json(request);
        if let Some(key) = &self.api_key {
            rb = rb.header(KEY_HEADER, key);
        }
        let response = rb.send().await.context("triage request")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("triage classification failed ({status})"));
        }
        let body: Value = response.json().await.context("decode triage")?;
        triage_from_response(body)
    }
}
