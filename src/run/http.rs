//! REST transport for the run-execution service.
//!
//! Endpoints (each appended with `?api-version=<version>`):
//!   - `POST /assistants`
//!   - `POST /threads`
//!   - `POST /threads/{thread_id}/messages`
//!   - `POST /threads/{thread_id}/runs`
//!   - `GET  /threads/{thread_id}/runs/{run_id}`
//!   - `POST /threads/{thread_id}/runs/{run_id}/submit_tool_outputs`
//!   - `GET  /threads/{thread_id}/messages?order=desc&limit=1`

use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use super::client::RunClient;
use super::types::{AgentDefinition, Run, RunStatus, ToolCall, ToolOutput};

/// Connection settings for [`HttpRunClient`].
#[derive(Debug, Clone)]
pub struct HttpRunSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_version: String,
    /// Per-request timeout, connect through body.
    pub timeout: Duration,
}

/// [`RunClient`] speaking the threads/runs REST protocol.
#[derive(Clone)]
pub struct HttpRunClient {
    http: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    api_version: String,
}

impl std::fmt::Debug for HttpRunClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRunClient")
            .field("base", &self.base.as_str())
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl HttpRunClient {
    pub fn new(settings: &HttpRunSettings) -> anyhow::Result<Self> {
        let trimmed = settings.endpoint.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(anyhow!("run service endpoint cannot be empty"));
        }
        // A trailing slash makes `Url::join` append instead of replace.
        let base = Url::parse(&format!("{trimmed}/"))
            .with_context(|| format!("invalid run service endpoint: {}", settings.endpoint))?;
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("build run service http client")?;
        Ok(Self {
            http,
            base,
            api_key: settings.api_key.clone(),
            api_version: settings.api_version.clone(),
        })
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        let mut url = self
            .base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("build url for {path}"))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => rb.bearer_auth(key),
            None => rb,
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> anyhow::Result<T> {
        let url = self.url(path)?;
        let resp = self
            .authorize(self.http.post(url).json(body))
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        Self::decode(path, resp).await
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> anyhow::Result<T> {
        let mut url = self.url(path)?;
        url.query_pairs_mut().extend_pairs(query);
        let resp = self
            .authorize(self.http.get(url))
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        Self::decode(path, resp).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        path: &str,
        resp: reqwest::Response,
    ) -> anyhow::Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{path} failed: {status} {text}"));
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("decode response of {path}"))
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireRun {
    id: String,
    thread_id: String,
    status: RunStatus,
    #[serde(default)]
    required_action: Option<WireRequiredAction>,
}

#[derive(Debug, Deserialize)]
struct WireRequiredAction {
    #[serde(default)]
    submit_tool_outputs: Option<WireSubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
struct WireSubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireToolOutput<'a> {
    tool_call_id: &'a str,
    output: String,
}

#[derive(Debug, Deserialize)]
struct WireMessageList {
    #[serde(default)]
    data: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Vec<WireContentPart>,
}

#[derive(Debug, Deserialize)]
struct WireContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<WireText>,
}

#[derive(Debug, Deserialize)]
struct WireText {
    value: String,
}

impl From<WireRun> for Run {
    fn from(wire: WireRun) -> Self {
        let pending_tool_calls = wire
            .required_action
            .and_then(|ra| ra.submit_tool_outputs)
            .map(|sto| sto.tool_calls)
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall::new(tc.id, tc.function.name, parse_arguments(&tc.function.arguments)))
            .collect();
        Run {
            id: wire.id,
            session_id: wire.thread_id,
            status: wire.status,
            pending_tool_calls,
        }
    }
}

/// Tool arguments arrive as a JSON-encoded string; anything that is not a
/// JSON object becomes `{}`.
fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        _ => json!({}),
    }
}

/// First text part of the newest message, or empty when there is none.
fn first_text(list: WireMessageList) -> String {
    list.data
        .into_iter()
        .next()
        .and_then(|msg| {
            msg.content
                .into_iter()
                .find(|part| part.kind == "text")
                .and_then(|part| part.text)
        })
        .map(|text| text.value)
        .unwrap_or_default()
}

#[async_trait]
impl RunClient for HttpRunClient {
    async fn create_agent(&self, definition: &AgentDefinition) -> anyhow::Result<String> {
        let body = json!({
            "model": definition.model,
            "name": definition.name,
            "instructions": definition.instructions,
            "tools": definition.tool_declarations(),
        });
        let created: IdResponse = self.post("/assistants", &body).await?;
        Ok(created.id)
    }

    async fn create_session(&self, metadata: Value) -> anyhow::Result<String> {
        let created: IdResponse = self
            .post("/threads", &json!({ "metadata": metadata }))
            .await?;
        Ok(created.id)
    }

    async fn submit(&self, session_id: &str, agent_id: &str, message: &str) -> anyhow::Result<Run> {
        let _: Value = self
            .post(
                &format!("/threads/{session_id}/messages"),
                &json!({
                    "role": "user",
                    "content": [{ "type": "text", "text": message }],
                }),
            )
            .await?;
        let run: WireRun = self
            .post(
                &format!("/threads/{session_id}/runs"),
                &json!({ "assistant_id": agent_id }),
            )
            .await?;
        Ok(run.into())
    }

    async fn poll(&self, session_id: &str, run_id: &str) -> anyhow::Result<Run> {
        let run: WireRun = self
            .get(&format!("/threads/{session_id}/runs/{run_id}"), &[])
            .await?;
        Ok(run.into())
    }

    async fn submit_tool_outputs(
        &self,
        session_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> anyhow::Result<Run> {
        let wire: Vec<WireToolOutput<'_>> = outputs
            .iter()
            .map(|o| WireToolOutput {
                tool_call_id: &o.tool_call_id,
                output: o.output.to_string(),
            })
            .collect();
        let run: WireRun = self
            .post(
                &format!("/threads/{session_id}/runs/{run_id}/submit_tool_outputs"),
                &json!({ "tool_outputs": wire }),
            )
            .await?;
        Ok(run.into())
    }

    async fn latest_message(&self, session_id: &str) -> anyhow::Result<String> {
        let list: WireMessageList = self
            .get(
                &format!("/threads/{session_id}/messages"),
                &[("order", "desc"), ("limit", "1")],
            )
            .await?;
        Ok(first_text(list))
    }
}
