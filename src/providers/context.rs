//! HTTP profile provider: `GET {base}/api/profile/{subject_id}`.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::ContextProvider;

const KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct HttpContextSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub window_days: u32,
    pub lang: String,
}

#[derive(Debug)]
pub struct HttpContextProvider {
    client: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    window_days: u32,
    lang: String,
}

impl HttpContextProvider {
    pub fn new(settings: HttpContextSettings) -> anyhow::Result<Self> {
        let trimmed = settings.endpoint.trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/"))
            .with_context(|| format!("invalid context endpoint: {}", settings.endpoint))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build context http client")?;
        Ok(Self {
            client,
            base,
            api_key: settings.api_key,
            window_days: settings.window_days,
            lang: settings.lang,
        })
    }

    fn profile_url(&self, subject_id: &str) -> anyhow::Result<Url> {
        let mut url = self.base.join("api/profile/")?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("context endpoint cannot be a base url"))?
            .pop_if_empty()
            .push(subject_id);
        url.query_pairs_mut()
            .append_pair("lang", &self.lang)
            .append_pair("window_days", &self.window_days.to_string());
        Ok(url)
    }
}

#[async_trait]
impl ContextProvider for HttpContextProvider {
    async fn fetch_profile(&self, subject_id: &str) -> anyhow::Result<Value> {
        let url = self.profile_url(subject_id)?;
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header(KEY_HEADER, key);
        }
        let response = request.send().await.context("profile request")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("profile lookup failed ({status})"));
        }
        let profile: Value = response.json().await.context("decode profile")?;
        if !profile.is_object() {
            return Err(anyhow!("profile for {subject_id} is not a JSON object"));
        }
        Ok(profile)
    }
}
