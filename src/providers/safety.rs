//! Content-safety classifier over the `text:analyze` REST operation.
//!
//! Request: `POST {endpoint}/contentsafety/text:analyze?api-version=...` with
//! the four harm categories at four severity levels. Response categories are
//! read from `categoriesAnalysis`; older per-category `*Result` fields are
//! accepted as well.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::SafetyClassifier;

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const CATEGORIES: [&str; 4] = ["Hate", "SelfHarm", "Sexual", "Violence"];

/// Severity per harm category, as returned by the classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityReport {
    pub categories: BTreeMap<String, u8>,
}

impl SeverityReport {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        Self {
            categories: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Highest severity across all categories; `0` when nothing was reported.
    #[must_use]
    pub fn max_severity(&self) -> u8 {
        self.categories.values().copied().max().unwrap_or(0)
    }

    fn from_response(body: &Value) -> Self {
        if let Some(list) = body.get("categoriesAnalysis").and_then(Value::as_array) {
            return Self::from_pairs(list.iter().filter_map(|entry| {
                let category = entry.get("category")?.as_str()?;
                let severity = entry.get("severity")?.as_u64()?;
                Some((category, u8::try_from(severity).unwrap_or(u8::MAX)))
            }));
        }
        Self::from_pairs(CATEGORIES.iter().filter_map(|category| {
            let field = format!("{}Result", lower_first(category));
            let severity = body.get(&field)?.get("severity")?.as_u64()?;
            Some((*category, u8::try_from(severity).unwrap_or(u8::MAX)))
        }))
    }
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct HttpSafetySettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_version: String,
}

#[derive(Debug)]
pub struct HttpSafetyClassifier {
    client: reqwest::Client,
    settings: HttpSafetySettings,
}

impl HttpSafetyClassifier {
    pub fn new(settings: HttpSafetySettings) -> anyhow::Result<Self> {
        if settings.endpoint.trim().is_empty() {
            return Err(anyhow!("safety endpoint cannot be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build safety http client")?;
        Ok(Self { client, settings })
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/contentsafety/text:analyze?api-version={}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.api_version
        )
    }
}

#[async_trait]
impl SafetyClassifier for HttpSafetyClassifier {
    async fn analyze(&self, text: &str) -> anyhow::Result<SeverityReport> {
        let body = json!({
            "text": text,
            "categories": CATEGORIES,
            "outputType": "FourSeverityLevels",
        });
        let mut request = self.client.post(self.analyze_url()).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.header(KEY_HEADER, key);
        }
        let response = request.send().await.context("safety request")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("safety analysis failed ({status}): {text}"));
        }
        let body: Value = response.json().await.context("decode safety response")?;
        Ok(SeverityReport::from_response(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_categories_analysis() {
        let report = SeverityReport::from_response(&json!({
            "categoriesAnalysis": [
                {"category": "Hate", "severity": 0},
                {"category": "Sexual", "severity": 4},
                {"category": "Violence", "severity": 2}
            ]
        }));
        assert_eq!(report.max_severity(), 4);
        assert_eq!(report.categories.get("Violence"), Some(&2));
    }

    #[test]
    fn reads_per_category_result_fields() {
        let report = SeverityReport::from_response(&json!({
            "hateResult": {"severity": 2},
            "selfHarmResult": {"severity": 0}
        }));
        assert_eq!(report.max_severity(), 2);
        assert_eq!(report.categories.len(), 2);
    }

    #[test]
    fn empty_report_is_severity_zero() {
        assert_eq!(SeverityReport::default().max_severity(), 0);
    }

    #[test]
    fn analyze_url_is_built_from_endpoint() {
        let classifier = HttpSafetyClassifier::new(HttpSafetySettings {
            endpoint: "https://cs.example.com/".to_string(),
            api_key: None,
            api_version: "2023-10-01".to_string(),
        })
        .unwrap();
        assert_eq!(
            classifier.analyze_url(),
            "https://cs.example.com/contentsafety/text:analyze?api-version=2023-10-01"
        );
    }
}
