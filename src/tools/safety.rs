use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ToolHandler, ToolKind};
use crate::providers::SafetyClassifier;

/// Answers `analyze_safety` through the content-safety classifier.
///
/// Severity maps to `green` (≤ 1), `yellow` (2) or `red`, with
/// `safety_score = max(0, 95 - 25 * severity)` where higher is safer. It is
/// not the risk `score` a review verdict carries. Without a classifier, or
/// when it fails, the answer is the conservative `yellow` default.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeSafetyTool {
    classifier: Option<Arc<dyn SafetyClassifier>>,
}

impl AnalyzeSafetyTool {
    pub fn new(classifier: Option<Arc<dyn SafetyClassifier>>) -> Self {
        Self { classifier }
    }

    #[must_use]
    pub fn label_for(severity: u8) -> &'static str {
        match severity {
            0 | 1 => "green",
            2 => "yellow",
            _ => "red",
        }
    }

    #[must_use]
    pub fn safety_score_for(severity: u8) -> u8 {
        let penalty = 25 * u32::from(severity);
        u8::try_from(95u32.saturating_sub(penalty)).unwrap_or(0)
    }
}

#[async_trait]
impl ToolHandler for AnalyzeSafetyTool {
    fn kind(&self) -> ToolKind {
        ToolKind::AnalyzeSafety
    }

    async fn call(&self, args: &Value) -> anyhow::Result<Value> {
        let classifier = self
            .classifier
            .as_ref()
            .ok_or_else(|| anyhow!("no safety classifier configured"))?;
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("analyze_safety called without text"))?;

        let report = classifier.analyze(text).await?;
        let sev = report.max_severity();
        Ok(json!({
            "label": Self::label_for(sev),
            "safety_score": Self::safety_score_for(sev),
            "sev": sev,
            "categories": report.categories,
            "source": "classifier",
        }))
    }

    fn fallback(&self) -> Value {
        json!({"label": "yellow", "safety_score": 60, "source": "default"})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::SeverityReport;

    #[derive(Debug)]
    struct Fixed(u8);

    #[async_trait]
    impl SafetyClassifier for Fixed {
        async fn analyze(&self, _text: &str) -> anyhow::Result<SeverityReport> {
            Ok(SeverityReport::from_pairs([("Hate", 0), ("Sexual", self.0)]))
        }
    }

    #[test]
    fn severity_mapping() {
        assert_eq!(AnalyzeSafetyTool::label_for(0), "green");
        assert_eq!(AnalyzeSafetyTool::label_for(1), "green");
        assert_eq!(AnalyzeSafetyTool::label_for(2), "yellow");
        assert_eq!(AnalyzeSafetyTool::label_for(4), "red");
        assert_eq!(AnalyzeSafetyTool::safety_score_for(0), 95);
        assert_eq!(AnalyzeSafetyTool::safety_score_for(2), 45);
        assert_eq!(AnalyzeSafetyTool::safety_score_for(4), 0);
        assert_eq!(AnalyzeSafetyTool::safety_score_for(6), 0);
    }

    #[tokio::test]
    async fn classifier_result_is_mapped() {
        let classifier: Arc<dyn SafetyClassifier> = Arc::new(Fixed(2));
        let tool = AnalyzeSafetyTool::new(Some(classifier));
        let out = tool.call(&json!({"text": "hello"})).await.unwrap();
        assert_eq!(out["label"], "yellow");
        assert_eq!(out["safety_score"], 45);
        assert!(out.get("score").is_none());
        assert_eq!(out["source"], "classifier");
    }

    #[tokio::test]
    async fn missing_classifier_answers_conservative_default() {
        let tool = AnalyzeSafetyTool::default();
        assert!(tool.call(&json!({"text": "hello"})).await.is_err());
        assert_eq!(
            tool.fallback(),
            json!({"label": "yellow", "safety_score": 60, "source": "default"})
        );
    }
}
