use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{ToolHandler, ToolKind};
use crate::providers::ContextProvider;

/// Answers `fetch_context` from the request's own subject context, enriched
/// with the provider profile when one is configured.
#[derive(Debug, Clone)]
pub struct FetchContextTool {
    subject_id: String,
    base: Map<String, Value>,
    provider: Option<Arc<dyn ContextProvider>>,
}

impl FetchContextTool {
    /// `base` is the subject context supplied with the request; non-object
    /// values are treated as empty.
    pub fn new(
        subject_id: impl Into<String>,
        base: Value,
        provider: Option<Arc<dyn ContextProvider>>,
    ) -> Self {
        let base = match base {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            subject_id: subject_id.into(),
            base,
            provider,
        }
    }

    fn shape(subject_id: &str, fields: &Map<String, Value>) -> Value {
        let field = |key: &str, default: Value| fields.get(key).cloned().unwrap_or(default);
        json!({
            "subject_id": subject_id,
            "segment": field("segment", json!("UNKNOWN")),
            "last_active": field("last_active", Value::Null),
            "total_spent": field("total_spent", json!(0)),
            "message_count": field("message_count", json!(0)),
            "preferences": field("preferences", json!({})),
        })
    }
}

#[async_trait]
impl ToolHandler for FetchContextTool {
    fn kind(&self) -> ToolKind {
        ToolKind::FetchContext
    }

    async fn call(&self, args: &Value) -> anyhow::Result<Value> {
        let subject_id = args
            .get("subject_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.subject_id);

        let mut fields = self.base.clone();
        if let Some(provider) = &self.provider {
            if let Value::Object(profile) = provider.fetch_profile(subject_id).await? {
                fields.extend(profile);
            }
        }
        Ok(Self::shape(subject_id, &fields))
    }

    /// The request context alone.
    fn fallback(&self) -> Value {
        Self::shape(&self.subject_id, &self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[derive(Debug)]
    struct StaticProfile(Value);

    #[async_trait]
    impl ContextProvider for StaticProfile {
        async fn fetch_profile(&self, _subject_id: &str) -> anyhow::Result<Value> {
            Ok(self.0.clone())
        }
    }

    #[derive(Debug)]
    struct Down;

    #[async_trait]
    impl ContextProvider for Down {
        async fn fetch_profile(&self, _subject_id: &str) -> anyhow::Result<Value> {
            Err(anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn request_context_only() {
        let tool = FetchContextTool::new("s1", json!({"segment": "VIP", "total_spent": 120}), None);
        let out = tool.call(&json!({})).await.unwrap();
        assert_eq!(out["subject_id"], "s1");
        assert_eq!(out["segment"], "VIP");
        assert_eq!(out["total_spent"], 120);
        assert_eq!(out["message_count"], 0);
        assert_eq!(out["preferences"], json!({}));
    }

    #[tokio::test]
    async fn provider_profile_overrides_request_context() {
        let provider: Arc<dyn ContextProvider> =
            Arc::new(StaticProfile(json!({"segment": "WHALE", "message_count": 7})));
        let tool = FetchContextTool::new("s1", json!({"segment": "VIP"}), Some(provider));
        let out = tool.call(&json!({"subject_id": "s2"})).await.unwrap();
        assert_eq!(out["subject_id"], "s2");
        assert_eq!(out["segment"], "WHALE");
        assert_eq!(out["message_count"], 7);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_request_context() {
        let provider: Arc<dyn ContextProvider> = Arc::new(Down);
        let tool = FetchContextTool::new("s1", json!({"segment": "CASUAL"}), Some(provider));
        assert!(tool.call(&json!({})).await.is_err());
        assert_eq!(tool.fallback()["segment"], "CASUAL");
    }
}
