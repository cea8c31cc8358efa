use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ToolHandler, ToolKind};

const BASE_PRICE: f64 = 9.99;
const FLOOR_PRICE: f64 = 4.99;

/// Heuristic price for paid content.
///
/// `price = max(4.99, 9.99 * segment multiplier + content type addition)`,
/// rounded to cents. Missing arguments default to the request's segment and
/// content type.
#[derive(Debug, Clone)]
pub struct ComputePriceTool {
    default_segment: String,
    default_content_type: String,
}

impl Default for ComputePriceTool {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl ComputePriceTool {
    pub fn new(default_segment: Option<&str>, default_content_type: Option<&str>) -> Self {
        Self {
            default_segment: default_segment.unwrap_or("UNKNOWN").to_uppercase(),
            default_content_type: default_content_type.unwrap_or("generic").to_lowercase(),
        }
    }

    fn segment_multiplier(segment: &str) -> f64 {
        match segment {
            "WHALE" => 2.5,
            "VIP" => 1.8,
            "CASUAL" => 1.1,
            "CHURN_RISK" => 0.9,
            _ => 1.0,
        }
    }

    fn content_type_addition(content_type: &str) -> f64 {
        match content_type {
            "photo" => 0.0,
            "video" => 5.0,
            "bundle" => 8.0,
            "custom" => 12.0,
            _ => 3.0,
        }
    }

    /// Price for a normalized segment and content type.
    #[must_use]
    pub fn price(segment: &str, content_type: &str) -> f64 {
        let raw = BASE_PRICE * Self::segment_multiplier(segment) + Self::content_type_addition(content_type);
        (raw.max(FLOOR_PRICE) * 100.0).round() / 100.0
    }

    fn quote(&self, segment: &str, content_type: &str) -> Value {
        json!({
            "price": Self::price(segment, content_type),
            "currency": "USD",
            "segment": segment,
            "content_type": content_type,
        })
    }
}

fn non_empty<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

#[async_trait]
impl ToolHandler for ComputePriceTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ComputePrice
    }

    async fn call(&self, args: &Value) -> anyhow::Result<Value> {
        let segment = non_empty(args, "segment")
            .map(str::to_uppercase)
            .unwrap_or_else(|| self.default_segment.clone());
        let content_type = non_empty(args, "content_type")
            .map(str::to_lowercase)
            .unwrap_or_else(|| self.default_content_type.clone());
        Ok(self.quote(&segment, &content_type))
    }

    fn fallback(&self) -> Value {
        self.quote(&self.default_segment, &self.default_content_type)
    }
}
