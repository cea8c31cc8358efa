//! Typed payloads produced by stages.
//!
//! Every [`SchemaKind`] can do two things with raw model text:
//!
//! - [`SchemaKind::parse`] strictly, yielding the normalized payload
//! - [`SchemaKind::fallback`] unconditionally, wrapping the text into a
//!   minimal payload that still validates
//!
//! so a stage never fails just because the model answered in prose.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::actions::ExecutionReport;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("empty model output")]
    Empty,

    #[error("not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("field '{field}' is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl SchemaError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Triage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Scheduling,
    Billing,
    Support,
    Sales,
    Analytics,
    #[serde(other)]
    General,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    High,
    Urgent,
    #[serde(other)]
    Medium,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Sales,
    Success,
    Billing,
    Ops,
    #[serde(other)]
    Support,
}

fn default_sla() -> u32 {
    60
}

/// Classification of an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Triage {
    pub intent: Intent,
    pub priority: Priority,
    #[serde(default = "default_sla")]
    pub sla_minutes: u32,
    pub route: Route,
}

impl Default for Triage {
    fn default() -> Self {
        Self {
            intent: Intent::General,
            priority: Priority::Medium,
            sla_minutes: default_sla(),
            route: Route::Support,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One action of a plan. Fields beyond `action` and `data` are carried along.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanAction {
    pub action: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl PlanAction {
    pub fn send_message(text: impl Into<String>) -> Self {
        Self {
            action: "send_message".to_string(),
            data: json!({ "text": text.into() }),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Plan {
    pub plan: Vec<PlanAction>,
}

impl Plan {
    fn validate(&self) -> Result<(), SchemaError> {
        for step in &self.plan {
            if step.action.trim().is_empty() {
                return Err(SchemaError::invalid("plan.action", "must not be empty"));
            }
            if !step.data.is_object() {
                return Err(SchemaError::invalid("plan.data", "must be an object"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

fn half() -> f64 {
    0.5
}

/// Generated outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    pub draft: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default = "half")]
    pub confidence: f64,
    #[serde(default)]
    pub upsell_opportunity: bool,
    #[serde(default = "half")]
    pub estimated_engagement: f64,
}

impl Draft {
    fn freeform(raw: &str) -> Self {
        Self {
            draft: raw.to_string(),
            rationale: "freeform".to_string(),
            confidence: 0.5,
            upsell_opportunity: false,
            estimated_engagement: 0.5,
        }
    }

    fn normalize(mut self) -> Self {
        self.confidence = unit_interval(self.confidence);
        self.estimated_engagement = unit_interval(self.estimated_engagement);
        self
    }
}

fn unit_interval(v: f64) -> f64 {
    if v.is_nan() { 0.5 } else { v.clamp(0.0, 1.0) }
}

// ---------------------------------------------------------------------------
// Review verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Green,
    Yellow,
    Red,
}

impl TryFrom<String> for Label {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "green" => Ok(Self::Green),
            "yellow" => Ok(Self::Yellow),
            "red" => Ok(Self::Red),
            other => Err(format!("unknown label '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawReason {
    Text(String),
    Record {
        #[serde(default)]
        rule_id: Option<String>,
        #[serde(default)]
        severity: Option<String>,
        #[serde(default, alias = "message")]
        reason: Option<String>,
    },
}

/// One reason or infraction attached to a verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "RawReason")]
pub struct Reason {
    pub rule_id: Option<String>,
    pub severity: Option<Severity>,
    pub reason: Option<String>,
}

impl From<RawReason> for Reason {
    fn from(raw: RawReason) -> Self {
        match raw {
            RawReason::Text(text) => Self {
                reason: Some(text),
                ..Self::default()
            },
            RawReason::Record {
                rule_id,
                severity,
                reason,
            } => Self {
                rule_id,
                severity: severity.as_deref().and_then(Severity::parse),
                reason,
            },
        }
    }
}

impl Reason {
    pub fn text(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn high(rule_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule_id: Some(rule_id.into()),
            severity: Some(Severity::High),
            reason: Some(reason.into()),
        }
    }
}

/// Reads any JSON number and clamps it to `[0, 100]`.
fn clamped_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.filter(|v| !v.is_nan()).map(clamp_score))
}

/// Clamp any numeric score to `[0, 100]`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn clamp_score(v: f64) -> u8 {
    v.clamp(0.0, 100.0).round() as u8
}

/// Safety or quality judgement produced by a review stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewVerdict {
    pub label: Label,
    #[serde(default, deserialize_with = "clamped_score")]
    pub score: Option<u8>,
    #[serde(default, alias = "infractions")]
    pub reasons: Vec<Reason>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ReviewVerdict {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            score: None,
            reasons: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(clamp_score(score));
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: Reason) -> Self {
        self.reasons.push(reason);
        self
    }

    pub fn high_severity_count(&self) -> usize {
        self.reasons
            .iter()
            .filter(|r| r.severity == Some(Severity::High))
            .count()
    }

    /// Conservative verdict used when review output cannot be parsed.
    pub fn unparsed(raw: &str) -> Self {
        let mut verdict = Self::new(Label::Yellow);
        if !raw.trim().is_empty() {
            verdict.reasons.push(Reason::text(raw.trim()));
        }
        verdict
    }
}

// ---------------------------------------------------------------------------
// Schema dispatch
// ---------------------------------------------------------------------------

/// Expected payload shape of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Triage,
    Plan,
    Draft,
    Verdict,
    Execution,
    /// Any JSON object, e.g. a fetched profile.
    Object,
}

impl SchemaKind {
    /// Parse raw model text strictly into a normalized payload.
    pub fn parse(self, raw: &str) -> Result<Value, SchemaError> {
        let body = strip_code_fence(raw);
        if body.is_empty() {
            return Err(SchemaError::Empty);
        }
        let value: Value = serde_json::from_str(body)?;
        self.normalize(value)
    }

    /// Normalize an already-decoded payload, rejecting shapes that do not fit.
    pub fn normalize(self, value: Value) -> Result<Value, SchemaError> {
        Ok(match self {
            Self::Triage => to_value(serde_json::from_value::<Triage>(value)?)?,
            Self::Plan => {
                // A bare list of actions is accepted as the plan itself.
                let value = match value {
                    list @ Value::Array(_) => json!({ "plan": list }),
                    other => other,
                };
                let plan: Plan = serde_json::from_value(value)?;
                plan.validate()?;
                to_value(plan)?
            }
            Self::Draft => to_value(serde_json::from_value::<Draft>(value)?.normalize())?,
            Self::Verdict => to_value(serde_json::from_value::<ReviewVerdict>(value)?)?,
            Self::Execution => to_value(serde_json::from_value::<ExecutionReport>(value)?)?,
            Self::Object => {
                if !value.is_object() {
                    return Err(SchemaError::invalid("$", "expected a JSON object"));
                }
                value
            }
        })
    }

    /// Minimal valid payload synthesized from raw text.
    pub fn fallback(self, raw: &str) -> Value {
        let text = strip_code_fence(raw);
        let payload = match self {
            Self::Triage => serde_json::to_value(Triage::default()),
            Self::Plan => serde_json::to_value(Plan {
                plan: vec![PlanAction::send_message(text)],
            }),
            Self::Draft => serde_json::to_value(Draft::freeform(text)),
            Self::Verdict => serde_json::to_value(ReviewVerdict::unparsed(text)),
            Self::Execution => serde_json::to_value(ExecutionReport::default()),
            Self::Object => Ok(empty_object()),
        };
        // Serializing these plain structs cannot fail; keep a valid object
        // regardless.
        payload.unwrap_or_else(|_| empty_object())
    }

    /// Whether `value` already satisfies this schema.
    pub fn validates(self, value: &Value) -> bool {
        self.normalize(value.clone()).is_ok()
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, SchemaError> {
    Ok(serde_json::to_value(value)?)
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prose_plan_becomes_single_send_message() {
        let raw = "just some prose";
        assert!(SchemaKind::Plan.parse(raw).is_err());
        assert_eq!(
            SchemaKind::Plan.fallback(raw),
            json!({"plan": [{"action": "send_message", "data": {"text": "just some prose"}}]})
        );
    }

    #[test]
    fn fallbacks_validate_against_their_schema() {
        let kinds = [
            SchemaKind::Triage,
            SchemaKind::Plan,
            SchemaKind::Draft,
            SchemaKind::Verdict,
            SchemaKind::Execution,
            SchemaKind::Object,
        ];
        for raw in ["just some prose", "{\"broken\": ", "[1, 2", "42"] {
            for kind in kinds {
                let fallback = kind.fallback(raw);
                assert!(kind.validates(&fallback), "{kind:?} fallback for {raw:?}: {fallback}");
            }
        }
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let raw = "```json\n{\"intent\": \"billing\", \"priority\": \"high\", \"sla_minutes\": 15, \"route\": \"billing\"}\n```";
        let triage: Triage = serde_json::from_value(SchemaKind::Triage.parse(raw).unwrap()).unwrap();
        assert_eq!(triage.intent, Intent::Billing);
        assert_eq!(triage.priority, Priority::High);
        assert_eq!(triage.sla_minutes, 15);
        assert_eq!(strip_code_fence("```\nplain\n```"), "plain");
        assert_eq!(strip_code_fence("  no fence "), "no fence");
    }

    #[test]
    fn triage_fallback_is_fixed_default() {
        assert_eq!(
            SchemaKind::Triage.fallback("who knows"),
            json!({"intent": "general", "priority": "medium", "sla_minutes": 60, "route": "support"})
        );
    }

    #[test]
    fn unknown_triage_values_degrade_per_field() {
        let value = SchemaKind::Triage
            .parse(r#"{"intent": "gossip", "priority": "whenever", "route": "billing"}"#)
            .unwrap();
        assert_eq!(value["intent"], "general");
        assert_eq!(value["priority"], "medium");
        assert_eq!(value["sla_minutes"], 60);
        assert_eq!(value["route"], "billing");
    }

    #[test]
    fn plan_keeps_extra_fields_and_defaults_data() {
        let value = SchemaKind::Plan
            .parse(r#"{"plan": [{"action": "tag", "priority": 2}, {"action": "send_message", "data": {"text": "hi"}}]}"#)
            .unwrap();
        assert_eq!(value["plan"][0]["data"], json!({}));
        assert_eq!(value["plan"][0]["priority"], 2);
        assert_eq!(value["plan"][1]["data"]["text"], "hi");
    }

    #[test]
    fn plan_rejects_empty_action() {
        assert!(SchemaKind::Plan.parse(r#"{"plan": [{"action": " "}]}"#).is_err());
        assert!(SchemaKind::Plan.parse(r#"{"plan": [{"action": "x", "data": 3}]}"#).is_err());
    }

    #[test]
    fn draft_fallback_wraps_raw_text() {
        let value = SchemaKind::Draft.fallback("hey there");
        assert_eq!(value["draft"], "hey there");
        assert_eq!(value["rationale"], "freeform");
        assert_eq!(value["confidence"], 0.5);
        assert_eq!(value["upsell_opportunity"], false);
    }

    #[test]
    fn draft_scores_are_clamped() {
        let value = SchemaKind::Draft
            .parse(r#"{"draft": "hi", "confidence": 1.7, "estimated_engagement": -2}"#)
            .unwrap();
        assert_eq!(value["confidence"], 1.0);
        assert_eq!(value["estimated_engagement"], 0.0);
        assert!(SchemaKind::Draft.parse(r#"{"rationale": "no draft"}"#).is_err());
    }

    #[test]
    fn verdict_accepts_infractions_and_clamps_score() {
        let value = SchemaKind::Verdict
            .parse(
                r#"{"label": "RED", "score": 140.2, "infractions": [
                    {"rule_id": "tos-1", "severity": "high", "reason": "explicit"},
                    "too pushy",
                    {"severity": "catastrophic"}
                ], "recommendations": ["soften tone"]}"#,
            )
            .unwrap();
        let verdict: ReviewVerdict = serde_json::from_value(value).unwrap();
        assert_eq!(verdict.label, Label::Red);
        assert_eq!(verdict.score, Some(100));
        assert_eq!(verdict.reasons.len(), 3);
        assert_eq!(verdict.high_severity_count(), 1);
        assert_eq!(verdict.reasons[1].reason.as_deref(), Some("too pushy"));
        assert_eq!(verdict.reasons[2].severity, None);
        assert_eq!(verdict.recommendations, vec!["soften tone".to_string()]);
    }

    #[test]
    fn negative_score_clamps_to_zero() {
        let verdict: ReviewVerdict =
            serde_json::from_value(json!({"label": "green", "score": -12})).unwrap();
        assert_eq!(verdict.score, Some(0));
    }

    #[test]
    fn verdict_fallback_is_yellow_without_score() {
        let verdict: ReviewVerdict =
            serde_json::from_value(SchemaKind::Verdict.fallback("looks fine to me")).unwrap();
        assert_eq!(verdict.label, Label::Yellow);
        assert_eq!(verdict.score, None);
        assert_eq!(verdict.reasons, vec![Reason::text("looks fine to me")]);
    }

    #[test]
    fn object_schema_rejects_non_objects() {
        assert!(SchemaKind::Object.parse("[1]").is_err());
        assert_eq!(SchemaKind::Object.parse(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
    }
}
