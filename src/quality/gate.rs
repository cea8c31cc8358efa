//! Review gate: verdict to accept/escalate decision.
//!
//! `score` on a verdict is a risk score: 0 is safe, 100 must be blocked.

use serde::{Deserialize, Serialize};

use crate::stage::schema::{Label, ReviewVerdict};

pub const DEFAULT_REVIEW_THRESHOLD: u8 = 70;

/// Outcome of gating one verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateDecision {
    pub accept: bool,
    pub escalate: bool,
    pub normalized_score: u8,
}

/// Converts a [`ReviewVerdict`] into an accept/escalate decision.
///
/// - an explicit score is used as is (already clamped to `[0, 100]`)
/// - otherwise the label sets a baseline (green 20, yellow 60, red 90) and
///   each high-severity reason adds 5, capped at +10
///
/// Escalation happens at or above the threshold, and always for `red`.
/// Acceptance follows the label alone: a `green` verdict is accepted even
/// when its score also escalates it for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityGate {
    review_threshold: u8,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(DEFAULT_REVIEW_THRESHOLD)
    }
}

impl QualityGate {
    pub fn new(review_threshold: u8) -> Self {
        Self {
            review_threshold: review_threshold.min(100),
        }
    }

    pub fn review_threshold(&self) -> u8 {
        self.review_threshold
    }

    #[must_use]
    pub fn baseline(label: Label) -> u8 {
        match label {
            Label::Green => 20,
            Label::Yellow => 60,
            Label::Red => 90,
        }
    }

    #[must_use]
    pub fn normalized_score(verdict: &ReviewVerdict) -> u8 {
        if let Some(score) = verdict.score {
            return score.min(100);
        }
        let bump = verdict.high_severity_count().saturating_mul(5).min(10);
        // `bump` is at most 10.
        let bump = u8::try_from(bump).unwrap_or(10);
        Self::baseline(verdict.label).saturating_add(bump).min(100)
    }

    pub fn decide(&self, verdict: &ReviewVerdict) -> GateDecision {
        let normalized_score = Self::normalized_score(verdict);
        let escalate = normalized_score >= self.review_threshold || verdict.label == Label::Red;
        GateDecision {
            accept: verdict.label == Label::Green,
            escalate,
            normalized_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::schema::Reason;

    fn verdict(label: Label, highs: usize) -> ReviewVerdict {
        (0..highs).fold(ReviewVerdict::new(label), |v, i| {
            v.with_reason(Reason::high(format!("rule-{i}"), "bad"))
        })
    }

    #[test]
    fn explicit_scores_pass_through() {
        let gate = QualityGate::default();
        for s in 0..=100u8 {
            let v = ReviewVerdict::new(Label::Yellow).with_score(f64::from(s));
            assert_eq!(gate.decide(&v).normalized_score, s);
        }
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let gate = QualityGate::default();
        let high = ReviewVerdict::new(Label::Green).with_score(250.0);
        let low = ReviewVerdict::new(Label::Green).with_score(-3.0);
        assert_eq!(gate.decide(&high).normalized_score, 100);
        assert_eq!(gate.decide(&low).normalized_score, 0);
    }

    #[test]
    fn red_without_score_lands_on_90_95_or_100() {
        let gate = QualityGate::default();
        let scores: Vec<u8> = (0..5)
            .map(|n| gate.decide(&verdict(Label::Red, n)).normalized_score)
            .collect();
        assert_eq!(scores, vec![90, 95, 100, 100, 100]);
    }

    #[test]
    fn baselines_by_label() {
        let gate = QualityGate::default();
        assert_eq!(gate.decide(&verdict(Label::Green, 0)).normalized_score, 20);
        assert_eq!(gate.decide(&verdict(Label::Yellow, 0)).normalized_score, 60);
        assert_eq!(gate.decide(&verdict(Label::Yellow, 1)).normalized_score, 65);
    }

    #[test]
    fn red_always_escalates() {
        let gate = QualityGate::default();
        let quiet_red = ReviewVerdict::new(Label::Red).with_score(5.0);
        let decision = gate.decide(&quiet_red);
        assert!(decision.escalate);
        assert!(!decision.accept);
    }

    #[test]
    fn escalation_is_monotonic_in_score() {
        for threshold in [0u8, 1, 50, 70, 99, 100] {
            let gate = QualityGate::new(threshold);
            for label in [Label::Green, Label::Yellow, Label::Red] {
                let mut escalated = false;
                for s in 0..=100u8 {
                    let decision = gate.decide(&ReviewVerdict::new(label).with_score(f64::from(s)));
                    assert!(!escalated || decision.escalate, "threshold {threshold} label {label} score {s}");
                    escalated = decision.escalate;
                }
            }
        }
    }

    #[test]
    fn green_is_accepted_whatever_its_score() {
        let gate = QualityGate::default();
        let decision = gate.decide(&verdict(Label::Green, 0));
        assert!(decision.accept);
        assert!(!decision.escalate);

        let high_green = ReviewVerdict::new(Label::Green).with_score(95.0);
        let decision = gate.decide(&high_green);
        assert!(decision.accept);
        assert!(decision.escalate);
        assert_eq!(decision.normalized_score, 95);
    }

    #[test]
    fn yellow_is_never_accepted() {
        let gate = QualityGate::default();
        let decision = gate.decide(&ReviewVerdict::new(Label::Yellow).with_score(10.0));
        assert!(!decision.accept);
        assert!(!decision.escalate);
    }
}
