//! Gating of review verdicts and the bounded retry loop built on it.

pub mod gate;
pub mod retry;

pub use gate::{DEFAULT_REVIEW_THRESHOLD, GateDecision, QualityGate};
pub use retry::{DEFAULT_MAX_ITERATIONS, RetryLoop, RetryOutcome};
