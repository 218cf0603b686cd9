//! Range classifier.
//!
//! Classification is split into two pure steps so each can be tested alone:
//! [`resolve_range`] picks the effective band (point-specific limit first,
//! parameter default second) and [`classify`] places a value against it.
//! [`derive_alert`] turns a non-OKAY status into the alert that gets stored.

use chrono::{DateTime, Utc};

use crate::models::{
    AlertDraft, AlertReason, AlertSeverity, IdealRange, IdealStatus, ParameterLimit,
};

// ---

/// Resolve the range that applies to a measurement taken at `at`.
///
/// The active limit with the latest `effective_from` wins; an open start
/// sorts before any dated one. Without an active limit the parameter's
/// default band applies, which carries no critical thresholds.
pub fn resolve_range(
    limits: &[ParameterLimit],
    default: &IdealRange,
    at: DateTime<Utc>,
) -> IdealRange {
    // ---
    limits
        .iter()
        .filter(|limit| limit.is_active_at(at))
        .max_by_key(|limit| limit.effective_from)
        .map(|limit| limit.range)
        .unwrap_or_else(|| IdealRange::new(default.low, default.high))
}

/// Classify a value against a resolved range.
///
/// Returns `None` when there is no numeric value: such readings get no
/// status and never raise an alert.
pub fn classify(value: Option<f64>, range: &IdealRange) -> Option<IdealStatus> {
    // ---
    let v = value?;

    let status = match (range.low, range.high) {
        (Some(low), _) if v < low => {
            if range.critical_low.is_some_and(|c| v < c) {
                IdealStatus::Critical
            } else {
                IdealStatus::TooLow
            }
        }
        (_, Some(high)) if v > high => {
            if range.critical_high.is_some_and(|c| v > c) {
                IdealStatus::Critical
            } else {
                IdealStatus::TooHigh
            }
        }
        _ => IdealStatus::Okay,
    };
    Some(status)
}

/// Build the alert for a classified value, if the status warrants one.
pub fn derive_alert(status: IdealStatus, value: Option<f64>, range: &IdealRange) -> Option<AlertDraft> {
    // ---
    let (severity, reason) = match status {
        IdealStatus::Okay => return None,
        IdealStatus::TooLow => (AlertSeverity::Warning, AlertReason::TooLow),
        IdealStatus::TooHigh => (AlertSeverity::Warning, AlertReason::TooHigh),
        IdealStatus::Critical => (AlertSeverity::Critical, breach_direction(value, range)),
    };

    Some(AlertDraft {
        severity,
        reason,
        measured_value: value,
        expected_low: range.low,
        expected_high: range.high,
    })
}

fn breach_direction(value: Option<f64>, range: &IdealRange) -> AlertReason {
    match (value, range.low, range.high) {
        (Some(v), Some(low), _) if v < low => AlertReason::TooLow,
        (Some(v), _, Some(high)) if v > high => AlertReason::TooHigh,
        _ => AlertReason::OutOfRange,
    }
}
