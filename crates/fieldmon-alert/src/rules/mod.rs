//! One evaluator per [`CheckKind`].
//!
//! [`evaluate`] and [`validate`] match exhaustively on the kind, so adding a
//! kind fails to compile until every site handles it.

pub mod anomaly;
pub mod offline;
pub mod rate_of_change;
pub mod sensor_fault;
pub mod threshold;

use crate::error::RuleConfigError;
use anomaly::AnomalyScorer;
use chrono::{DateTime, Utc};
use fieldmon_common::types::{AlertRule, CheckKind, DeviceInfo, Reading, RuleScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Violated,
    Clear,
    /// The data needed by the check is absent or malformed.
    NoData,
    /// Not enough prior readings to decide.
    InsufficientHistory,
}

/// Result of running one rule against one evaluation context.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub verdict: Verdict,
    pub observed_value: Option<f64>,
    pub detail: String,
}

impl CheckOutcome {
    pub fn violated(observed_value: Option<f64>, detail: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Violated,
            observed_value,
            detail: detail.into(),
        }
    }

    pub fn clear(observed_value: Option<f64>, detail: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Clear,
            observed_value,
            detail: detail.into(),
        }
    }

    pub fn no_data(detail: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::NoData,
            observed_value: None,
            detail: detail.into(),
        }
    }

    pub fn insufficient_history(detail: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::InsufficientHistory,
            observed_value: None,
            detail: detail.into(),
        }
    }

    pub fn is_violated(&self) -> bool {
        self.verdict == Verdict::Violated
    }
}

/// Everything an evaluator may look at.
pub struct EvalContext<'a> {
    pub now: DateTime<Utc>,
    /// The triggering reading; absent on the sweep path.
    pub reading: Option<&'a Reading>,
    /// Earlier readings of the same device in arrival order, excluding `reading`.
    pub history: &'a [Reading],
    pub device: Option<&'a DeviceInfo>,
    pub scorer: Option<&'a dyn AnomalyScorer>,
}

impl<'a> EvalContext<'a> {
    /// Context for the sweep path: no reading, only the device record.
    pub fn for_device(device: &'a DeviceInfo, now: DateTime<Utc>) -> Self {
        Self {
            now,
            reading: None,
            history: &[],
            device: Some(device),
            scorer: None,
        }
    }
}

pub fn evaluate(rule: &AlertRule, ctx: &EvalContext<'_>) -> CheckOutcome {
    match rule.kind {
        CheckKind::Above => threshold::above(rule, ctx),
        CheckKind::Below => threshold::below(rule, ctx),
        CheckKind::Range => threshold::range(rule, ctx),
        CheckKind::RateOfChange => rate_of_change::evaluate(rule, ctx),
        CheckKind::DeviceOffline => offline::evaluate(rule, ctx),
        CheckKind::SensorFault => sensor_fault::evaluate(rule, ctx),
        CheckKind::Anomaly => anomaly::evaluate(rule, ctx),
    }
}

/// Checks the parameter combination required by the rule's kind.
///
/// Parameters that belong to other kinds are ignored.
pub fn validate(rule: &AlertRule) -> Result<(), RuleConfigError> {
    match &rule.scope {
        RuleScope::Device(id) | RuleScope::Location(id) if id.trim().is_empty() => {
            return Err(RuleConfigError::EmptyScope {
                rule_id: rule.id.clone(),
            });
        }
        _ => {}
    }

    match rule.kind {
        CheckKind::Above | CheckKind::Below => {
            require_key(rule)?;
            require_finite(rule, "threshold_value", rule.threshold_value)?;
        }
        CheckKind::Range => {
            require_key(rule)?;
            let min = require_finite(rule, "threshold_min", rule.threshold_min)?;
            let max = require_finite(rule, "threshold_max", rule.threshold_max)?;
            if min >= max {
                return Err(RuleConfigError::InvalidRange {
                    rule_id: rule.id.clone(),
                    min,
                    max,
                });
            }
        }
        CheckKind::RateOfChange => {
            require_key(rule)?;
            let rate = require_finite(rule, "threshold_value", rule.threshold_value)?;
            if rate < 0.0 {
                return Err(RuleConfigError::OutOfRange {
                    rule_id: rule.id.clone(),
                    field: "threshold_value",
                    value: rate,
                    expected: "a non-negative rate per minute",
                });
            }
            require_window(rule)?;
        }
        CheckKind::DeviceOffline => {
            require_window(rule)?;
        }
        CheckKind::SensorFault => {
            optional_unit(rule, "threshold_value", rule.threshold_value)?;
        }
        CheckKind::Anomaly => {
            require_key(rule)?;
            optional_unit(rule, "threshold_value", rule.threshold_value)?;
            if rule.time_window_minutes == Some(0) {
                return Err(RuleConfigError::NonPositiveWindow {
                    rule_id: rule.id.clone(),
                    kind: rule.kind,
                });
            }
        }
    }
    Ok(())
}

fn require_key(rule: &AlertRule) -> Result<(), RuleConfigError> {
    if rule.variable_key.trim().is_empty() {
        return Err(RuleConfigError::MissingVariableKey {
            rule_id: rule.id.clone(),
            kind: rule.kind,
        });
    }
    Ok(())
}

fn require_finite(
    rule: &AlertRule,
    field: &'static str,
    value: Option<f64>,
) -> Result<f64, RuleConfigError> {
    let value = value.ok_or_else(|| RuleConfigError::MissingParameter {
        rule_id: rule.id.clone(),
        kind: rule.kind,
        field,
    })?;
    if !value.is_finite() {
        return Err(RuleConfigError::NonFinite {
            rule_id: rule.id.clone(),
            field,
        });
    }
    Ok(value)
}

fn require_window(rule: &AlertRule) -> Result<(), RuleConfigError> {
    match rule.time_window_minutes {
        Some(m) if m > 0 => Ok(()),
        _ => Err(RuleConfigError::NonPositiveWindow {
            rule_id: rule.id.clone(),
            kind: rule.kind,
        }),
    }
}

fn optional_unit(
    rule: &AlertRule,
    field: &'static str,
    value: Option<f64>,
) -> Result<(), RuleConfigError> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(RuleConfigError::OutOfRange {
            rule_id: rule.id.clone(),
            field,
            value: v,
            expected: "a value in [0, 1]",
        }),
        _ => Ok(()),
    }
}

/// Numeric value of the rule's key in the triggering reading, or the
/// no-data outcome explaining why there is none.
pub(crate) fn reading_value<'a>(
    rule: &AlertRule,
    ctx: &EvalContext<'a>,
) -> Result<(&'a Reading, f64), CheckOutcome> {
    let reading = ctx
        .reading
        .ok_or_else(|| CheckOutcome::no_data("no triggering reading"))?;
    let value = reading
        .numeric(&rule.variable_key)
        .map_err(|reason| CheckOutcome::no_data(format!("{}: {reason}", rule.variable_key)))?;
    Ok((reading, value))
}
