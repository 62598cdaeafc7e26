use super::{reading_value, CheckOutcome, EvalContext};
use fieldmon_common::types::AlertRule;

/// Strict comparison against a bound. A value equal to the bound never
/// violates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    GreaterThan,
    LessThan,
}

impl CompareOp {
    pub fn check(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreaterThan => write!(f, "above"),
            Self::LessThan => write!(f, "below"),
        }
    }
}

pub fn above(rule: &AlertRule, ctx: &EvalContext<'_>) -> CheckOutcome {
    compare(rule, ctx, CompareOp::GreaterThan)
}

pub fn below(rule: &AlertRule, ctx: &EvalContext<'_>) -> CheckOutcome {
    compare(rule, ctx, CompareOp::LessThan)
}

fn compare(rule: &AlertRule, ctx: &EvalContext<'_>, op: CompareOp) -> CheckOutcome {
    let (_, value) = match reading_value(rule, ctx) {
        Ok(found) => found,
        Err(no_data) => return no_data,
    };
    let Some(threshold) = rule.threshold_value else {
        return CheckOutcome::no_data("rule has no threshold_value");
    };

    if op.check(value, threshold) {
        CheckOutcome::violated(
            Some(value),
            format!(
                "{} = {value:.2} is {op} threshold {threshold:.2}",
                rule.variable_key
            ),
        )
    } else {
        CheckOutcome::clear(Some(value), format!("{} = {value:.2}", rule.variable_key))
    }
}

/// Violated when the value leaves `[threshold_min, threshold_max]`.
pub fn range(rule: &AlertRule, ctx: &EvalContext<'_>) -> CheckOutcome {
    let (_, value) = match reading_value(rule, ctx) {
        Ok(found) => found,
        Err(no_data) => return no_data,
    };
    let (Some(min), Some(max)) = (rule.threshold_min, rule.threshold_max) else {
        return CheckOutcome::no_data("rule has no threshold_min/threshold_max");
    };

    if CompareOp::LessThan.check(value, min) || CompareOp::GreaterThan.check(value, max) {
        CheckOutcome::violated(
            Some(value),
            format!(
                "{} = {value:.2} is outside range [{min:.2}, {max:.2}]",
                rule.variable_key
            ),
        )
    } else {
        CheckOutcome::clear(Some(value), format!("{} = {value:.2}", rule.variable_key))
    }
}
