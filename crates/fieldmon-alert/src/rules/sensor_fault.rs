use super::{CheckOutcome, EvalContext};
use fieldmon_common::types::{AlertRule, DEFAULT_QUALITY_FLOOR};

/// Violated when the reading's quality score is below the rule's floor
/// (`threshold_value`, default [`DEFAULT_QUALITY_FLOOR`]).
pub fn evaluate(rule: &AlertRule, ctx: &EvalContext<'_>) -> CheckOutcome {
    let Some(reading) = ctx.reading else {
        return CheckOutcome::no_data("no triggering reading");
    };
    let Some(quality) = reading.quality_score else {
        return CheckOutcome::no_data("reading carries no quality score");
    };
    let floor = rule.threshold_value.unwrap_or(DEFAULT_QUALITY_FLOOR);

    if quality < floor {
        CheckOutcome::violated(
            Some(quality),
            format!("quality score {quality:.2} is below floor {floor:.2}"),
        )
    } else {
        CheckOutcome::clear(Some(quality), format!("quality score {quality:.2}"))
    }
}
