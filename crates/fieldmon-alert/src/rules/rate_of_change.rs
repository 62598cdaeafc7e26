use super::{reading_value, CheckOutcome, EvalContext};
use fieldmon_common::types::AlertRule;

/// Compares the current value with the latest earlier reading of the same
/// device inside `time_window_minutes`.
///
/// Violated when `|current - previous| / elapsed_minutes > threshold_value`.
/// Without such a reading the result is insufficient history, never a
/// violation.
pub fn evaluate(rule: &AlertRule, ctx: &EvalContext<'_>) -> CheckOutcome {
    let (reading, current) = match reading_value(rule, ctx) {
        Ok(found) => found,
        Err(no_data) => return no_data,
    };
    let (Some(window), Some(threshold)) = (rule.time_window(), rule.threshold_value) else {
        return CheckOutcome::no_data("rule has no time_window_minutes/threshold_value");
    };

    let cutoff = reading.timestamp - window;
    let previous = ctx
        .history
        .iter()
        .filter(|r| r.timestamp < reading.timestamp && r.timestamp >= cutoff)
        .filter_map(|r| r.numeric(&rule.variable_key).ok().map(|v| (r, v)))
        .max_by_key(|(r, _)| r.timestamp);

    let Some((prev, prev_value)) = previous else {
        return CheckOutcome::insufficient_history(format!(
            "no earlier {} reading within {} min",
            rule.variable_key,
            window.num_minutes()
        ));
    };

    let elapsed_minutes = (reading.timestamp - prev.timestamp).num_milliseconds() as f64 / 60_000.0;
    if elapsed_minutes <= 0.0 {
        return CheckOutcome::insufficient_history("earlier reading has the same timestamp");
    }
    let rate = (current - prev_value).abs() / elapsed_minutes;

    if rate > threshold {
        CheckOutcome::violated(
            Some(current),
            format!(
                "{} changed from {prev_value:.2} to {current:.2} in {elapsed_minutes:.1} min \
                 ({rate:.2}/min, threshold {threshold:.2}/min)",
                rule.variable_key
            ),
        )
    } else {
        CheckOutcome::clear(
            Some(current),
            format!("{} rate {rate:.2}/min", rule.variable_key),
        )
    }
}
