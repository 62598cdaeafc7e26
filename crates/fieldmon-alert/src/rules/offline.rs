use super::{CheckOutcome, EvalContext};
use fieldmon_common::types::AlertRule;

/// Violated when the device has been silent for longer than
/// `time_window_minutes`. A device that never reported counts from its
/// creation time.
pub fn evaluate(rule: &AlertRule, ctx: &EvalContext<'_>) -> CheckOutcome {
    let Some(device) = ctx.device else {
        return CheckOutcome::no_data("device record unavailable");
    };
    let Some(window) = rule.time_window() else {
        return CheckOutcome::no_data("rule has no time_window_minutes");
    };

    let (reference, label) = match device.last_seen_at {
        Some(seen) => (seen, "last contact"),
        None => (device.created_at, "registration (never reported)"),
    };
    let silent = ctx.now - reference;
    let silent_minutes = silent.num_milliseconds() as f64 / 60_000.0;

    if silent > window {
        CheckOutcome::violated(
            Some(silent_minutes),
            format!(
                "no contact for {silent_minutes:.1} min since {label} (window {} min)",
                window.num_minutes()
            ),
        )
    } else {
        CheckOutcome::clear(
            Some(silent_minutes),
            format!("silent for {silent_minutes:.1} min"),
        )
    }
}
