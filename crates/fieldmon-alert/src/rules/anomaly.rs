use super::{reading_value, CheckOutcome, EvalContext};
use chrono::Duration;
use fieldmon_common::types::AlertRule;

/// Probability cut-off used when the rule leaves `threshold_value` unset.
pub const DEFAULT_ANOMALY_PROBABILITY: f64 = 0.9;

/// History window used when the rule leaves `time_window_minutes` unset.
pub const DEFAULT_ANOMALY_WINDOW_MINUTES: i64 = 60;

/// Scores how anomalous the latest value of a series is.
///
/// Implementations may wrap an external model; this crate only applies the
/// threshold decision to the returned probability.
pub trait AnomalyScorer: Send + Sync {
    /// Returns a probability in `[0, 1]` that the last element of `series`
    /// is anomalous, or `None` when the series is too short to judge.
    fn score(&self, variable_key: &str, series: &[f64]) -> Option<f64>;
}

/// Statistical scorer: z-score of the last value against the preceding
/// values, squashed into `[0, 1)` as `1 - exp(-z / scale)`.
#[derive(Debug, Clone)]
pub struct ZScoreScorer {
    pub min_samples: usize,
    pub scale: f64,
}

impl Default for ZScoreScorer {
    fn default() -> Self {
        Self {
            min_samples: 5,
            scale: 1.0,
        }
    }
}

impl AnomalyScorer for ZScoreScorer {
    fn score(&self, _variable_key: &str, series: &[f64]) -> Option<f64> {
        let (last, prior) = series.split_last()?;
        if prior.len() < self.min_samples.max(2) {
            return None;
        }

        let n = prior.len() as f64;
        let mean = prior.iter().sum::<f64>() / n;
        let variance = prior.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        if std_dev < f64::EPSILON {
            // Flat history: any deviation at all is maximally surprising
            return Some(if (last - mean).abs() < f64::EPSILON {
                0.0
            } else {
                1.0
            });
        }

        let z = (last - mean).abs() / std_dev;
        Some(1.0 - (-z / self.scale).exp())
    }
}

pub fn evaluate(rule: &AlertRule, ctx: &EvalContext<'_>) -> CheckOutcome {
    let (reading, current) = match reading_value(rule, ctx) {
        Ok(found) => found,
        Err(no_data) => return no_data,
    };
    let Some(scorer) = ctx.scorer else {
        return CheckOutcome::no_data("no anomaly scorer configured");
    };

    let window = rule
        .time_window()
        .unwrap_or_else(|| Duration::minutes(DEFAULT_ANOMALY_WINDOW_MINUTES));
    let cutoff = reading.timestamp - window;
    let mut series: Vec<f64> = ctx
        .history
        .iter()
        .filter(|r| r.timestamp >= cutoff && r.timestamp <= reading.timestamp)
        .filter_map(|r| r.numeric(&rule.variable_key).ok())
        .collect();
    series.push(current);

    let Some(probability) = scorer.score(&rule.variable_key, &series) else {
        return CheckOutcome::insufficient_history(format!(
            "{} samples of {} are not enough to score",
            series.len(),
            rule.variable_key
        ));
    };
    let limit = rule.threshold_value.unwrap_or(DEFAULT_ANOMALY_PROBABILITY);

    if probability > limit {
        CheckOutcome::violated(
            Some(current),
            format!(
                "{} = {current:.2} scored anomalous (p={probability:.2} > {limit:.2})",
                rule.variable_key
            ),
        )
    } else {
        CheckOutcome::clear(Some(current), format!("anomaly p={probability:.2}"))
    }
}
