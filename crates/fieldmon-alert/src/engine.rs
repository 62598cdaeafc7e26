use crate::cooldown::{CooldownEntry, CooldownTracker, Gate};
use crate::index::RuleIndex;
use crate::rules::anomaly::AnomalyScorer;
use crate::rules::{self, CheckOutcome, EvalContext, Verdict};
use crate::window::DeviceWindow;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fieldmon_common::types::{AlertEvent, AlertRule, DeliveryOutcome, DeviceInfo, Reading};
use std::collections::BTreeMap;
use std::sync::Arc;

/// History kept per device when no rule asks for a longer window.
pub const DEFAULT_HISTORY_RETENTION_MINUTES: i64 = 120;

/// How far ahead of the wall clock a reading may be dated and still be
/// evaluated.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// An accepted violation. The caller owns persisting `event`; if that
/// fails for good it must hand the firing back through
/// [`AlertEngine::release`].
#[derive(Debug, Clone)]
pub struct Firing {
    pub event: AlertEvent,
    pub rule: Arc<AlertRule>,
    pub previous: Option<CooldownEntry>,
}

#[derive(Debug, Default)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    pub fired: Vec<Firing>,
    pub suppressed: usize,
    pub no_data: usize,
    /// The reading was already in the device window and was not evaluated.
    pub duplicate: bool,
    /// The reading was dated too far in the future and was not evaluated.
    pub future_dated: bool,
}

pub struct AlertEngine {
    index: Arc<RuleIndex>,
    cooldowns: Arc<CooldownTracker>,
    windows: DashMap<String, DeviceWindow>,
    scorer: Option<Arc<dyn AnomalyScorer>>,
    history_retention: Duration,
}

impl AlertEngine {
    pub fn new(index: Arc<RuleIndex>, cooldowns: Arc<CooldownTracker>) -> Self {
        Self {
            index,
            cooldowns,
            windows: DashMap::new(),
            scorer: None,
            history_retention: Duration::minutes(DEFAULT_HISTORY_RETENTION_MINUTES),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn AnomalyScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_history_retention(mut self, retention: Duration) -> Self {
        self.history_retention = retention;
        self
    }

    pub fn index(&self) -> &Arc<RuleIndex> {
        &self.index
    }

    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    /// Reaction path: evaluates every reading-driven rule in scope of the
    /// reading's device.
    ///
    /// Readings of one device are serialized on that device's window entry,
    /// so callers must feed them in arrival order. The evaluation time is
    /// the reading's own timestamp, capped at the wall clock.
    pub fn ingest(&self, reading: Reading, device: Option<&DeviceInfo>) -> EvaluationSummary {
        self.ingest_at(reading, device, Utc::now())
    }

    /// [`ingest`](Self::ingest) against an explicit wall clock.
    ///
    /// A reading dated more than [`MAX_CLOCK_SKEW_SECS`] after `wall_clock`
    /// is reported as no-data for every candidate rule and left out of the
    /// device window, so it can neither claim a cooldown in the future nor
    /// evict the device's history.
    pub fn ingest_at(
        &self,
        reading: Reading,
        device: Option<&DeviceInfo>,
        wall_clock: DateTime<Utc>,
    ) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();
        let location_id = device.and_then(|d| d.location_id.as_deref());
        let candidates: Vec<_> = self
            .index
            .rules_for(&reading.device_id, location_id)
            .into_iter()
            .filter(|rule| !rule.kind.is_sweep_driven())
            .collect();

        let retention = self
            .index
            .max_window()
            .map_or(self.history_retention, |w| w.max(self.history_retention));
        let device_id = reading.device_id.clone();
        let reading_id = reading.id.clone();

        if reading.timestamp > wall_clock + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            tracing::warn!(
                device_id = %device_id,
                reading_id = %reading_id,
                timestamp = %reading.timestamp,
                "Reading dated in the future, not evaluated"
            );
            summary.future_dated = true;
            summary.no_data = candidates.len();
            return summary;
        }
        let now = reading.timestamp.min(wall_clock);

        let mut window = self.windows.entry(device_id.clone()).or_default();
        if !window.push(reading, now, retention) {
            tracing::debug!(device_id = %device_id, reading_id = %reading_id, "Reading already evaluated, skipping");
            summary.duplicate = true;
            return summary;
        }
        if candidates.is_empty() {
            return summary;
        }

        let Some((current, history)) = window.as_contiguous_slice().split_last() else {
            return summary;
        };
        let ctx = EvalContext {
            now,
            reading: Some(current),
            history,
            device,
            scorer: self.scorer.as_deref(),
        };
        for rule in &candidates {
            self.apply(rule, &ctx, &device_id, Some(&reading_id), &mut summary);
        }
        summary
    }

    /// Sweep path: evaluates `DEVICE_OFFLINE` rules for every device in
    /// their scope at wall-clock time `now`.
    pub fn sweep(&self, devices: &[DeviceInfo], now: DateTime<Utc>) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();
        let offline_rules = self.index.offline_rules();
        if offline_rules.is_empty() {
            return summary;
        }

        for device in devices {
            let ctx = EvalContext::for_device(device, now);
            for rule in offline_rules
                .iter()
                .filter(|rule| rule.scope.covers(&device.id, device.location_id.as_deref()))
            {
                self.apply(rule, &ctx, &device.id, None, &mut summary);
            }
        }
        summary
    }

    /// Gives back the cooldown claimed by a firing whose alert could not be
    /// stored. Returns false if a later firing already replaced it.
    pub fn release(&self, firing: &Firing) -> bool {
        self.cooldowns.restore(
            &firing.event.rule_id,
            &firing.event.device_id,
            firing.event.triggered_at,
            firing.previous.clone(),
        )
    }

    /// Number of devices with a reading window.
    pub fn tracked_devices(&self) -> usize {
        self.windows.len()
    }

    fn apply(
        &self,
        rule: &Arc<AlertRule>,
        ctx: &EvalContext<'_>,
        device_id: &str,
        reading_id: Option<&str>,
        summary: &mut EvaluationSummary,
    ) {
        summary.evaluated += 1;
        let cooldown = rule.cooldown();

        let outcome = rules::evaluate(rule, ctx);
        match outcome.verdict {
            Verdict::Violated => {}
            Verdict::Clear => return,
            Verdict::NoData | Verdict::InsufficientHistory => {
                summary.no_data += 1;
                tracing::debug!(
                    rule_id = %rule.id,
                    device_id,
                    verdict = ?outcome.verdict,
                    detail = %outcome.detail,
                    "Rule not evaluable"
                );
                return;
            }
        }

        match self
            .cooldowns
            .try_acquire(&rule.id, device_id, cooldown, ctx.now, reading_id)
        {
            Gate::Open { previous } => {
                let event = build_event(rule, device_id, reading_id, &outcome, ctx.now);
                tracing::info!(
                    rule_id = %rule.id,
                    device_id,
                    alert_id = %event.id,
                    severity = %rule.severity,
                    "Alert fired"
                );
                summary.fired.push(Firing {
                    event,
                    rule: Arc::clone(rule),
                    previous,
                });
            }
            Gate::Suppressed { last_fired } => {
                summary.suppressed += 1;
                tracing::debug!(
                    rule_id = %rule.id,
                    device_id,
                    last_fired = %last_fired,
                    "Alert suppressed (cooldown)"
                );
            }
        }
    }
}

fn build_event(
    rule: &AlertRule,
    device_id: &str,
    reading_id: Option<&str>,
    outcome: &CheckOutcome,
    now: DateTime<Utc>,
) -> AlertEvent {
    let notifications: BTreeMap<_, _> = rule
        .notification_channels
        .iter()
        .map(|channel| (channel.clone(), DeliveryOutcome::pending(now)))
        .collect();

    AlertEvent {
        id: fieldmon_common::id::next_id(),
        rule_id: rule.id.clone(),
        rule_name: rule.display_name().to_string(),
        rule_kind: rule.kind,
        severity: rule.severity,
        device_id: device_id.to_string(),
        reading_id: reading_id.map(str::to_string),
        observed_value: outcome.observed_value,
        message: format!(
            "[{}] {}: {} (device {device_id})",
            rule.severity,
            rule.display_name(),
            outcome.detail
        ),
        triggered_at: now,
        notifications,
        webhook_url: rule.webhook_url.clone(),
        acknowledged_by: None,
        acknowledged_at: None,
    }
}
