use fieldmon_alert::engine::EvaluationSummary;
use fieldmon_common::types::{DeliveryOutcome, DeliveryStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters shared by every worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    readings_evaluated: AtomicU64,
    duplicate_readings: AtomicU64,
    rules_evaluated: AtomicU64,
    firings: AtomicU64,
    suppressed: AtomicU64,
    no_data: AtomicU64,
    alerts_written: AtomicU64,
    write_failures: AtomicU64,
    deliveries_succeeded: AtomicU64,
    deliveries_failed: AtomicU64,
    sweeps: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub readings_evaluated: u64,
    pub duplicate_readings: u64,
    pub rules_evaluated: u64,
    pub firings: u64,
    pub suppressed: u64,
    pub no_data: u64,
    pub alerts_written: u64,
    pub write_failures: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
    pub sweeps: u64,
}

fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(by as u64, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_reading(&self, summary: &EvaluationSummary) {
        if summary.duplicate {
            bump(&self.duplicate_readings, 1);
            return;
        }
        bump(&self.readings_evaluated, 1);
        self.record_evaluation(summary);
    }

    pub fn record_sweep(&self, summary: &EvaluationSummary) {
        bump(&self.sweeps, 1);
        self.record_evaluation(summary);
    }

    fn record_evaluation(&self, summary: &EvaluationSummary) {
        bump(&self.rules_evaluated, summary.evaluated);
        bump(&self.firings, summary.fired.len());
        bump(&self.suppressed, summary.suppressed);
        bump(&self.no_data, summary.no_data);
    }

    pub fn record_written(&self) {
        bump(&self.alerts_written, 1);
    }

    pub fn record_write_failure(&self) {
        bump(&self.write_failures, 1);
    }

    pub fn record_delivery(&self, outcome: &DeliveryOutcome) {
        match outcome.status {
            DeliveryStatus::Success => bump(&self.deliveries_succeeded, 1),
            DeliveryStatus::Failed => bump(&self.deliveries_failed, 1),
            DeliveryStatus::Pending => {}
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            readings_evaluated: load(&self.readings_evaluated),
            duplicate_readings: load(&self.duplicate_readings),
            rules_evaluated: load(&self.rules_evaluated),
            firings: load(&self.firings),
            suppressed: load(&self.suppressed),
            no_data: load(&self.no_data),
            alerts_written: load(&self.alerts_written),
            write_failures: load(&self.write_failures),
            deliveries_succeeded: load(&self.deliveries_succeeded),
            deliveries_failed: load(&self.deliveries_failed),
            sweeps: load(&self.sweeps),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            readings_evaluated = s.readings_evaluated,
            duplicate_readings = s.duplicate_readings,
            rules_evaluated = s.rules_evaluated,
            firings = s.firings,
            suppressed = s.suppressed,
            no_data = s.no_data,
            alerts_written = s.alerts_written,
            write_failures = s.write_failures,
            deliveries_succeeded = s.deliveries_succeeded,
            deliveries_failed = s.deliveries_failed,
            sweeps = s.sweeps,
            "Pipeline statistics"
        );
    }
}
