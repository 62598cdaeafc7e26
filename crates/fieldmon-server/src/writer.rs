//! Alert writer: persists accepted firings with bounded retry.
//!
//! A firing whose alert cannot be stored is never dropped quietly. Transient
//! sink errors are retried with exponential backoff; once the attempts are
//! used up the failure is logged as a fatal pipeline error and the cooldown
//! claimed by the firing is handed back to the engine.

use crate::stats::PipelineStats;
use fieldmon_alert::engine::{AlertEngine, Firing};
use fieldmon_storage::error::StorageError;
use fieldmon_storage::AlertSink;
use std::sync::Arc;
use std::time::Duration;

const MAX_WRITE_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct WriterPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for WriterPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(200),
        }
    }
}

impl WriterPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(MAX_WRITE_BACKOFF)
    }
}

pub struct AlertWriter {
    sink: Arc<dyn AlertSink>,
    engine: Arc<AlertEngine>,
    stats: Arc<PipelineStats>,
    policy: WriterPolicy,
}

impl AlertWriter {
    pub fn new(
        sink: Arc<dyn AlertSink>,
        engine: Arc<AlertEngine>,
        stats: Arc<PipelineStats>,
        policy: WriterPolicy,
    ) -> Self {
        Self {
            sink,
            engine,
            stats,
            policy,
        }
    }

    /// Stores the firing's alert. Returns the error of the last attempt when
    /// the alert could not be stored; the firing's cooldown has been
    /// released by then.
    pub async fn write(&self, firing: &Firing) -> Result<(), StorageError> {
        let alert = &firing.event;
        let mut attempt = 0u32;
        let err = loop {
            attempt += 1;
            match self.sink.insert_alert(alert).await {
                Ok(inserted) => {
                    if !inserted {
                        tracing::debug!(alert_id = %alert.id, "Alert already stored");
                    }
                    self.stats.record_written();
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_for(attempt);
                    tracing::warn!(
                        alert_id = %alert.id,
                        rule_id = %alert.rule_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Alert write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break e,
            }
        };

        let released = self.engine.release(firing);
        self.stats.record_write_failure();
        tracing::error!(
            fatal = true,
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            device_id = %alert.device_id,
            attempts = attempt,
            cooldown_released = released,
            error = %err,
            "Alert could not be stored"
        );
        Err(err)
    }
}
