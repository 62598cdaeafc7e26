//! Evaluation drivers.
//!
//! The reaction path polls the reading feed and routes each reading to a
//! worker chosen by its device id, so readings of one device are evaluated
//! in arrival order while different devices proceed in parallel. The sweep
//! path evaluates offline rules on a fixed interval. Both hand accepted
//! firings to the same write-then-dispatch path.

use crate::dispatch::DispatchQueue;
use crate::stats::PipelineStats;
use crate::writer::AlertWriter;
use chrono::Utc;
use fieldmon_alert::engine::{AlertEngine, Firing};
use fieldmon_common::types::Reading;
use fieldmon_storage::error::StorageError;
use fieldmon_storage::{DeviceRepository, ReadingFeed};
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_MAX: Duration = Duration::from_secs(5);

/// Everything the two evaluation paths share.
pub struct Pipeline {
    pub engine: Arc<AlertEngine>,
    pub devices: Arc<dyn DeviceRepository>,
    pub feed: Arc<dyn ReadingFeed>,
    pub writer: AlertWriter,
    pub dispatch: DispatchQueue,
    pub stats: Arc<PipelineStats>,
}

impl Pipeline {
    /// Stores each firing and queues it for notification. Firings that
    /// could not be stored are not dispatched.
    pub async fn commit(&self, firings: Vec<Firing>) {
        for firing in firings {
            if self.writer.write(&firing).await.is_ok() {
                self.dispatch.submit(Arc::new(firing.event));
            }
        }
    }

    /// Evaluates one reading and acknowledges it. Returns false when the
    /// reading was left unacknowledged because of cancellation.
    pub async fn process_reading(&self, reading: Reading, cancel: &CancellationToken) -> bool {
        let device_id = reading.device_id.clone();
        let reading_id = reading.id.clone();

        let device = match retry_transient("get_device", cancel, || self.devices.get_device(&device_id)).await {
            None => return false,
            Some(Ok(device)) => device,
            Some(Err(e)) => {
                // Location-scoped rules need the device; the others still apply
                tracing::warn!(device_id = %device_id, error = %e, "Device lookup failed, evaluating without location");
                None
            }
        };

        let summary = self.engine.ingest(reading, device.as_ref());
        self.stats.record_reading(&summary);
        self.commit(summary.fired).await;

        if let Err(e) = self.feed.acknowledge(std::slice::from_ref(&reading_id)).await {
            // Redelivery is harmless: the window and the cooldown gate drop it
            tracing::warn!(reading_id = %reading_id, error = %e, "Failed to acknowledge reading");
        }
        true
    }

    /// One offline sweep at wall-clock time. Returns the number of firings.
    pub async fn sweep_once(&self, cancel: &CancellationToken) -> usize {
        if self.engine.index().offline_rules().is_empty() {
            return 0;
        }
        let devices = match retry_transient("list_devices", cancel, || self.devices.list_devices()).await {
            None => return 0,
            Some(Ok(devices)) => devices,
            Some(Err(e)) => {
                tracing::error!(error = %e, "Offline sweep skipped, device list unavailable");
                return 0;
            }
        };

        let summary = self.engine.sweep(&devices, Utc::now());
        self.stats.record_sweep(&summary);
        let fired = summary.fired.len();
        if fired > 0 {
            tracing::info!(devices = devices.len(), fired, "Offline sweep fired alerts");
        }
        self.commit(summary.fired).await;
        fired
    }
}

/// Retries `op` while it fails with a transient error, backing off up to
/// [`RETRY_MAX`]. Returns `None` if `cancel` fires first.
async fn retry_transient<T, F, Fut>(
    operation: &'static str,
    cancel: &CancellationToken,
    mut op: F,
) -> Option<Result<T, StorageError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut delay = RETRY_BASE;
    loop {
        match op().await {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    operation,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Repository unavailable, deferring"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(RETRY_MAX);
            }
            other => return Some(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReactionSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
}

fn worker_for(device_id: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    device_id.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

/// Spawns the feed consumer and its reaction workers.
///
/// On cancellation the consumer stops polling; workers finish the readings
/// already routed to them and exit.
pub fn spawn_reaction(
    pipeline: Arc<Pipeline>,
    settings: ReactionSettings,
    cancel: CancellationToken,
) -> JoinSet<()> {
    let workers = settings.workers.max(1);
    let mut tasks = JoinSet::new();
    let mut senders = Vec::with_capacity(workers);

    for worker in 0..workers {
        let (tx, mut rx) = mpsc::channel::<Reading>(settings.queue_capacity);
        senders.push(tx);
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            while let Some(reading) = rx.recv().await {
                pipeline.process_reading(reading, &cancel).await;
            }
            tracing::debug!(worker, "Reaction worker stopped");
        });
    }

    tasks.spawn(run_feed(pipeline, senders, settings, cancel));
    tasks
}

async fn run_feed(
    pipeline: Arc<Pipeline>,
    workers: Vec<mpsc::Sender<Reading>>,
    settings: ReactionSettings,
    cancel: CancellationToken,
) {
    tracing::info!(
        workers = workers.len(),
        batch_size = settings.batch_size,
        poll_ms = u64::try_from(settings.poll_interval.as_millis()).unwrap_or(u64::MAX),
        "Reading consumer started"
    );

    'consume: loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = pipeline.feed.poll(settings.batch_size) => polled,
        };

        let batch = match polled {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, transient = e.is_transient(), "Reading feed poll failed");
                Vec::new()
            }
        };

        if batch.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(settings.poll_interval) => continue,
            }
        }

        for reading in batch {
            let worker = &workers[worker_for(&reading.device_id, workers.len())];
            // Blocks only on evaluation backlog, never on notification
            if worker.send(reading).await.is_err() {
                tracing::error!("Reaction worker gone, stopping consumer");
                break 'consume;
            }
        }
    }
    tracing::info!("Reading consumer stopping");
}

/// Runs the offline sweep every `interval` until `cancel` fires.
pub async fn run_sweep(pipeline: Arc<Pipeline>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Offline sweep started");

    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Offline sweep stopping");
                break;
            }
            _ = tick.tick() => {
                pipeline.sweep_once(&cancel).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_device_always_routes_to_same_worker() {
        let first = worker_for("D-17", 4);
        for _ in 0..10 {
            assert_eq!(worker_for("D-17", 4), first);
        }
        assert!(first < 4);
        assert_eq!(worker_for("anything", 1), 0);
    }
}
