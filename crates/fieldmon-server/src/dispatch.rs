//! Notification worker pool.
//!
//! Stored alerts are queued here after the writer succeeds, so a slow or
//! stalled channel never holds up evaluation. Every alert is stored with
//! its channels in `pending`; an alert that does not fit in the queue, or
//! is still unsent when the process stops, keeps that state and is picked
//! up again by the resume loop.

use crate::stats::PipelineStats;
use dashmap::DashSet;
use fieldmon_common::types::{AlertEvent, DeliveryOutcome};
use fieldmon_notify::dispatcher::NotificationDispatcher;
use fieldmon_storage::AlertSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const OUTCOME_WRITE_ATTEMPTS: u32 = 3;
const OUTCOME_WRITE_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub resume_interval: Duration,
    /// Time in-flight deliveries get to finish after cancellation.
    pub shutdown_grace: Duration,
}

/// Handle used by the evaluation side to hand alerts to the pool.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Arc<AlertEvent>>,
    in_flight: Arc<DashSet<String>>,
}

impl DispatchQueue {
    /// Queues `alert` without waiting. Returns false when the alert is
    /// already being delivered or the queue is full; in the latter case it
    /// stays pending in the sink for the resume loop.
    pub fn submit(&self, alert: Arc<AlertEvent>) -> bool {
        if !alert.has_pending_deliveries() {
            return false;
        }
        if !self.in_flight.insert(alert.id.clone()) {
            return false;
        }
        let alert_id = alert.id.clone();
        match self.tx.try_send(alert) {
            Ok(()) => true,
            Err(e) => {
                self.in_flight.remove(&alert_id);
                tracing::warn!(
                    alert_id = %alert_id,
                    error = %e,
                    "Dispatch queue unavailable, delivery left pending"
                );
                false
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

struct Shared {
    dispatcher: Arc<NotificationDispatcher>,
    sink: Arc<dyn AlertSink>,
    stats: Arc<PipelineStats>,
    in_flight: Arc<DashSet<String>>,
    settings: DispatchSettings,
}

pub struct DispatchPool;

impl DispatchPool {
    /// Spawns the workers and the resume loop. The returned set completes
    /// once `cancel` fired and in-flight deliveries settled.
    pub fn start(
        dispatcher: Arc<NotificationDispatcher>,
        sink: Arc<dyn AlertSink>,
        stats: Arc<PipelineStats>,
        settings: DispatchSettings,
        cancel: CancellationToken,
    ) -> (DispatchQueue, JoinSet<()>) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let in_flight = Arc::new(DashSet::new());
        let queue = DispatchQueue {
            tx,
            in_flight: Arc::clone(&in_flight),
        };
        let shared = Arc::new(Shared {
            dispatcher,
            sink,
            stats,
            in_flight,
            settings,
        });
        let rx = Arc::new(Mutex::new(rx));

        tracing::info!(
            workers = settings.workers,
            queue_capacity = settings.queue_capacity,
            resume_interval_secs = settings.resume_interval.as_secs(),
            "Dispatch pool started"
        );

        let mut tasks = JoinSet::new();
        for worker in 0..settings.workers {
            tasks.spawn(run_worker(
                worker,
                Arc::clone(&shared),
                Arc::clone(&rx),
                cancel.clone(),
            ));
        }
        tasks.spawn(run_resume(Arc::clone(&shared), queue.clone(), cancel));
        (queue, tasks)
    }
}

async fn run_worker(
    worker: usize,
    shared: Arc<Shared>,
    rx: Arc<Mutex<mpsc::Receiver<Arc<AlertEvent>>>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            alert = async { rx.lock().await.recv().await } => alert,
        };
        let Some(alert) = next else { break };
        deliver(&shared, alert, &cancel).await;
    }
    tracing::debug!(worker, "Dispatch worker stopped");
}

async fn deliver(shared: &Shared, queued: Arc<AlertEvent>, cancel: &CancellationToken) {
    // A resumed copy may be stale if an earlier delivery just finished
    let alert = match shared.sink.get_alert(&queued.id).await {
        Ok(Some(stored)) => Arc::new(stored),
        Ok(None) => queued,
        Err(e) => {
            tracing::warn!(alert_id = %queued.id, error = %e, "Failed to reload alert, using queued copy");
            queued
        }
    };
    let channels = alert.pending_channels();
    if channels.is_empty() {
        shared.in_flight.remove(&alert.id);
        return;
    }
    let mut fanout = shared.dispatcher.start(Arc::clone(&alert), &channels);
    let mut unresolved = channels.len();

    let grace = shared.settings.shutdown_grace;
    let deadline = async {
        cancel.cancelled().await;
        tokio::time::sleep(grace).await;
    };
    tokio::pin!(deadline);

    loop {
        let next = tokio::select! {
            next = fanout.next() => next,
            _ = &mut deadline => {
                tracing::warn!(
                    alert_id = %alert.id,
                    unresolved,
                    "Shutdown grace elapsed, deliveries left pending"
                );
                break;
            }
        };
        let Some((channel, outcome)) = next else { break };
        unresolved = unresolved.saturating_sub(1);
        shared.stats.record_delivery(&outcome);
        record_outcome(shared.sink.as_ref(), &alert.id, &channel, &outcome).await;
    }

    // Dropping the fan-out aborts whatever is still running
    drop(fanout);
    shared.in_flight.remove(&alert.id);
}

async fn record_outcome(sink: &dyn AlertSink, alert_id: &str, channel: &str, outcome: &DeliveryOutcome) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match sink.update_delivery(alert_id, channel, outcome).await {
            Ok(()) => return,
            Err(e) if e.is_transient() && attempt < OUTCOME_WRITE_ATTEMPTS => {
                tokio::time::sleep(OUTCOME_WRITE_BACKOFF * attempt).await;
            }
            Err(e) => {
                // The channel stays pending in the sink and is delivered again later
                tracing::error!(
                    alert_id,
                    channel,
                    status = %outcome.status,
                    error = %e,
                    "Failed to record delivery outcome"
                );
                return;
            }
        }
    }
}

async fn run_resume(shared: Arc<Shared>, queue: DispatchQueue, cancel: CancellationToken) {
    let limit = shared.settings.queue_capacity;
    let mut interval = tokio::time::interval(shared.settings.resume_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Delivery resume loop stopping");
                break;
            }
            _ = interval.tick() => {
                match shared.sink.pending_deliveries(limit).await {
                    Ok(alerts) => {
                        let resumed = alerts
                            .into_iter()
                            .filter(|alert| !shared.in_flight.contains(&alert.id))
                            .map(|alert| queue.submit(Arc::new(alert)))
                            .filter(|queued| *queued)
                            .count();
                        if resumed > 0 {
                            tracing::info!(resumed, "Resumed pending deliveries");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to list pending deliveries");
                    }
                }
            }
        }
    }
}
