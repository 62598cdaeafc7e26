//! Per-alert fan-out to notification channels.
//!
//! Every channel runs in its own task with its own timeout and retry budget.
//! The tasks are joined as a barrier: each channel yields exactly one
//! outcome, whatever happened to the others.

use crate::error::NotifyError;
use crate::registry::SenderRegistry;
use crate::NotificationChannel;
use chrono::Utc;
use fieldmon_common::types::{AlertEvent, DeliveryOutcome};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Upper bound for a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a channel gets `max_retries + 1`
    /// attempts in total.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further retry.
    pub backoff_base: Duration,
    /// Limit for one attempt. An attempt that exceeds it counts as failed.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    ///
    /// ```
    /// use fieldmon_notify::dispatcher::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy {
    ///     max_retries: 3,
    ///     backoff_base: Duration::from_millis(100),
    ///     timeout: Duration::from_secs(1),
    /// };
    /// assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
    /// assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
    /// ```
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }
}

pub struct NotificationDispatcher {
    senders: Arc<SenderRegistry>,
    policy: RetryPolicy,
}

impl NotificationDispatcher {
    pub fn new(senders: Arc<SenderRegistry>, policy: RetryPolicy) -> Self {
        Self { senders, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn senders(&self) -> &SenderRegistry {
        &self.senders
    }

    /// Starts delivery of `alert` to `channels` and returns a handle that
    /// yields outcomes as channels finish. Dropping the handle aborts
    /// deliveries still in progress.
    pub fn start(&self, alert: Arc<AlertEvent>, channels: &[String]) -> Fanout {
        let mut fanout = Fanout {
            tasks: JoinSet::new(),
            remaining: BTreeSet::new(),
            resolved: VecDeque::new(),
        };

        for channel in channels {
            if !fanout.remaining.insert(channel.clone()) {
                continue;
            }
            match self.senders.get(channel) {
                Some(sender) => {
                    fanout.tasks.spawn(deliver(
                        channel.clone(),
                        sender,
                        Arc::clone(&alert),
                        self.policy,
                    ));
                }
                None => {
                    let err = NotifyError::UnknownChannel(channel.clone());
                    tracing::error!(alert_id = %alert.id, channel = %channel, error = %err, "Notification failed");
                    fanout.remaining.remove(channel);
                    fanout
                        .resolved
                        .push_back((channel.clone(), DeliveryOutcome::failed(0, err.to_string(), Utc::now())));
                }
            }
        }
        fanout
    }

    /// Delivers `alert` to every channel and returns one outcome per channel.
    pub async fn dispatch(&self, alert: &AlertEvent, channels: &[String]) -> BTreeMap<String, DeliveryOutcome> {
        self.start(Arc::new(alert.clone()), channels).collect().await
    }
}

/// In-flight fan-out of one alert.
pub struct Fanout {
    tasks: JoinSet<(String, DeliveryOutcome)>,
    remaining: BTreeSet<String>,
    resolved: VecDeque<(String, DeliveryOutcome)>,
}

impl Fanout {
    /// Next resolved channel, or `None` once every channel has reported.
    pub async fn next(&mut self) -> Option<(String, DeliveryOutcome)> {
        if let Some(done) = self.resolved.pop_front() {
            return Some(done);
        }
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((channel, outcome)) => {
                    self.remaining.remove(&channel);
                    return Some((channel, outcome));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Notification task ended without an outcome");
                }
            }
        }
        // Tasks that panicked never reported back
        let channel = self.remaining.pop_first()?;
        Some((
            channel,
            DeliveryOutcome::failed(0, "delivery task aborted", Utc::now()),
        ))
    }

    pub async fn collect(mut self) -> BTreeMap<String, DeliveryOutcome> {
        let mut outcomes = BTreeMap::new();
        while let Some((channel, outcome)) = self.next().await {
            outcomes.insert(channel, outcome);
        }
        outcomes
    }
}

async fn deliver(
    channel: String,
    sender: Arc<dyn NotificationChannel>,
    alert: Arc<AlertEvent>,
    policy: RetryPolicy,
) -> (String, DeliveryOutcome) {
    let mut attempts = 0u32;
    let last_err = loop {
        attempts += 1;
        let result = match tokio::time::timeout(policy.timeout, sender.send(&alert)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout {
                channel: channel.clone(),
                after_ms: u64::try_from(policy.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    alert_id = %alert.id,
                    channel = %channel,
                    attempts,
                    "Notification delivered"
                );
                return (channel, DeliveryOutcome::success(attempts, Utc::now()));
            }
            Err(e) if e.is_retryable() && attempts <= policy.max_retries => {
                let delay = policy.backoff_for(attempts);
                tracing::warn!(
                    alert_id = %alert.id,
                    channel = %channel,
                    attempt = attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Notification attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => break e,
        }
    };

    tracing::error!(
        alert_id = %alert.id,
        channel = %channel,
        attempts,
        error = %last_err,
        "Notification failed"
    );
    (
        channel,
        DeliveryOutcome::failed(attempts, last_err.to_string(), Utc::now()),
    )
}
