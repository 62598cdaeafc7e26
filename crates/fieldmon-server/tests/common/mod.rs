#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fieldmon_common::types::{
    AlertEvent, AlertRule, CheckKind, DeliveryOutcome, DeviceInfo, FiringRecord, Payload, Reading, RuleScope,
    Severity,
};
use fieldmon_notify::error::{NotifyError, Result as NotifyResult};
use fieldmon_notify::registry::SenderRegistry;
use fieldmon_notify::NotificationChannel;
use fieldmon_server::app::{Repositories, Service};
use fieldmon_server::config::ServerConfig;
use fieldmon_storage::error::{Result as StorageResult, StorageError};
use fieldmon_storage::memory::MemoryStore;
use fieldmon_storage::AlertSink;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const WAIT_LIMIT: Duration = Duration::from_secs(10);
const WAIT_STEP: Duration = Duration::from_millis(20);

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub service: Service,
    pub cancel: CancellationToken,
}

/// Short intervals so the loops react within a test's lifetime.
pub fn fast_config() -> ServerConfig {
    ServerConfig {
        sweep_interval_secs: 1,
        notification_timeout_secs: 2,
        max_retries: 1,
        retry_backoff_ms: 10,
        rule_refresh_secs: 1,
        feed_poll_ms: 10,
        resume_interval_secs: 1,
        writer_backoff_ms: 10,
        shutdown_grace_secs: 1,
        ..ServerConfig::default()
    }
}

pub async fn start(
    config: &ServerConfig,
    store: Arc<MemoryStore>,
    senders: SenderRegistry,
) -> TestContext {
    start_with(config, store.clone(), Repositories::memory(&store), senders).await
}

pub async fn start_with(
    config: &ServerConfig,
    store: Arc<MemoryStore>,
    repos: Repositories,
    senders: SenderRegistry,
) -> TestContext {
    fieldmon_common::id::init(1, 1);
    let cancel = CancellationToken::new();
    let service = Service::start(config, repos, senders, cancel.clone())
        .await
        .expect("service should start");
    TestContext {
        store,
        service,
        cancel,
    }
}

impl TestContext {
    pub async fn alerts(&self) -> Vec<AlertEvent> {
        self.store.list_alerts(1000, 0).await.expect("list alerts")
    }

    /// Polls the stored alerts until `pred` holds.
    pub async fn wait_for_alerts<F>(&self, what: &str, pred: F) -> Vec<AlertEvent>
    where
        F: Fn(&[AlertEvent]) -> bool,
    {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            let alerts = self.alerts().await;
            if pred(&alerts) {
                return alerts;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {what}: {alerts:#?}");
            tokio::time::sleep(WAIT_STEP).await;
        }
    }

    /// Waits until every appended reading has been acknowledged.
    pub async fn wait_for_feed_drained(&self) {
        let store = self.store.clone();
        wait_until("feed drained", move || store.unacknowledged() == 0).await;
    }
}

pub async fn wait_until<F>(what: &str, mut cond: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + WAIT_LIMIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(WAIT_STEP).await;
    }
}

// ---- Domain builders ----

pub fn t0() -> DateTime<Utc> {
    Utc::now() - ChronoDuration::hours(2)
}

pub fn above_rule(id: &str, device_id: &str, threshold: f64, channels: &[&str]) -> AlertRule {
    AlertRule {
        id: id.to_string(),
        name: "Cold chain".to_string(),
        kind: CheckKind::Above,
        variable_key: "temp_c".to_string(),
        threshold_value: Some(threshold),
        threshold_min: None,
        threshold_max: None,
        time_window_minutes: None,
        enabled: true,
        cooldown_minutes: 30,
        severity: Severity::Critical,
        scope: RuleScope::Device(device_id.to_string()),
        notification_channels: channels.iter().map(|c| c.to_string()).collect(),
        webhook_url: None,
    }
}

pub fn offline_rule(id: &str, window_minutes: u32, channels: &[&str]) -> AlertRule {
    AlertRule {
        kind: CheckKind::DeviceOffline,
        variable_key: String::new(),
        threshold_value: None,
        time_window_minutes: Some(window_minutes),
        scope: RuleScope::Global,
        ..above_rule(id, "unused", 0.0, channels)
    }
}

pub fn reading(id: &str, device_id: &str, temp_c: f64, at: DateTime<Utc>) -> Reading {
    let mut payload = Payload::new();
    payload.insert("temp_c".to_string(), serde_json::json!(temp_c));
    Reading {
        id: id.to_string(),
        device_id: device_id.to_string(),
        payload,
        quality_score: Some(1.0),
        timestamp: at,
    }
}

pub fn device(id: &str, last_seen_at: Option<DateTime<Utc>>) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        location_id: None,
        created_at: Utc::now() - ChronoDuration::days(30),
        last_seen_at,
    }
}

// ---- Notification fakes ----

/// Records every alert it is asked to send; fails the first `failures`
/// calls.
pub struct Recorder {
    name: String,
    failures: u32,
    calls: AtomicU32,
    delivered: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new(name: &str, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failures,
            calls: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for Recorder {
    async fn send(&self, alert: &AlertEvent) -> NotifyResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(NotifyError::ApiError {
                service: self.name.clone(),
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        self.delivered.lock().unwrap().push(alert.id.clone());
        Ok(())
    }

    fn channel_name(&self) -> &str {
        &self.name
    }
}

/// Never completes a send.
pub struct Stalled;

#[async_trait]
impl NotificationChannel for Stalled {
    async fn send(&self, _alert: &AlertEvent) -> NotifyResult<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "stalled"
    }
}

pub fn senders(channels: Vec<(&str, Arc<dyn NotificationChannel>)>) -> SenderRegistry {
    let mut registry = SenderRegistry::new();
    for (name, sender) in channels {
        registry.register(name, sender);
    }
    registry
}

pub fn sender<C: NotificationChannel + 'static>(channel: &Arc<C>) -> Arc<dyn NotificationChannel> {
    channel.clone()
}

// ---- Storage fakes ----

/// Alert sink whose inserts fail with a transient error the first
/// `failures` times.
pub struct FlakySink {
    inner: Arc<MemoryStore>,
    failures: u32,
    inserts: AtomicU32,
}

impl FlakySink {
    pub fn new(inner: Arc<MemoryStore>, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures,
            inserts: AtomicU32::new(0),
        })
    }

    pub fn inserts(&self) -> u32 {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertSink for FlakySink {
    async fn insert_alert(&self, alert: &AlertEvent) -> StorageResult<bool> {
        let call = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(StorageError::Unavailable("database is restarting".to_string()));
        }
        self.inner.insert_alert(alert).await
    }

    async fn update_delivery(&self, alert_id: &str, channel: &str, outcome: &DeliveryOutcome) -> StorageResult<()> {
        self.inner.update_delivery(alert_id, channel, outcome).await
    }

    async fn acknowledge(&self, alert_id: &str, user: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.inner.acknowledge(alert_id, user, at).await
    }

    async fn get_alert(&self, alert_id: &str) -> StorageResult<Option<AlertEvent>> {
        self.inner.get_alert(alert_id).await
    }

    async fn recent_firings(&self, since: DateTime<Utc>) -> StorageResult<Vec<FiringRecord>> {
        self.inner.recent_firings(since).await
    }

    async fn pending_deliveries(&self, limit: usize) -> StorageResult<Vec<AlertEvent>> {
        self.inner.pending_deliveries(limit).await
    }

    async fn list_alerts(&self, limit: usize, offset: usize) -> StorageResult<Vec<AlertEvent>> {
        self.inner.list_alerts(limit, offset).await
    }
}
