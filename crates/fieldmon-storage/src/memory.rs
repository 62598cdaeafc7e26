//! In-process store implementing every repository trait.

use crate::error::{Result, StorageError};
use crate::{AlertSink, DeviceRepository, ReadingFeed, RuleRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldmon_common::types::{AlertEvent, AlertRule, DeliveryOutcome, DeviceInfo, FiringRecord, Reading};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Inner {
    rules: BTreeMap<String, AlertRule>,
    devices: BTreeMap<String, DeviceInfo>,
    readings: HashMap<String, Reading>,
    /// Unacknowledged readings in arrival order.
    feed: VecDeque<Reading>,
    /// Ids handed out by `poll` and not yet acknowledged.
    leased: HashSet<String>,
    alerts: HashMap<String, AlertEvent>,
    alert_order: Vec<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or replaces a rule.
    pub fn upsert_rule(&self, rule: AlertRule) {
        self.write().rules.insert(rule.id.clone(), rule);
    }

    /// Removes a rule. Returns true if it existed.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        self.write().rules.remove(rule_id).is_some()
    }

    /// Enables or disables a rule. Returns false if the rule is unknown.
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        match self.write().rules.get_mut(rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn upsert_device(&self, device: DeviceInfo) {
        self.write().devices.insert(device.id.clone(), device);
    }

    /// Stores a reading, advances its device's `last_seen_at` and queues it
    /// on the feed.
    ///
    /// The stored copy of a reading id is immutable; appending the same id
    /// again only queues it once more, as an at-least-once upstream would.
    /// An unknown device is registered with the reading's timestamp as its
    /// creation time.
    pub fn append_reading(&self, reading: Reading) {
        let mut inner = self.write();
        let ts = reading.timestamp;
        match inner.devices.get_mut(&reading.device_id) {
            Some(device) => {
                if device.last_seen_at.map_or(true, |seen| seen < ts) {
                    device.last_seen_at = Some(ts);
                }
            }
            None => {
                tracing::debug!(device_id = %reading.device_id, "Registering unknown device from reading");
                inner.devices.insert(
                    reading.device_id.clone(),
                    DeviceInfo {
                        id: reading.device_id.clone(),
                        location_id: None,
                        created_at: ts,
                        last_seen_at: Some(ts),
                    },
                );
            }
        }
        inner
            .readings
            .entry(reading.id.clone())
            .or_insert_with(|| reading.clone());
        inner.feed.push_back(reading);
    }

    /// Makes every polled but unacknowledged reading eligible for delivery
    /// again, as after a consumer restart.
    pub fn redeliver_unacknowledged(&self) -> usize {
        let mut inner = self.write();
        let count = inner.leased.len();
        inner.leased.clear();
        count
    }

    pub fn reading(&self, reading_id: &str) -> Option<Reading> {
        self.read().readings.get(reading_id).cloned()
    }

    /// Number of readings not yet acknowledged.
    pub fn unacknowledged(&self) -> usize {
        self.read().feed.len()
    }

    pub fn alert_count(&self) -> usize {
        self.read().alert_order.len()
    }
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn list_enabled_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self
            .read()
            .rules
            .values()
            .filter(|rule| rule.enabled)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeviceRepository for MemoryStore {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.read().devices.values().cloned().collect())
    }

    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceInfo>> {
        Ok(self.read().devices.get(device_id).cloned())
    }
}

#[async_trait]
impl ReadingFeed for MemoryStore {
    async fn poll(&self, limit: usize) -> Result<Vec<Reading>> {
        let mut inner = self.write();
        let Inner { feed, leased, .. } = &mut *inner;
        let mut batch = Vec::new();
        for reading in feed.iter() {
            if batch.len() >= limit {
                break;
            }
            if leased.insert(reading.id.clone()) {
                batch.push(reading.clone());
            }
        }
        Ok(batch)
    }

    async fn acknowledge(&self, reading_ids: &[String]) -> Result<()> {
        let ids: HashSet<&str> = reading_ids.iter().map(String::as_str).collect();
        let mut inner = self.write();
        inner.feed.retain(|reading| !ids.contains(reading.id.as_str()));
        inner.leased.retain(|id| !ids.contains(id.as_str()));
        Ok(())
    }
}

#[async_trait]
impl AlertSink for MemoryStore {
    async fn insert_alert(&self, alert: &AlertEvent) -> Result<bool> {
        let mut inner = self.write();
        if let Some(existing) = inner.alerts.get(&alert.id) {
            let same_firing = existing.rule_id == alert.rule_id
                && existing.device_id == alert.device_id
                && existing.triggered_at == alert.triggered_at;
            if same_firing {
                return Ok(false);
            }
            return Err(StorageError::Conflict {
                entity: "alert",
                id: alert.id.clone(),
                reason: "id already used by a different firing".to_string(),
            });
        }
        inner.alerts.insert(alert.id.clone(), alert.clone());
        inner.alert_order.push(alert.id.clone());
        Ok(true)
    }

    async fn update_delivery(&self, alert_id: &str, channel: &str, outcome: &DeliveryOutcome) -> Result<()> {
        let mut inner = self.write();
        let alert = inner.alerts.get_mut(alert_id).ok_or_else(|| StorageError::NotFound {
            entity: "alert",
            id: alert_id.to_string(),
        })?;
        alert.notifications.insert(channel.to_string(), outcome.clone());
        Ok(())
    }

    async fn acknowledge(&self, alert_id: &str, user: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.write();
        let alert = inner.alerts.get_mut(alert_id).ok_or_else(|| StorageError::NotFound {
            entity: "alert",
            id: alert_id.to_string(),
        })?;
        alert.acknowledged_by = Some(user.to_string());
        alert.acknowledged_at = Some(at);
        Ok(())
    }

    async fn get_alert(&self, alert_id: &str) -> Result<Option<AlertEvent>> {
        Ok(self.read().alerts.get(alert_id).cloned())
    }

    async fn recent_firings(&self, since: DateTime<Utc>) -> Result<Vec<FiringRecord>> {
        Ok(self
            .read()
            .alerts
            .values()
            .filter(|alert| alert.triggered_at >= since)
            .map(FiringRecord::from)
            .collect())
    }

    async fn pending_deliveries(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        let inner = self.read();
        Ok(inner
            .alert_order
            .iter()
            .filter_map(|id| inner.alerts.get(id))
            .filter(|alert| alert.has_pending_deliveries())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_alerts(&self, limit: usize, offset: usize) -> Result<Vec<AlertEvent>> {
        let inner = self.read();
        let mut alerts: Vec<AlertEvent> = inner
            .alert_order
            .iter()
            .filter_map(|id| inner.alerts.get(id))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| a.triggered_at.cmp(&b.triggered_at));
        Ok(alerts.into_iter().skip(offset).take(limit).collect())
    }
}
