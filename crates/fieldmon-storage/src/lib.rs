//! Narrow persistence contracts consumed by the alerting core.
//!
//! The core never talks to a database directly. It reads rules, devices and
//! newly arrived readings through the traits below and writes alerts through
//! [`AlertSink`]. [`memory::MemoryStore`] implements all of them in process
//! and backs the server binary and the tests.

pub mod error;
pub mod memory;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error::Result;
use fieldmon_common::types::{AlertEvent, AlertRule, DeliveryOutcome, DeviceInfo, FiringRecord, Reading};

/// Source of operator-defined rules.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Returns every enabled rule. Scope resolution happens in the rule index.
    async fn list_enabled_rules(&self) -> Result<Vec<AlertRule>>;
}

/// Device registry with last-contact timestamps.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceInfo>>;

    /// Most recent contact of the device, `None` if it never reported.
    async fn last_seen(&self, device_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_device(device_id)
            .await?
            .and_then(|device| device.last_seen_at))
    }
}

/// Feed of newly arrived readings with at-least-once delivery.
///
/// A polled reading is redelivered by a later `poll` until it is
/// acknowledged, so consumers must tolerate duplicates.
#[async_trait]
pub trait ReadingFeed: Send + Sync {
    /// Returns up to `limit` readings in arrival order.
    async fn poll(&self, limit: usize) -> Result<Vec<Reading>>;

    /// Marks readings as processed.
    async fn acknowledge(&self, reading_ids: &[String]) -> Result<()>;
}

/// Append-only alert history.
///
/// After insertion only the per-channel delivery outcomes and the
/// acknowledgement fields may change.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Stores a new alert. Inserting an id that already exists with the same
    /// firing is a no-op returning `false`.
    async fn insert_alert(&self, alert: &AlertEvent) -> Result<bool>;

    /// Records the delivery outcome of one channel in place.
    async fn update_delivery(&self, alert_id: &str, channel: &str, outcome: &DeliveryOutcome) -> Result<()>;

    /// Stores who acknowledged the alert and when.
    async fn acknowledge(&self, alert_id: &str, user: &str, at: DateTime<Utc>) -> Result<()>;

    async fn get_alert(&self, alert_id: &str) -> Result<Option<AlertEvent>>;

    /// Firings at or after `since`, used to warm the cooldown tracker.
    async fn recent_firings(&self, since: DateTime<Utc>) -> Result<Vec<FiringRecord>>;

    /// Alerts that still have at least one channel in `pending`, oldest first.
    async fn pending_deliveries(&self, limit: usize) -> Result<Vec<AlertEvent>>;

    /// Alerts ordered by firing time, oldest first.
    async fn list_alerts(&self, limit: usize, offset: usize) -> Result<Vec<AlertEvent>>;
}
