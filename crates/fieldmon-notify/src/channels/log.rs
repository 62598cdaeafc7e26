use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::NotificationChannel;
use async_trait::async_trait;
use fieldmon_common::types::{AlertEvent, Severity};
use serde_json::Value;
use std::sync::Arc;

/// Writes alerts to the service log. Used when no other channel is set up.
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, alert: &AlertEvent) -> Result<()> {
        match alert.severity {
            Severity::Critical | Severity::Warning => tracing::warn!(
                channel = %self.name,
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                device_id = %alert.device_id,
                severity = %alert.severity,
                "{}",
                alert.message
            ),
            Severity::Info => tracing::info!(
                channel = %self.name,
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                device_id = %alert.device_id,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        &self.name
    }
}

pub struct LogPlugin;

impl ChannelPlugin for LogPlugin {
    fn name(&self) -> &str {
        "log"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        match config {
            Value::Null => Ok(()),
            Value::Object(map) if map.is_empty() => Ok(()),
            _ => Err(NotifyError::InvalidConfig(
                "log: channel takes no configuration".to_string(),
            )),
        }
    }

    fn create_channel(&self, channel_name: &str, _config: &Value) -> Result<Arc<dyn NotificationChannel>> {
        Ok(Arc::new(LogChannel::new(channel_name)))
    }
}
