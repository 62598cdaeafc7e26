use anyhow::bail;
use fieldmon_common::types::{AlertRule, DeviceInfo};
use fieldmon_notify::dispatcher::RetryPolicy;
use fieldmon_notify::plugin::ChannelRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Period of the offline sweep. Must not exceed the smallest
    /// `DEVICE_OFFLINE` window, or an offline device can go unnoticed for a
    /// whole cooldown cycle.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Limit for a single notification attempt.
    #[serde(default = "default_notification_timeout_secs")]
    pub notification_timeout_secs: u64,
    /// Retries per channel after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first notification retry, doubled per retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_rule_refresh_secs")]
    pub rule_refresh_secs: u64,
    /// Idle delay between feed polls that returned nothing.
    #[serde(default = "default_feed_poll_ms")]
    pub feed_poll_ms: u64,
    #[serde(default = "default_feed_batch_size")]
    pub feed_batch_size: usize,
    #[serde(default = "default_reaction_workers")]
    pub reaction_workers: usize,
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,
    /// Capacity of each bounded work queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How often alerts with pending deliveries are picked up again.
    #[serde(default = "default_resume_interval_secs")]
    pub resume_interval_secs: u64,
    #[serde(default = "default_writer_max_attempts")]
    pub writer_max_attempts: u32,
    #[serde(default = "default_writer_backoff_ms")]
    pub writer_backoff_ms: u64,
    /// Minimum reading history kept per device.
    #[serde(default = "default_history_retention_minutes")]
    pub history_retention_minutes: u32,
    /// Time given to in-flight notifications on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// JSON file with devices and rules loaded at startup.
    #[serde(default)]
    pub seed_path: Option<String>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
}

/// A named notification channel. Rules refer to channels by `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_z_score_scale")]
    pub z_score_scale: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            z_score_scale: default_z_score_scale(),
            min_samples: default_min_samples(),
        }
    }
}

// ---- Seed file types (loaded from `seed_path`) ----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_notification_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_rule_refresh_secs() -> u64 {
    30
}

fn default_feed_poll_ms() -> u64 {
    500
}

fn default_feed_batch_size() -> usize {
    256
}

fn default_reaction_workers() -> usize {
    4
}

fn default_dispatch_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_resume_interval_secs() -> u64 {
    30
}

fn default_writer_max_attempts() -> u32 {
    5
}

fn default_writer_backoff_ms() -> u64 {
    200
}

fn default_history_retention_minutes() -> u32 {
    120
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_z_score_scale() -> f64 {
    1.0
}

fn default_min_samples() -> usize {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            notification_timeout_secs: default_notification_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            rule_refresh_secs: default_rule_refresh_secs(),
            feed_poll_ms: default_feed_poll_ms(),
            feed_batch_size: default_feed_batch_size(),
            reaction_workers: default_reaction_workers(),
            dispatch_workers: default_dispatch_workers(),
            queue_capacity: default_queue_capacity(),
            resume_interval_secs: default_resume_interval_secs(),
            writer_max_attempts: default_writer_max_attempts(),
            writer_backoff_ms: default_writer_backoff_ms(),
            history_retention_minutes: default_history_retention_minutes(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            log_format: default_log_format(),
            seed_path: None,
            channels: Vec::new(),
            anomaly: AnomalyConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path, e))?;
        Ok(config)
    }

    /// Rejects settings the pipeline cannot run with. Called once at startup
    /// and by `check-config`.
    pub fn validate(&self, plugins: &ChannelRegistry) -> anyhow::Result<()> {
        let positive = [
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("notification_timeout_secs", self.notification_timeout_secs),
            ("rule_refresh_secs", self.rule_refresh_secs),
            ("feed_poll_ms", self.feed_poll_ms),
            ("resume_interval_secs", self.resume_interval_secs),
            ("writer_max_attempts", u64::from(self.writer_max_attempts)),
        ];
        for (field, value) in positive {
            if value == 0 {
                bail!("{field} must be greater than 0");
            }
        }
        let sizes = [
            ("feed_batch_size", self.feed_batch_size),
            ("reaction_workers", self.reaction_workers),
            ("dispatch_workers", self.dispatch_workers),
            ("queue_capacity", self.queue_capacity),
        ];
        for (field, value) in sizes {
            if value == 0 {
                bail!("{field} must be greater than 0");
            }
        }

        if !matches!(self.log_format.as_str(), "text" | "json") {
            bail!(
                "log_format must be \"text\" or \"json\" (got \"{}\")",
                self.log_format
            );
        }

        if self.anomaly.enabled && !(self.anomaly.z_score_scale.is_finite() && self.anomaly.z_score_scale > 0.0) {
            bail!(
                "anomaly.z_score_scale must be a positive number (got {})",
                self.anomaly.z_score_scale
            );
        }

        let mut names = HashSet::new();
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                bail!("channel name must not be empty");
            }
            if !names.insert(channel.name.as_str()) {
                bail!("duplicate channel name '{}'", channel.name);
            }
            plugins
                .validate_config(&channel.channel_type, &channel.config)
                .map_err(|e| anyhow::anyhow!("channel '{}': {}", channel.name, e))?;
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.retry_backoff_ms),
            timeout: Duration::from_secs(self.notification_timeout_secs),
        }
    }
}

impl SeedFile {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", path, e))?;
        let seed: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", path, e))?;
        Ok(seed)
    }
}
