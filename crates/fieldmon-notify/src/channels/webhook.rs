use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::NotificationChannel;
use async_trait::async_trait;
use fieldmon_common::types::AlertEvent;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Posts the alert as JSON to the rule's `webhook_url`, or to the channel's
/// default `url` when the rule has none.
pub struct WebhookChannel {
    name: String,
    client: reqwest::Client,
    default_url: Option<String>,
    headers: HashMap<String, String>,
}

impl WebhookChannel {
    pub fn new(name: &str, default_url: Option<String>, headers: HashMap<String, String>) -> Self {
        Self {
            name: name.to_string(),
            client: reqwest::Client::new(),
            default_url,
            headers,
        }
    }

    fn render_body(alert: &AlertEvent) -> Value {
        serde_json::json!({
            "alert_id": alert.id,
            "rule_id": alert.rule_id,
            "rule_name": alert.rule_name,
            "check_type": alert.rule_kind.as_str(),
            "severity": alert.severity.to_string(),
            "device_id": alert.device_id,
            "reading_id": alert.reading_id,
            "observed_value": alert.observed_value,
            "message": alert.message,
            "triggered_at": alert.triggered_at.to_rfc3339(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, alert: &AlertEvent) -> Result<()> {
        let url = alert
            .webhook_url
            .as_deref()
            .or(self.default_url.as_deref())
            .ok_or_else(|| NotifyError::MissingAddress {
                channel: self.name.clone(),
            })?;

        let mut request = self.client.post(url).json(&Self::render_body(alert));
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = match resp.text().await {
            Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
            Err(e) => format!("[Failed to read response body: {e}]"),
        };
        Err(NotifyError::ApiError {
            service: format!("webhook {url}"),
            status: status.as_u16(),
            body,
        })
    }

    fn channel_name(&self) -> &str {
        &self.name
    }
}

// Plugin

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WebhookConfig {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

pub struct WebhookPlugin;

impl WebhookPlugin {
    fn parse(config: &Value) -> Result<WebhookConfig> {
        let cfg: WebhookConfig = if config.is_null() {
            WebhookConfig {
                url: None,
                headers: HashMap::new(),
            }
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?
        };
        if let Some(url) = &cfg.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(NotifyError::InvalidConfig(format!(
                    "webhook: url must start with http:// or https:// (got '{url}')"
                )));
            }
        }
        Ok(cfg)
    }
}

impl ChannelPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        Self::parse(config).map(|_| ())
    }

    fn create_channel(&self, channel_name: &str, config: &Value) -> Result<Arc<dyn NotificationChannel>> {
        let cfg = Self::parse(config)?;
        Ok(Arc::new(WebhookChannel::new(channel_name, cfg.url, cfg.headers)))
    }
}
