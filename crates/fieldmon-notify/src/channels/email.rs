use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::NotificationChannel;
use async_trait::async_trait;
use fieldmon_common::types::AlertEvent;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub struct EmailChannel {
    name: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl EmailChannel {
    pub fn new(
        name: &str,
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
        recipients: &[String],
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(|e| NotifyError::InvalidConfig(format!("email: smtp_host: {e}")))?
            .port(smtp_port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        let from = parse_mailbox(from)?;
        let recipients = recipients
            .iter()
            .map(|r| parse_mailbox(r))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            transport: builder.build(),
            from,
            recipients,
        })
    }

    fn subject(alert: &AlertEvent) -> String {
        format!(
            "[fieldmon][{}] {} - {}",
            alert.severity, alert.rule_name, alert.device_id
        )
    }

    fn format_body(alert: &AlertEvent) -> String {
        let value_line = alert
            .observed_value
            .map(|v| format!("\nValue: {v:.2}"))
            .unwrap_or_default();
        let reading_line = alert
            .reading_id
            .as_deref()
            .map(|id| format!("\nReading: {id}"))
            .unwrap_or_default();
        format!(
            "Alert: {severity}\nRule: {rule} ({kind})\nDevice: {device}{value_line}{reading_line}\nMessage: {message}\nTime: {time}",
            severity = alert.severity,
            rule = alert.rule_name,
            kind = alert.rule_kind,
            device = alert.device_id,
            message = alert.message,
            time = alert.triggered_at.to_rfc3339(),
        )
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| NotifyError::InvalidConfig(format!("email: invalid address '{address}': {e}")))
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, alert: &AlertEvent) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(NotifyError::MissingAddress {
                channel: self.name.clone(),
            });
        }

        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(Self::subject(alert))
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        let email = builder
            .body(Self::format_body(alert))
            .map_err(|e| NotifyError::Other(format!("email: failed to build message: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::SmtpError(e.to_string()))?;
        Ok(())
    }

    fn channel_name(&self) -> &str {
        &self.name
    }
}

// Plugin

fn default_smtp_port() -> u16 {
    587
}

#[derive(Deserialize)]
struct EmailConfig {
    smtp_host: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    from: String,
    #[serde(default)]
    recipients: Vec<String>,
}

pub struct EmailPlugin;

impl EmailPlugin {
    fn parse(config: &Value) -> Result<EmailConfig> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        if cfg.recipients.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "email: at least one recipient is required".to_string(),
            ));
        }
        parse_mailbox(&cfg.from)?;
        for recipient in &cfg.recipients {
            parse_mailbox(recipient)?;
        }
        Ok(cfg)
    }
}

impl ChannelPlugin for EmailPlugin {
    fn name(&self) -> &str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        Self::parse(config).map(|_| ())
    }

    fn create_channel(&self, channel_name: &str, config: &Value) -> Result<Arc<dyn NotificationChannel>> {
        let cfg = Self::parse(config)?;
        let channel = EmailChannel::new(
            channel_name,
            &cfg.smtp_host,
            cfg.smtp_port,
            cfg.smtp_username.as_deref(),
            cfg.smtp_password.as_deref(),
            &cfg.from,
            &cfg.recipients,
        )?;
        Ok(Arc::new(channel))
    }

    fn redact_config(&self, config: &Value) -> Value {
        let mut redacted = config.clone();
        if let Some(obj) = redacted.as_object_mut() {
            if obj.contains_key("smtp_password") {
                obj.insert(
                    "smtp_password".to_string(),
                    Value::String("***".to_string()),
                );
            }
        }
        redacted
    }
}
