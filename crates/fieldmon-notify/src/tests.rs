use crate::channels::log::LogChannel;
use crate::channels::webhook::WebhookChannel;
use crate::dispatcher::{NotificationDispatcher, RetryPolicy};
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelRegistry;
use crate::registry::SenderRegistry;
use crate::NotificationChannel;
use async_trait::async_trait;
use chrono::Utc;
use fieldmon_common::types::{AlertEvent, CheckKind, DeliveryStatus, Severity};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn make_alert() -> AlertEvent {
    AlertEvent {
        id: "1801".to_string(),
        rule_id: "cold-chain".to_string(),
        rule_name: "Cold chain".to_string(),
        rule_kind: CheckKind::Above,
        severity: Severity::Critical,
        device_id: "D".to_string(),
        reading_id: Some("rd-1".to_string()),
        observed_value: Some(9.2),
        message: "[critical] Cold chain: temp_c = 9.20 is above threshold 8.00 (device D)"
            .to_string(),
        triggered_at: Utc::now(),
        notifications: BTreeMap::new(),
        webhook_url: None,
        acknowledged_by: None,
        acknowledged_at: None,
    }
}

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff_base: Duration::from_millis(100),
        timeout: Duration::from_secs(1),
    }
}

fn channels(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Fails the first `failures` calls, then succeeds.
struct Scripted {
    name: &'static str,
    failures: u32,
    calls: AtomicU32,
}

impl Scripted {
    fn new(name: &'static str, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            name,
            failures,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for Scripted {
    async fn send(&self, _alert: &AlertEvent) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(NotifyError::ApiError {
                service: self.name.to_string(),
                status: 503,
                body: "unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn channel_name(&self) -> &str {
        self.name
    }
}

/// Never answers within any sane timeout.
struct Stalled;

#[async_trait]
impl NotificationChannel for Stalled {
    async fn send(&self, _alert: &AlertEvent) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "stalled"
    }
}

fn sender<C: NotificationChannel + 'static>(channel: &Arc<C>) -> Arc<dyn NotificationChannel> {
    channel.clone()
}

fn dispatcher(senders: Vec<(&str, Arc<dyn NotificationChannel>)>, policy: RetryPolicy) -> NotificationDispatcher {
    let mut registry = SenderRegistry::new();
    for (name, sender) in senders {
        registry.register(name, sender);
    }
    NotificationDispatcher::new(Arc::new(registry), policy)
}

#[tokio::test(start_paused = true)]
async fn failing_webhook_does_not_drop_email_outcome() {
    let email = Scripted::new("email", 0);
    let webhook = Scripted::new("webhook", u32::MAX);
    let d = dispatcher(
        vec![("email", sender(&email)), ("webhook", sender(&webhook))],
        policy(3),
    );

    let outcomes = d.dispatch(&make_alert(), &channels(&["email", "webhook"])).await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes["email"].status, DeliveryStatus::Success);
    assert_eq!(outcomes["email"].attempts, 1);
    assert_eq!(outcomes["webhook"].status, DeliveryStatus::Failed);
    assert_eq!(outcomes["webhook"].attempts, 4);
    assert!(outcomes["webhook"]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("503"));
    assert_eq!(email.calls(), 1);
    assert_eq!(webhook.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_success() {
    let flaky = Scripted::new("webhook", 2);
    let d = dispatcher(vec![("webhook", sender(&flaky))], policy(3));

    let outcomes = d.dispatch(&make_alert(), &channels(&["webhook"])).await;
    assert_eq!(outcomes["webhook"].status, DeliveryStatus::Success);
    assert_eq!(outcomes["webhook"].attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_attempts() {
    let failing = Scripted::new("webhook", u32::MAX);
    let d = dispatcher(vec![("webhook", sender(&failing))], policy(3));

    let started = tokio::time::Instant::now();
    d.dispatch(&make_alert(), &channels(&["webhook"])).await;
    let elapsed = started.elapsed();

    // 100 + 200 + 400 ms of backoff, no sleep after the last attempt
    assert!(elapsed >= Duration::from_millis(700), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(800), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn timeout_counts_as_failed_attempt() {
    let d = dispatcher(vec![("stalled", sender(&Arc::new(Stalled)))], policy(1));

    let outcomes = d.dispatch(&make_alert(), &channels(&["stalled"])).await;
    let outcome = &outcomes["stalled"];
    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert_eq!(outcome.attempts, 2);
    assert!(outcome.error.as_deref().unwrap_or_default().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn zero_retries_means_single_attempt() {
    let failing = Scripted::new("webhook", u32::MAX);
    let d = dispatcher(vec![("webhook", sender(&failing))], policy(0));

    let outcomes = d.dispatch(&make_alert(), &channels(&["webhook"])).await;
    assert_eq!(outcomes["webhook"].attempts, 1);
    assert_eq!(failing.calls(), 1);
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
    // No URL on the alert or the channel
    let webhook: Arc<dyn NotificationChannel> =
        Arc::new(WebhookChannel::new("webhook", None, HashMap::new()));
    let d = dispatcher(vec![("webhook", webhook)], policy(3));

    let outcomes = d.dispatch(&make_alert(), &channels(&["webhook"])).await;
    assert_eq!(outcomes["webhook"].status, DeliveryStatus::Failed);
    assert_eq!(outcomes["webhook"].attempts, 1);
    assert!(outcomes["webhook"]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("no destination address"));
}

#[tokio::test]
async fn unknown_channel_is_reported_failed() {
    let log: Arc<dyn NotificationChannel> = Arc::new(LogChannel::new("log"));
    let d = dispatcher(vec![("log", log)], policy(3));

    let outcomes = d
        .dispatch(&make_alert(), &channels(&["log", "pager", "log"]))
        .await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes["log"].status, DeliveryStatus::Success);
    assert_eq!(outcomes["pager"].status, DeliveryStatus::Failed);
    assert_eq!(outcomes["pager"].attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn fanout_reports_channels_as_they_finish() {
    let fast = Scripted::new("email", 0);
    let d = dispatcher(
        vec![("email", sender(&fast)), ("stalled", sender(&Arc::new(Stalled)))],
        RetryPolicy {
            timeout: Duration::from_secs(30),
            ..policy(0)
        },
    );

    let mut fanout = d.start(Arc::new(make_alert()), &channels(&["stalled", "email"]));
    let (first, outcome) = fanout.next().await.unwrap();
    assert_eq!(first, "email");
    assert_eq!(outcome.status, DeliveryStatus::Success);

    let (second, outcome) = fanout.next().await.unwrap();
    assert_eq!(second, "stalled");
    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert!(fanout.next().await.is_none());
}

#[test]
fn backoff_is_capped() {
    let p = RetryPolicy {
        max_retries: 50,
        backoff_base: Duration::from_secs(1),
        timeout: Duration::from_secs(1),
    };
    assert_eq!(p.backoff_for(1), Duration::from_secs(1));
    assert_eq!(p.backoff_for(2), Duration::from_secs(2));
    assert_eq!(p.backoff_for(40), Duration::from_secs(60));
}

#[test]
fn sender_registry_builds_channels_from_config() {
    let plugins = ChannelRegistry::default();
    let mut senders = SenderRegistry::new();

    senders
        .register_from_config(&plugins, "ops-log", "log", &serde_json::Value::Null)
        .unwrap();
    senders
        .register_from_config(
            &plugins,
            "webhook",
            "webhook",
            &serde_json::json!({"url": "https://hooks.example.com/fieldmon"}),
        )
        .unwrap();
    assert_eq!(senders.names(), vec!["ops-log", "webhook"]);
    assert_eq!(senders.get("ops-log").unwrap().channel_name(), "ops-log");

    let dup = senders.register_from_config(&plugins, "webhook", "log", &serde_json::Value::Null);
    assert!(matches!(dup, Err(NotifyError::InvalidConfig(_))));

    let unknown = senders.register_from_config(&plugins, "sms", "sms", &serde_json::Value::Null);
    assert!(matches!(unknown, Err(NotifyError::UnknownChannelType(_))));
}

#[test]
fn plugins_validate_their_configs() {
    let plugins = ChannelRegistry::default();
    assert_eq!(plugins.plugin_names(), vec!["email", "log", "webhook"]);

    assert!(plugins
        .validate_config("webhook", &serde_json::json!({"url": "ftp://nope"}))
        .is_err());
    assert!(plugins.validate_config("webhook", &serde_json::Value::Null).is_ok());

    let email = serde_json::json!({
        "smtp_host": "smtp.example.com",
        "from": "alerts@example.com",
        "smtp_password": "hunter2",
        "recipients": ["ops@example.com"]
    });
    assert!(plugins.validate_config("email", &email).is_ok());

    let no_recipients = serde_json::json!({
        "smtp_host": "smtp.example.com",
        "from": "alerts@example.com"
    });
    assert!(plugins.validate_config("email", &no_recipients).is_err());

    let bad_from = serde_json::json!({
        "smtp_host": "smtp.example.com",
        "from": "not an address",
        "recipients": ["ops@example.com"]
    });
    assert!(plugins.validate_config("email", &bad_from).is_err());

    assert!(plugins
        .validate_config("log", &serde_json::json!({"level": "debug"}))
        .is_err());
}

#[test]
fn retryable_classification() {
    let api = |status| NotifyError::ApiError {
        service: "webhook".to_string(),
        status,
        body: String::new(),
    };
    assert!(api(500).is_retryable());
    assert!(api(429).is_retryable());
    assert!(!api(404).is_retryable());
    assert!(NotifyError::Timeout {
        channel: "email".to_string(),
        after_ms: 10
    }
    .is_retryable());
    assert!(!NotifyError::UnknownChannel("pager".to_string()).is_retryable());
}
