use crate::error::StorageError;
use crate::memory::MemoryStore;
use crate::{AlertSink, DeviceRepository, ReadingFeed, RuleRepository};
use chrono::{DateTime, Duration, TimeZone, Utc};
use fieldmon_common::types::{
    AlertEvent, AlertRule, CheckKind, DeliveryOutcome, DeliveryStatus, DeviceInfo, Payload, Reading,
    RuleScope, Severity,
};
use std::collections::BTreeMap;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

fn make_reading(id: &str, device: &str, ts: DateTime<Utc>) -> Reading {
    let mut payload = Payload::new();
    payload.insert("temp_c".to_string(), serde_json::json!(4.5));
    Reading {
        id: id.to_string(),
        device_id: device.to_string(),
        payload,
        quality_score: Some(1.0),
        timestamp: ts,
    }
}

fn make_alert(id: &str, at: DateTime<Utc>, channels: &[&str]) -> AlertEvent {
    AlertEvent {
        id: id.to_string(),
        rule_id: "r1".to_string(),
        rule_name: "cold chain".to_string(),
        rule_kind: CheckKind::Above,
        severity: Severity::Critical,
        device_id: "D".to_string(),
        reading_id: Some("rd-1".to_string()),
        observed_value: Some(9.2),
        message: "temp_c too high".to_string(),
        triggered_at: at,
        notifications: channels
            .iter()
            .map(|c| (c.to_string(), DeliveryOutcome::pending(at)))
            .collect::<BTreeMap<_, _>>(),
        webhook_url: None,
        acknowledged_by: None,
        acknowledged_at: None,
    }
}

fn make_rule(id: &str, enabled: bool) -> AlertRule {
    AlertRule {
        id: id.to_string(),
        name: String::new(),
        kind: CheckKind::Above,
        variable_key: "temp_c".to_string(),
        threshold_value: Some(8.0),
        threshold_min: None,
        threshold_max: None,
        time_window_minutes: None,
        enabled,
        cooldown_minutes: 30,
        severity: Severity::Warning,
        scope: RuleScope::Global,
        notification_channels: vec![],
        webhook_url: None,
    }
}

#[tokio::test]
async fn list_enabled_rules_skips_disabled() {
    let store = MemoryStore::new();
    store.upsert_rule(make_rule("a", true));
    store.upsert_rule(make_rule("b", false));
    store.upsert_rule(make_rule("c", true));

    let ids: Vec<String> = store
        .list_enabled_rules()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["a", "c"]);

    assert!(store.set_rule_enabled("b", true));
    assert!(store.remove_rule("a"));
    assert_eq!(store.list_enabled_rules().await.unwrap().len(), 2);
}

#[tokio::test]
async fn append_reading_tracks_last_seen() {
    let store = MemoryStore::new();
    store.upsert_device(DeviceInfo {
        id: "D".to_string(),
        location_id: Some("L1".to_string()),
        created_at: t0() - Duration::days(1),
        last_seen_at: None,
    });
    assert_eq!(store.last_seen("D").await.unwrap(), None);

    store.append_reading(make_reading("r1", "D", t0()));
    store.append_reading(make_reading("r0", "D", t0() - Duration::minutes(5)));
    assert_eq!(store.last_seen("D").await.unwrap(), Some(t0()));

    store.append_reading(make_reading("x1", "NEW", t0()));
    let registered = store.get_device("NEW").await.unwrap().unwrap();
    assert_eq!(registered.created_at, t0());
    assert_eq!(store.list_devices().await.unwrap().len(), 2);
}

#[tokio::test]
async fn feed_redelivers_until_acknowledged() {
    let store = MemoryStore::new();
    for i in 0..3 {
        store.append_reading(make_reading(&format!("r{i}"), "D", t0() + Duration::minutes(i)));
    }

    let first = store.poll(2).await.unwrap();
    assert_eq!(first.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["r0", "r1"]);
    let second = store.poll(10).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, "r2");
    assert!(store.poll(10).await.unwrap().is_empty());

    ReadingFeed::acknowledge(&store, &["r0".to_string()]).await.unwrap();
    assert_eq!(store.redeliver_unacknowledged(), 2);
    let again = store.poll(10).await.unwrap();
    assert_eq!(again.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["r1", "r2"]);
    assert_eq!(store.unacknowledged(), 2);
}

#[tokio::test]
async fn insert_alert_is_idempotent_by_id() {
    let store = MemoryStore::new();
    let alert = make_alert("a1", t0(), &["email"]);

    assert!(store.insert_alert(&alert).await.unwrap());
    assert!(!store.insert_alert(&alert).await.unwrap());
    assert_eq!(store.alert_count(), 1);

    let other = AlertEvent {
        triggered_at: t0() + Duration::minutes(1),
        ..alert
    };
    let err = store.insert_alert(&other).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));
}

#[tokio::test]
async fn update_delivery_changes_only_outcomes() {
    let store = MemoryStore::new();
    let alert = make_alert("a1", t0(), &["email", "webhook"]);
    store.insert_alert(&alert).await.unwrap();

    store
        .update_delivery("a1", "email", &DeliveryOutcome::success(1, t0()))
        .await
        .unwrap();
    store
        .update_delivery("a1", "webhook", &DeliveryOutcome::failed(4, "HTTP 500", t0()))
        .await
        .unwrap();

    let stored = store.get_alert("a1").await.unwrap().unwrap();
    assert_eq!(stored.notifications["email"].status, DeliveryStatus::Success);
    assert_eq!(stored.notifications["webhook"].status, DeliveryStatus::Failed);
    assert_eq!(stored.notifications["webhook"].error.as_deref(), Some("HTTP 500"));
    assert_eq!(stored.message, alert.message);
    assert_eq!(store.alert_count(), 1);

    let missing = store
        .update_delivery("nope", "email", &DeliveryOutcome::success(1, t0()))
        .await
        .unwrap_err();
    assert!(matches!(missing, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn acknowledge_records_user_and_time() {
    let store = MemoryStore::new();
    store.insert_alert(&make_alert("a1", t0(), &[])).await.unwrap();

    let at = t0() + Duration::minutes(10);
    AlertSink::acknowledge(&store, "a1", "ops-oncall", at).await.unwrap();
    let stored = store.get_alert("a1").await.unwrap().unwrap();
    assert_eq!(stored.acknowledged_by.as_deref(), Some("ops-oncall"));
    assert_eq!(stored.acknowledged_at, Some(at));
    assert_eq!(stored.triggered_at, t0());
}

#[tokio::test]
async fn pending_and_recent_queries() {
    let store = MemoryStore::new();
    store.insert_alert(&make_alert("old", t0() - Duration::hours(3), &["email"])).await.unwrap();
    store.insert_alert(&make_alert("new", t0(), &["email"])).await.unwrap();
    store
        .update_delivery("old", "email", &DeliveryOutcome::success(1, t0()))
        .await
        .unwrap();

    let pending = store.pending_deliveries(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "new");

    let recent = store.recent_firings(t0() - Duration::hours(1)).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].triggered_at, t0());

    let page = store.list_alerts(1, 1).await.unwrap();
    assert_eq!(page[0].id, "new");
}

#[test]
fn transient_classification() {
    assert!(StorageError::Unavailable("busy".into()).is_transient());
    assert!(StorageError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).is_transient());
    assert!(!StorageError::Other("bad".into()).is_transient());
}
