use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Free-form measurement map of a reading, e.g. `{"temp_c": 9.2, "door": "open"}`.
pub type Payload = HashMap<String, Value>;

/// Quality floor below which a reading is considered invalid.
pub const DEFAULT_QUALITY_FLOOR: f64 = 0.7;

/// Sentinel written by field firmware when a sensor could not be read.
const SENSOR_ERROR_SENTINEL: f64 = -999.0;

/// One timestamped measurement batch from a device. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: String,
    pub device_id: String,
    #[serde(default)]
    pub payload: Payload,
    /// Quality indicator in `[0, 1]`, absent when ingestion did not score it.
    #[serde(default)]
    pub quality_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Why a payload key could not produce a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoDataReason {
    Missing,
    NotNumeric,
    NonFinite,
}

impl std::fmt::Display for NoDataReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoDataReason::Missing => write!(f, "key missing from payload"),
            NoDataReason::NotNumeric => write!(f, "value is not numeric"),
            NoDataReason::NonFinite => write!(f, "value is not finite"),
        }
    }
}

impl Reading {
    /// Returns the numeric value stored under `key`.
    ///
    /// Only JSON numbers count; a string such as `"9.2"` is reported as
    /// [`NoDataReason::NotNumeric`].
    pub fn numeric(&self, key: &str) -> Result<f64, NoDataReason> {
        let value = self.payload.get(key).ok_or(NoDataReason::Missing)?;
        let number = value.as_f64().ok_or(NoDataReason::NotNumeric)?;
        if number.is_finite() {
            Ok(number)
        } else {
            Err(NoDataReason::NonFinite)
        }
    }
}

/// Basic quality score assigned at ingestion when the device sent none.
///
/// An empty payload scores 0.0; every numeric `-999` sentinel costs 0.3.
///
/// # Examples
///
/// ```
/// use fieldmon_common::types::{quality_score, Payload};
///
/// let mut payload = Payload::new();
/// payload.insert("temp_c".into(), serde_json::json!(21.5));
/// assert_eq!(quality_score(&payload), 1.0);
///
/// payload.insert("humidity_pct".into(), serde_json::json!(-999));
/// assert!((quality_score(&payload) - 0.7).abs() < 1e-9);
/// ```
pub fn quality_score(payload: &Payload) -> f64 {
    if payload.is_empty() {
        return 0.0;
    }
    let sentinels = payload
        .values()
        .filter_map(Value::as_f64)
        .filter(|v| *v == SENSOR_ERROR_SENTINEL)
        .count();
    (1.0 - 0.3 * sentinels as f64).clamp(0.0, 1.0)
}

/// Device record as seen by the alerting core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Most recent contact; absent if the device never reported.
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use fieldmon_common::types::Severity;
///
/// let sev: Severity = "critical".parse().unwrap();
/// assert_eq!(sev, Severity::Critical);
/// assert_eq!(sev.to_string(), "critical");
/// assert!(Severity::Critical > Severity::Info);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// The closed set of checks a rule can perform.
///
/// Stored names from older schemas (`THRESHOLD_ABOVE`, `ANOMALY_ML`, ...)
/// are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckKind {
    #[serde(alias = "THRESHOLD_ABOVE")]
    Above,
    #[serde(alias = "THRESHOLD_BELOW")]
    Below,
    #[serde(alias = "THRESHOLD_RANGE")]
    Range,
    RateOfChange,
    DeviceOffline,
    SensorFault,
    #[serde(alias = "ANOMALY_ML")]
    Anomaly,
}

impl CheckKind {
    pub const ALL: [CheckKind; 7] = [
        CheckKind::Above,
        CheckKind::Below,
        CheckKind::Range,
        CheckKind::RateOfChange,
        CheckKind::DeviceOffline,
        CheckKind::SensorFault,
        CheckKind::Anomaly,
    ];

    /// True for kinds driven by the periodic sweep rather than by readings.
    pub fn is_sweep_driven(self) -> bool {
        matches!(self, CheckKind::DeviceOffline)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckKind::Above => "ABOVE",
            CheckKind::Below => "BELOW",
            CheckKind::Range => "RANGE",
            CheckKind::RateOfChange => "RATE_OF_CHANGE",
            CheckKind::DeviceOffline => "DEVICE_OFFLINE",
            CheckKind::SensorFault => "SENSOR_FAULT",
            CheckKind::Anomaly => "ANOMALY",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ABOVE" | "THRESHOLD_ABOVE" => Ok(CheckKind::Above),
            "BELOW" | "THRESHOLD_BELOW" => Ok(CheckKind::Below),
            "RANGE" | "THRESHOLD_RANGE" => Ok(CheckKind::Range),
            "RATE_OF_CHANGE" => Ok(CheckKind::RateOfChange),
            "DEVICE_OFFLINE" => Ok(CheckKind::DeviceOffline),
            "SENSOR_FAULT" => Ok(CheckKind::SensorFault),
            "ANOMALY" | "ANOMALY_ML" => Ok(CheckKind::Anomaly),
            _ => Err(format!("unknown check kind: {s}")),
        }
    }
}

/// Which devices a rule applies to.
///
/// Serialized as `{"type": "device", "id": "D-1"}`, `{"type": "location", "id": "L-1"}`
/// or `{"type": "global"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum RuleScope {
    Device(String),
    Location(String),
    Global,
}

impl RuleScope {
    pub fn covers(&self, device_id: &str, location_id: Option<&str>) -> bool {
        match self {
            RuleScope::Device(id) => id == device_id,
            RuleScope::Location(id) => location_id == Some(id.as_str()),
            RuleScope::Global => true,
        }
    }
}

impl std::fmt::Display for RuleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleScope::Device(id) => write!(f, "device:{id}"),
            RuleScope::Location(id) => write!(f, "location:{id}"),
            RuleScope::Global => write!(f, "global"),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown_minutes() -> u32 {
    30
}

/// Operator-defined condition plus its notification configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "check_type")]
    pub kind: CheckKind,
    /// Payload key to evaluate (e.g. `temp_c`). Unused by `DEVICE_OFFLINE`
    /// and `SENSOR_FAULT`.
    #[serde(default)]
    pub variable_key: String,
    #[serde(default)]
    pub threshold_value: Option<f64>,
    #[serde(default)]
    pub threshold_min: Option<f64>,
    #[serde(default)]
    pub threshold_max: Option<f64>,
    #[serde(default)]
    pub time_window_minutes: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
    #[serde(default)]
    pub severity: Severity,
    pub scope: RuleScope,
    #[serde(default)]
    pub notification_channels: Vec<String>,
    /// Per-rule address for the `webhook` channel.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl AlertRule {
    pub fn cooldown(&self) -> Duration {
        Duration::minutes(i64::from(self.cooldown_minutes))
    }

    pub fn time_window(&self) -> Option<Duration> {
        self.time_window_minutes
            .map(|m| Duration::minutes(i64::from(m)))
    }

    /// Display name, falling back to the rule id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Delivery state of one channel for one alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Success => write!(f, "success"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryOutcome {
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: DeliveryStatus::Pending,
            attempts: 0,
            error: None,
            updated_at: now,
        }
    }

    pub fn success(attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            status: DeliveryStatus::Success,
            attempts,
            error: None,
            updated_at: now,
        }
    }

    pub fn failed(attempts: u32, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            attempts,
            error: Some(reason.into()),
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }
}

/// Persisted record of one accepted rule violation.
///
/// Only `notifications` and the acknowledgement fields change after the
/// record is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub rule_kind: CheckKind,
    pub severity: Severity,
    pub device_id: String,
    /// Absent for `DEVICE_OFFLINE`.
    pub reading_id: Option<String>,
    pub observed_value: Option<f64>,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    /// Channel name -> delivery outcome.
    #[serde(default)]
    pub notifications: BTreeMap<String, DeliveryOutcome>,
    /// Rule-level address passed to channels that need one (webhook URL).
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl AlertEvent {
    pub fn pending_channels(&self) -> Vec<String> {
        self.notifications
            .iter()
            .filter(|(_, outcome)| outcome.is_pending())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn has_pending_deliveries(&self) -> bool {
        self.notifications.values().any(DeliveryOutcome::is_pending)
    }
}

/// Minimal view of a past firing, used to warm the cooldown tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiringRecord {
    pub rule_id: String,
    pub device_id: String,
    pub reading_id: Option<String>,
    pub triggered_at: DateTime<Utc>,
}

impl From<&AlertEvent> for FiringRecord {
    fn from(event: &AlertEvent) -> Self {
        Self {
            rule_id: event.rule_id.clone(),
            device_id: event.device_id.clone(),
            reading_id: event.reading_id.clone(),
            triggered_at: event.triggered_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reading(payload: Value) -> Reading {
        let payload = match payload {
            Value::Object(map) => map.into_iter().collect(),
            _ => Payload::new(),
        };
        Reading {
            id: "r-1".into(),
            device_id: "D".into(),
            payload,
            quality_score: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn numeric_distinguishes_missing_and_non_numeric() {
        let r = reading(json!({"temp_c": 9.2, "door": "open", "count": 3}));
        assert_eq!(r.numeric("temp_c"), Ok(9.2));
        assert_eq!(r.numeric("count"), Ok(3.0));
        assert_eq!(r.numeric("door"), Err(NoDataReason::NotNumeric));
        assert_eq!(r.numeric("humidity_pct"), Err(NoDataReason::Missing));
    }

    #[test]
    fn numeric_rejects_numeric_looking_strings() {
        let r = reading(json!({"temp_c": "9.2"}));
        assert_eq!(r.numeric("temp_c"), Err(NoDataReason::NotNumeric));
    }

    #[test]
    fn quality_score_of_empty_payload_is_zero() {
        assert_eq!(quality_score(&Payload::new()), 0.0);
    }

    #[test]
    fn quality_score_clamps_at_zero() {
        let r = reading(json!({"a": -999, "b": -999.0, "c": -999, "d": -999}));
        assert_eq!(quality_score(&r.payload), 0.0);
    }

    #[test]
    fn check_kind_accepts_legacy_names() {
        let kind: CheckKind = serde_json::from_value(json!("THRESHOLD_RANGE")).unwrap();
        assert_eq!(kind, CheckKind::Range);
        let kind: CheckKind = serde_json::from_value(json!("ANOMALY_ML")).unwrap();
        assert_eq!(kind, CheckKind::Anomaly);
        assert_eq!("rate_of_change".parse::<CheckKind>(), Ok(CheckKind::RateOfChange));
        assert!("SOMETHING_ELSE".parse::<CheckKind>().is_err());
        for kind in CheckKind::ALL {
            assert_eq!(kind.as_str().parse::<CheckKind>(), Ok(kind));
        }
    }

    #[test]
    fn rule_deserializes_with_defaults() {
        let rule: AlertRule = serde_json::from_value(json!({
            "id": "r1",
            "check_type": "ABOVE",
            "variable_key": "temp_c",
            "threshold_value": 8.0,
            "scope": {"type": "device", "id": "D"},
            "notification_channels": ["email"]
        }))
        .unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.cooldown_minutes, 30);
        assert_eq!(rule.severity, Severity::Warning);
        assert_eq!(rule.scope, RuleScope::Device("D".into()));
        assert_eq!(rule.display_name(), "r1");
    }

    #[test]
    fn global_scope_round_trips_without_id() {
        let scope: RuleScope = serde_json::from_value(json!({"type": "global"})).unwrap();
        assert_eq!(scope, RuleScope::Global);
        assert!(scope.covers("any", None));
    }

    #[test]
    fn scope_coverage() {
        let by_location = RuleScope::Location("L1".into());
        assert!(by_location.covers("D", Some("L1")));
        assert!(!by_location.covers("D", Some("L2")));
        assert!(!by_location.covers("D", None));
        assert!(RuleScope::Device("D".into()).covers("D", None));
    }

    #[test]
    fn pending_channels_lists_only_pending() {
        let now = Utc::now();
        let mut notifications = BTreeMap::new();
        notifications.insert("email".to_string(), DeliveryOutcome::success(1, now));
        notifications.insert("webhook".to_string(), DeliveryOutcome::pending(now));
        let event = AlertEvent {
            id: "a1".into(),
            rule_id: "r1".into(),
            rule_name: "r1".into(),
            rule_kind: CheckKind::Above,
            severity: Severity::Warning,
            device_id: "D".into(),
            reading_id: None,
            observed_value: None,
            message: String::new(),
            triggered_at: now,
            notifications,
            webhook_url: None,
            acknowledged_by: None,
            acknowledged_at: None,
        };
        assert!(event.has_pending_deliveries());
        assert_eq!(event.pending_channels(), vec!["webhook".to_string()]);
    }
}
