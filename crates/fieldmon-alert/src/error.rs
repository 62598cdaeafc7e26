use fieldmon_common::types::CheckKind;

/// Rule configuration errors detected when rules are loaded into the index.
///
/// A rule that fails validation is excluded from evaluation and logged; it
/// is never applied with undefined parameters.
///
/// # Examples
///
/// ```rust
/// use fieldmon_alert::error::RuleConfigError;
///
/// let err = RuleConfigError::InvalidRange {
///     rule_id: "r-7".to_string(),
///     min: 10.0,
///     max: 5.0,
/// };
/// assert!(err.to_string().contains("r-7"));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleConfigError {
    #[error("Alert: rule {rule_id} ({kind}) requires a variable_key")]
    MissingVariableKey { rule_id: String, kind: CheckKind },

    #[error("Alert: rule {rule_id} ({kind}) requires {field}")]
    MissingParameter {
        rule_id: String,
        kind: CheckKind,
        field: &'static str,
    },

    #[error("Alert: rule {rule_id} has non-finite {field}")]
    NonFinite { rule_id: String, field: &'static str },

    #[error("Alert: rule {rule_id} requires threshold_min < threshold_max (got {min} >= {max})")]
    InvalidRange { rule_id: String, min: f64, max: f64 },

    #[error("Alert: rule {rule_id} ({kind}) requires a positive time_window_minutes")]
    NonPositiveWindow { rule_id: String, kind: CheckKind },

    #[error("Alert: rule {rule_id} has {field}={value}, expected {expected}")]
    OutOfRange {
        rule_id: String,
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("Alert: rule {rule_id} has an empty scope id")]
    EmptyScope { rule_id: String },

    #[error("Alert: duplicate rule id {rule_id}")]
    DuplicateId { rule_id: String },
}

pub type Result<T> = std::result::Result<T, RuleConfigError>;
