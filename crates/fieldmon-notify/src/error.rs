/// Errors that can occur within the notification subsystem.
///
/// The dispatcher uses [`NotifyError::is_retryable`] to decide whether a
/// failed attempt is worth another round.
///
/// # Examples
///
/// ```rust
/// use fieldmon_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing smtp_host".to_string());
/// assert!(err.to_string().contains("smtp_host"));
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The channel type is not registered in the plugin registry.
    #[error("Notify: unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// No sender is registered under the channel name a rule refers to.
    #[error("Notify: no sender registered for channel '{0}'")]
    UnknownChannel(String),

    /// Neither the alert nor the channel configuration provides an address.
    #[error("Notify: channel '{channel}' has no destination address")]
    MissingAddress { channel: String },

    /// A single attempt did not finish in time.
    #[error("Notify: channel '{channel}' timed out after {after_ms} ms")]
    Timeout { channel: String, after_ms: u64 },

    /// An HTTP request to an external notification endpoint failed.
    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// SMTP transport error when sending email.
    #[error("Notify: SMTP error: {0}")]
    SmtpError(String),

    /// JSON serialization or deserialization failed (e.g. channel config parsing).
    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The external API returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    ApiError {
        service: String,
        status: u16,
        body: String,
    },

    /// Generic notification error for cases not covered by other variants.
    #[error("Notify: {0}")]
    Other(String),
}

impl NotifyError {
    /// False for errors that another attempt cannot fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::InvalidConfig(_)
            | NotifyError::UnknownChannelType(_)
            | NotifyError::UnknownChannel(_)
            | NotifyError::MissingAddress { .. }
            | NotifyError::JsonError(_) => false,
            // Client errors other than timeout / rate limiting will not change
            NotifyError::ApiError { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            _ => true,
        }
    }
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
