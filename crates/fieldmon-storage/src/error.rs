/// Errors returned by the repositories and the alert sink.
///
/// Callers distinguish failures worth retrying from permanent ones with
/// [`StorageError::is_transient`]: the scheduler defers and retries work on
/// transient errors, and the alert writer retries with backoff before
/// escalating.
///
/// # Examples
///
/// ```rust
/// use fieldmon_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert",
///     id: "1801".to_string(),
/// };
/// assert!(err.to_string().contains("alert"));
/// assert!(!err.is_transient());
///
/// let err = StorageError::Unavailable("connection reset".to_string());
/// assert!(err.is_transient());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// The backend is temporarily unreachable or overloaded.
    #[error("Storage: backend unavailable: {0}")]
    Unavailable(String),

    /// A write conflicts with the stored record, e.g. an attempt to change
    /// an immutable field.
    #[error("Storage: conflicting write to {entity} (id={id}): {reason}")]
    Conflict {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// JSON serialization or deserialization failure (seed files, payloads).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

impl StorageError {
    /// True when retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            StorageError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
