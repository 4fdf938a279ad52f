//! Store error types

/// Errors that can occur while querying the statistic store
///
/// Every variant carries owned strings so results can be cloned and fanned
/// out to several waiters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Query execution failed
    #[error("query execution failed: {0}")]
    Execution(String),

    /// Identifier rejected before reaching the store
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Response could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether retrying the same query later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors that can occur while committing a statistic event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Store refused the event
    #[error("event rejected: {0}")]
    Rejected(String),

    /// Parameter value is not a JSON scalar or its key is malformed
    #[error("invalid parameter '{key}': {reason}")]
    InvalidParameter {
        /// Parameter key
        key: String,
        /// Why it was refused
        reason: String,
    },

    /// Parameter key is not allowed by the metric
    #[error("parameter '{0}' is guarded; add it to the metric's fillable list")]
    Guarded(String),
}

impl WriteError {
    /// Create an InvalidParameter error
    pub fn invalid_parameter(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
