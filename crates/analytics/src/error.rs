//! Analytics error types

use std::time::Duration;

use thiserror::Error;

use tally_query::{StoreError, WriteError};

/// Analytics errors
///
/// Cloneable so a single computation's outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    /// Query spec failed validation
    #[error("invalid query: {0}")]
    InvalidQuerySpec(String),

    /// Unsupported granularity tag
    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    /// Unsupported aggregate token
    #[error("unknown aggregate: {0}")]
    UnknownAggregate(String),

    /// `unique_by` combined with an aggregate other than count
    #[error("aggregate '{aggregate}' cannot be combined with unique_by '{unique_by}'")]
    UnsupportedAggregateCombination {
        /// Requested aggregate
        aggregate: String,
        /// Requested unique-by key
        unique_by: String,
    },

    /// Column or parameter key outside the identifier pattern
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Builder operation not known to the query or its metric
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Invalid time range
    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    /// Store call exceeded the query timeout
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// Store error (from tally-query)
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Event commit failed
    #[error("write error: {0}")]
    Write(#[from] WriteError),
}

impl AnalyticsError {
    /// Whether the same query may succeed if retried later
    ///
    /// Validation failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Store(err) => err.is_transient(),
            Self::Write(WriteError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

/// Result type for analytics operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;
