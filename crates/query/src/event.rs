//! Statistic event fact record
//!
//! One row of the fact table: `{id, metric_name, value, occurred_at, parameters}`.
//! The id is assigned by the store; everything else is fixed at commit time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WriteError;

/// Open attribute bag attached to an event
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Maximum length of a column, table or parameter key identifier
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// A recorded statistic event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticEvent {
    /// Metric this event belongs to
    pub metric_name: String,
    /// Signed integer delta
    pub value: i64,
    /// When the event happened
    pub occurred_at: DateTime<Utc>,
    /// Attribute bag (JSON scalars only)
    #[serde(default)]
    pub parameters: Parameters,
}

impl StatisticEvent {
    /// Create an event without parameters
    pub fn new(metric_name: impl Into<String>, value: i64, occurred_at: DateTime<Utc>) -> Self {
        Self {
            metric_name: metric_name.into(),
            value,
            occurred_at,
            parameters: Parameters::new(),
        }
    }

    /// Attach a parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Check the event against the write contract
    ///
    /// The metric name must be non-empty, parameter keys must be identifiers
    /// and parameter values must be JSON scalars.
    pub fn validate(&self) -> Result<(), WriteError> {
        if self.metric_name.trim().is_empty() {
            return Err(WriteError::Rejected("metric name is empty".to_string()));
        }

        for (key, value) in &self.parameters {
            if !is_valid_identifier(key) {
                return Err(WriteError::invalid_parameter(key, "not a valid identifier"));
            }
            if value.is_array() || value.is_object() {
                return Err(WriteError::invalid_parameter(key, "value must be a JSON scalar"));
            }
        }

        Ok(())
    }
}

/// Check a column or parameter key against the allow-listed identifier pattern
///
/// Accepts `[A-Za-z_][A-Za-z0-9_.-]*` up to [`MAX_IDENTIFIER_LEN`] characters.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    s.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
