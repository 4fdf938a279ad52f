//! Store query result types
//!
//! Unified result format across all backends (memory, ClickHouse).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One grouped row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    /// Bucket label (`None` when the query was not bucketed)
    pub period: Option<String>,
    /// Aggregated value (`None` for SQL NULL, e.g. the average of nothing)
    pub value: Option<f64>,
}

impl AggregateRow {
    /// Create a new row
    pub fn new(period: Option<String>, value: Option<f64>) -> Self {
        Self { period, value }
    }
}

/// Rows returned by a grouped aggregate query
///
/// Only buckets with at least one matching event are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateRows {
    /// Result rows
    pub rows: Vec<AggregateRow>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl AggregateRows {
    /// Create a result
    pub fn new(rows: Vec<AggregateRow>, execution_time_ms: u64) -> Self {
        Self {
            rows,
            execution_time_ms,
        }
    }

    /// Create an empty result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Check if no bucket matched
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Labelled values, NULL and non-finite values read as zero
    pub fn by_period(&self) -> HashMap<String, f64> {
        self.rows
            .iter()
            .filter_map(|row| Some((row.period.clone()?, finite_or_zero(row.value))))
            .collect()
    }

    /// Value of the first row, for unbucketed queries
    pub fn scalar(&self) -> f64 {
        finite_or_zero(self.rows.first().and_then(|row| row.value))
    }
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}
