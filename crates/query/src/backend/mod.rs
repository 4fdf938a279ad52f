//! Store backend traits and implementations

pub mod clickhouse;
pub mod memory;

use async_trait::async_trait;

use crate::error::{Result, StoreError, WriteError};
use crate::event::{StatisticEvent, is_valid_identifier};
use crate::request::StoreQuery;
use crate::result::AggregateRows;

/// Read side of the fact table
///
/// Implemented by the memory and ClickHouse backends.
#[async_trait]
pub trait StatisticStore: Send + Sync {
    /// Run a grouped aggregate query
    async fn aggregate(&self, query: &StoreQuery) -> Result<AggregateRows>;

    /// Check if the store is reachable
    async fn health_check(&self) -> Result<()>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Write side of the fact table
///
/// A successful `commit` persists the event exactly once.
#[async_trait]
pub trait EventWriter: Send + Sync {
    /// Persist one event
    async fn commit(&self, event: &StatisticEvent) -> std::result::Result<(), WriteError>;
}

/// Reject identifiers that could escape a generated expression
pub fn validate_identifier(s: &str) -> Result<()> {
    if is_valid_identifier(s) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(s.to_string()))
    }
}

/// Validate every identifier a store query will interpolate or bind
pub fn validate_query(query: &StoreQuery) -> Result<()> {
    match &query.aggregate {
        crate::request::AggregateExpr::Column { column, .. } => validate_identifier(column)?,
        crate::request::AggregateExpr::DistinctParameter { key } => validate_identifier(key)?,
    }
    for clause in &query.predicate.clauses {
        validate_identifier(&clause.column)?;
    }
    if query.end < query.start {
        return Err(StoreError::Execution("range end precedes start".to_string()));
    }
    Ok(())
}
