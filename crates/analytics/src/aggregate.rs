//! Aggregation spec
//!
//! Resolves an aggregate function plus an optional unique-by key into the
//! store-level expression, and rolls assembled bucket values up into a total.

use tally_query::event::is_valid_identifier;
use tally_query::{Aggregate, AggregateExpr};

use crate::error::{AnalyticsError, Result};

/// Parse an aggregate token (`sum`, `count`, `avg`, `min`, `max`)
pub fn parse_aggregate(token: &str) -> Result<Aggregate> {
    Aggregate::from_token(token).ok_or_else(|| AnalyticsError::UnknownAggregate(token.to_string()))
}

/// Resolve the scalar expression computed per bucket
///
/// With `unique_by` set, only `count` is allowed and it counts distinct
/// values of that parameter instead of events.
pub fn expression(
    aggregate: Aggregate,
    unique_by: Option<&str>,
    value_field: &str,
) -> Result<AggregateExpr> {
    match unique_by {
        Some(key) if aggregate != Aggregate::Count => {
            Err(AnalyticsError::UnsupportedAggregateCombination {
                aggregate: aggregate.to_string(),
                unique_by: key.to_string(),
            })
        }
        Some(key) => {
            if !is_valid_identifier(key) {
                return Err(AnalyticsError::InvalidIdentifier(key.to_string()));
            }
            Ok(AggregateExpr::DistinctParameter {
                key: key.to_string(),
            })
        }
        None => {
            if !is_valid_identifier(value_field) {
                return Err(AnalyticsError::InvalidIdentifier(value_field.to_string()));
            }
            Ok(AggregateExpr::Column {
                function: aggregate,
                column: value_field.to_string(),
            })
        }
    }
}

/// Roll bucket values up into a single total
///
/// Sum and count add up, avg divides the sum by the number of buckets, min
/// and max take the extremum. An empty input rolls up to zero.
pub fn rollup(aggregate: Aggregate, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    match aggregate {
        Aggregate::Sum | Aggregate::Count => values.iter().sum(),
        Aggregate::Avg => values.iter().sum::<f64>() / values.len() as f64,
        Aggregate::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregate::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}
