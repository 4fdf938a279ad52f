//! Tally Analytics Engine
//!
//! Time-bucketed aggregate queries over statistic events.
//!
//! # Overview
//!
//! This crate provides the query layer for Tally, built on top of `tally-query`.
//! It includes:
//!
//! - **Calendar**: period truncation, labels and bucket enumeration
//! - **Filters**: attribute constraints compiled to store predicates
//! - **Query Builder**: fluent `StatisticQuery` frozen into a `QuerySpec`
//! - **Engine**: cached execution with zero-filled `TimeSeries` results
//! - **Metrics**: named metrics and pending events on the write path
//!
//! # Usage
//!
//! ```ignore
//! use tally_analytics::{MetricsEngine, Metric, NamedMetric};
//!
//! let signups = NamedMetric::new("signups");
//! signups.increment().with("plan", "pro").commit(&store).await?;
//!
//! let engine = MetricsEngine::new(Arc::new(store));
//! let series = engine
//!     .get(engine.query("signups").range_str("7d").group_by_day())
//!     .await?;
//! ```

pub mod aggregate;
pub mod builder;
pub mod cache;
pub mod calendar;
pub mod engine;
pub mod error;
pub mod filter;
pub mod metric;
pub mod pending;
pub mod query;
pub mod timerange;
pub mod timeseries;


// Re-exports for convenience
pub use aggregate::{expression, parse_aggregate, rollup};
pub use builder::StatisticQuery;
pub use cache::{CachePolicy, CacheStats, QueryCache};
pub use calendar::{MAX_BUCKETS, parse_period};
pub use engine::{EngineConfig, MetricsEngine, assemble};
pub use error::{AnalyticsError, Result};
pub use filter::{Constraint, FilterSet};
pub use metric::{Metric, NamedMetric};
pub use pending::PendingEvent;
pub use query::QuerySpec;
pub use timerange::TimeRange;
pub use timeseries::{Bucket, TimeSeries};

pub use tally_query::{Aggregate, Connective, Granularity};
