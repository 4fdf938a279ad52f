//! Metric definitions
//!
//! A metric names a category of statistic events. Implementations may
//! restrict which parameters bulk assignment accepts and may expose named
//! query scopes.

use std::sync::Arc;

use crate::builder::StatisticQuery;
use crate::pending::PendingEvent;

/// A named category of statistic events
pub trait Metric: Send + Sync {
    /// Metric name stored with every event
    fn name(&self) -> &str;

    /// Parameters accepted by [`PendingEvent::with_all`]
    ///
    /// `None` accepts every key; an empty list rejects bulk assignment.
    fn fillable(&self) -> Option<&[&str]> {
        None
    }

    /// Apply the scope `name` to a query
    ///
    /// Returns `false` when the metric has no such scope.
    fn apply_scope(&self, query: &mut StatisticQuery, name: &str, args: &[serde_json::Value]) -> bool {
        let _ = (query, name, args);
        false
    }

    /// Start recording an event with `value`
    fn add(&self, value: i64) -> PendingEvent {
        PendingEvent::new(self.name(), value).with_fillable(self.fillable())
    }

    /// Start recording an event with `-value`
    fn sub(&self, value: i64) -> PendingEvent {
        self.add(value.saturating_neg())
    }

    /// Start recording an event with value 1
    fn increment(&self) -> PendingEvent {
        self.add(1)
    }

    /// Start recording an event with value -1
    fn decrement(&self) -> PendingEvent {
        self.sub(1)
    }

    /// Start a query over this metric with its scopes available
    fn query(self: Arc<Self>) -> StatisticQuery
    where
        Self: Sized + 'static,
    {
        StatisticQuery::for_metric(self)
    }
}

/// Metric identified by name only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedMetric {
    name: String,
    fillable: Option<Vec<&'static str>>,
}

impl NamedMetric {
    /// Create a metric accepting every parameter
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fillable: None,
        }
    }

    /// Restrict bulk assignment to `keys`
    pub fn with_fillable(mut self, keys: &[&'static str]) -> Self {
        self.fillable = Some(keys.to_vec());
        self
    }
}

impl Metric for NamedMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn fillable(&self) -> Option<&[&str]> {
        self.fillable.as_deref()
    }
}
