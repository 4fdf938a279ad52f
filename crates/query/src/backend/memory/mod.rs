//! In-process fact table
//!
//! Holds events in memory and evaluates store queries directly. Serves as the
//! embedded backend and as the reference semantics for the SQL backends.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::backend::{EventWriter, StatisticStore, validate_query};
use crate::error::{Result, StoreError, WriteError};
use crate::event::StatisticEvent;
use crate::request::{Aggregate, AggregateExpr, StoreQuery, VALUE_COLUMN};
use crate::result::{AggregateRow, AggregateRows};

/// A stored event with its surrogate id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Surrogate id assigned at commit
    pub id: u64,
    /// The event
    pub event: StatisticEvent,
}

/// In-memory statistic store
///
/// Cloning shares the underlying table.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    events: Arc<RwLock<Vec<StoredEvent>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if the store holds no events
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Snapshot of stored events in commit order
    pub fn events(&self) -> Vec<StoredEvent> {
        self.events.read().clone()
    }

    fn insert(&self, event: StatisticEvent) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.events.write().push(StoredEvent { id, event });
        id
    }
}

#[async_trait]
impl StatisticStore for MemoryStore {
    async fn aggregate(&self, query: &StoreQuery) -> Result<AggregateRows> {
        validate_query(query)?;
        if let AggregateExpr::Column { column, .. } = &query.aggregate
            && column != VALUE_COLUMN
        {
            return Err(StoreError::Execution(format!("unknown column: {}", column)));
        }

        let start = Instant::now();
        let mut groups: BTreeMap<Option<String>, Accumulator> = BTreeMap::new();

        {
            let events = self.events.read();
            let matching = events.iter().map(|stored| &stored.event).filter(|event| {
                event.metric_name == query.metric_name
                    && event.occurred_at >= query.start
                    && event.occurred_at <= query.end
                    && query.predicate.matches(&event.parameters)
            });

            for event in matching {
                let label = query.bucket.map(|g| g.label(event.occurred_at));
                groups.entry(label).or_default().push(event, &query.aggregate);
            }
        }

        let rows: Vec<AggregateRow> = groups
            .into_iter()
            .map(|(period, acc)| AggregateRow::new(period, acc.finish(&query.aggregate)))
            .collect();

        let execution_time_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            metric = %query.metric_name,
            rows = rows.len(),
            time_ms = execution_time_ms,
            "memory store query executed"
        );

        Ok(AggregateRows::new(rows, execution_time_ms))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl EventWriter for MemoryStore {
    async fn commit(&self, event: &StatisticEvent) -> std::result::Result<(), WriteError> {
        event.validate()?;
        let id = self.insert(event.clone());
        tracing::trace!(id, metric = %event.metric_name, "event committed");
        Ok(())
    }
}

/// Running aggregate state for one bucket
#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
    distinct: HashSet<String>,
}

impl Accumulator {
    fn push(&mut self, event: &StatisticEvent, expr: &AggregateExpr) {
        match expr {
            AggregateExpr::DistinctParameter { key } => {
                if let Some(value) = event.parameters.get(key).filter(|v| !v.is_null()) {
                    self.distinct.insert(value.to_string());
                }
            }
            AggregateExpr::Column { .. } => {
                let value = event.value as f64;
                self.count += 1;
                self.sum += value;
                self.min = Some(self.min.map_or(value, |m| m.min(value)));
                self.max = Some(self.max.map_or(value, |m| m.max(value)));
            }
        }
    }

    fn finish(&self, expr: &AggregateExpr) -> Option<f64> {
        match expr {
            AggregateExpr::DistinctParameter { .. } => Some(self.distinct.len() as f64),
            AggregateExpr::Column { function, .. } => match function {
                Aggregate::Sum => Some(self.sum),
                Aggregate::Count => Some(self.count as f64),
                Aggregate::Avg if self.count == 0 => None,
                Aggregate::Avg => Some(self.sum / self.count as f64),
                Aggregate::Min => self.min,
                Aggregate::Max => self.max,
            },
        }
    }
}
