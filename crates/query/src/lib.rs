//! Tally Query - store boundary for statistic events
//!
//! Defines the fact-table record, the structured aggregate query the
//! analytics layer compiles to, and the backends that execute it:
//! - **Memory**: in-process table for development, tests and embedded use
//! - **ClickHouse**: production store over the HTTP interface
//!
//! # Usage
//!
//! ```ignore
//! use tally_query::{StoreConfig, StoreEngine, EventWriter, StatisticEvent};
//!
//! let engine = StoreEngine::from_config(&StoreConfig::memory())?;
//! engine.commit(&StatisticEvent::new("signups", 1, Utc::now())).await?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod granularity;
pub mod request;
pub mod result;

// Re-exports
pub use backend::clickhouse::{ClickHouseStore, ClickHouseStoreConfig, RenderedQuery};
pub use backend::memory::{MemoryStore, StoredEvent};
pub use backend::{EventWriter, StatisticStore};
pub use config::{StoreBackendType, StoreConfig};
pub use error::{StoreError, WriteError};
pub use event::{Parameters, StatisticEvent};
pub use granularity::Granularity;
pub use request::{Aggregate, AggregateExpr, Clause, Connective, Predicate, StoreQuery, VALUE_COLUMN};
pub use result::{AggregateRow, AggregateRows};

use std::sync::Arc;

/// Store engine that routes reads and writes to one backend
#[derive(Clone)]
pub struct StoreEngine {
    store: Arc<dyn StatisticStore>,
    writer: Arc<dyn EventWriter>,
}

impl StoreEngine {
    /// Create a store engine over a backend that both reads and writes
    pub fn new<B>(backend: B) -> Self
    where
        B: StatisticStore + EventWriter + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            store: backend.clone(),
            writer: backend,
        }
    }

    /// Create a store engine from config
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let engine = match config.backend {
            StoreBackendType::Memory => Self::new(MemoryStore::new()),
            StoreBackendType::ClickHouse => {
                let ch_config = config.clickhouse_config()?;
                Self::new(ClickHouseStore::new(&ch_config))
            }
        };
        tracing::info!(backend = %config.backend, table = %config.table, "statistic store ready");
        Ok(engine)
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }
}

impl std::fmt::Debug for StoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEngine")
            .field("backend", &self.store.name())
            .finish()
    }
}

// Implement both sides so the engine can be handed to the analytics layer
#[async_trait::async_trait]
impl StatisticStore for StoreEngine {
    async fn aggregate(&self, query: &StoreQuery) -> error::Result<AggregateRows> {
        self.store.aggregate(query).await
    }

    async fn health_check(&self) -> error::Result<()> {
        self.store.health_check().await
    }

    fn name(&self) -> &'static str {
        self.store.name()
    }
}

#[async_trait::async_trait]
impl EventWriter for StoreEngine {
    async fn commit(&self, event: &StatisticEvent) -> Result<(), WriteError> {
        self.writer.commit(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_memory_engine_round_trip() {
        let engine = StoreEngine::from_config(&StoreConfig::memory()).unwrap();
        assert_eq!(engine.backend_name(), "memory");

        let now = Utc::now();
        engine
            .commit(&StatisticEvent::new("signups", 3, now))
            .await
            .unwrap();

        let rows = engine
            .aggregate(&StoreQuery {
                metric_name: "signups".into(),
                start: now,
                end: now,
                bucket: None,
                aggregate: AggregateExpr::Column {
                    function: Aggregate::Sum,
                    column: VALUE_COLUMN.into(),
                },
                predicate: Predicate::default(),
            })
            .await
            .unwrap();
        assert_eq!(rows.scalar(), 3.0);
        assert!(engine.health_check().await.is_ok());
    }

    #[test]
    fn test_clickhouse_engine_requires_url() {
        let config = StoreConfig {
            backend: StoreBackendType::ClickHouse,
            ..Default::default()
        };
        assert!(StoreEngine::from_config(&config).is_err());
    }

    #[test]
    fn test_clickhouse_engine_from_config() {
        let engine =
            StoreEngine::from_config(&StoreConfig::clickhouse("http://localhost:8123", "default"))
                .unwrap();
        assert_eq!(engine.backend_name(), "clickhouse");
    }
}
