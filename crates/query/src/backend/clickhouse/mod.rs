//! ClickHouse backend for the statistic fact table
//!
//! Renders store queries into parameterized SQL and executes them over the
//! HTTP interface. Every user-supplied value travels as a `param_*` query
//! parameter bound to a `{name:Type}` placeholder; only validated identifiers
//! and fixed format strings are written into the SQL text.
//!
//! Expected table layout:
//!
//! ```sql
//! CREATE TABLE statistic_events (
//!     id UUID DEFAULT generateUUIDv4(),
//!     metric_name LowCardinality(String),
//!     value Int64,
//!     occurred_at DateTime64(9, 'UTC'),
//!     parameters String
//! ) ENGINE = MergeTree ORDER BY (metric_name, occurred_at)
//! ```

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::backend::{EventWriter, StatisticStore, validate_identifier, validate_query};
use crate::error::{Result, StoreError, WriteError};
use crate::event::StatisticEvent;
use crate::request::{Aggregate, AggregateExpr, Clause, StoreQuery};
use crate::result::{AggregateRow, AggregateRows};

/// Timestamp layout accepted by `toDateTime64` and `JSONEachRow` input
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

// =============================================================================
// Configuration
// =============================================================================

/// ClickHouse store configuration
#[derive(Debug, Clone)]
pub struct ClickHouseStoreConfig {
    /// ClickHouse HTTP URL (e.g., "http://localhost:8123")
    pub url: String,

    /// Database name
    pub database: String,

    /// Fact table name
    pub table: String,

    /// Username for authentication (optional)
    pub username: Option<String>,

    /// Password for authentication (optional)
    pub password: Option<String>,

    /// Max execution time in seconds
    pub max_execution_time: u64,
}

impl Default for ClickHouseStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".into(),
            database: "default".into(),
            table: "statistic_events".into(),
            username: None,
            password: None,
            max_execution_time: 60,
        }
    }
}

impl ClickHouseStoreConfig {
    /// Create a new config with URL and database
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set the fact table name
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set authentication credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

// =============================================================================
// SQL Rendering
// =============================================================================

/// SQL text plus the HTTP parameters binding its placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    /// SQL with `{pN:Type}` placeholders
    pub sql: String,
    /// `(param_pN, value)` pairs
    pub params: Vec<(String, String)>,
}

#[derive(Default)]
struct Binder {
    params: Vec<(String, String)>,
}

impl Binder {
    fn bind(&mut self, value: impl Into<String>) -> String {
        let name = format!("p{}", self.params.len());
        self.params.push((format!("param_{}", name), value.into()));
        format!("{{{}:String}}", name)
    }
}

fn quote_identifier(s: &str) -> String {
    format!("`{}`", s)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn value_sql(expr: &AggregateExpr, binder: &mut Binder) -> String {
    match expr {
        AggregateExpr::Column { function, column } => {
            let column = quote_identifier(column);
            match function {
                Aggregate::Sum => format!("toFloat64(sum({}))", column),
                Aggregate::Count => format!("toFloat64(count({}))", column),
                Aggregate::Avg => format!("avg({})", column),
                Aggregate::Min => format!("toFloat64(min({}))", column),
                Aggregate::Max => format!("toFloat64(max({}))", column),
            }
        }
        AggregateExpr::DistinctParameter { key } => {
            let key = binder.bind(key.as_str());
            format!(
                "toFloat64(uniqExact(nullIf(nullIf(JSONExtractRaw(parameters, {}), ''), 'null')))",
                key
            )
        }
    }
}

fn clause_sql(clause: &Clause, binder: &mut Binder) -> String {
    let key = binder.bind(clause.column.as_str());
    let value = binder.bind(clause.value.to_string());
    let test = format!("JSONExtractRaw(parameters, {}) = {}", key, value);
    if clause.negate {
        format!("NOT ({})", test)
    } else {
        test
    }
}

/// Render a grouped aggregate query against `table`
pub fn render_aggregate(table: &str, query: &StoreQuery) -> Result<RenderedQuery> {
    validate_identifier(table)?;
    validate_query(query)?;

    let mut binder = Binder::default();
    let mut select = Vec::with_capacity(2);

    if let Some(bucket) = query.bucket {
        select.push(format!(
            "formatDateTime(occurred_at, '{}', 'UTC') AS period",
            bucket.clickhouse_format()
        ));
    }
    select.push(format!("{} AS value", value_sql(&query.aggregate, &mut binder)));

    let mut where_clauses = vec![
        format!("metric_name = {}", binder.bind(query.metric_name.as_str())),
        format!(
            "occurred_at >= toDateTime64({}, 9, 'UTC')",
            binder.bind(format_timestamp(query.start))
        ),
        format!(
            "occurred_at <= toDateTime64({}, 9, 'UTC')",
            binder.bind(format_timestamp(query.end))
        ),
    ];

    if !query.predicate.is_empty() {
        let mut predicate = String::new();
        for (i, clause) in query.predicate.clauses.iter().enumerate() {
            if i > 0 {
                predicate.push(' ');
                predicate.push_str(clause.connective.as_sql());
                predicate.push(' ');
            }
            predicate.push_str(&clause_sql(clause, &mut binder));
        }
        where_clauses.push(format!("({})", predicate));
    }

    let mut sql = format!(
        "SELECT {} FROM {} WHERE {}",
        select.join(", "),
        quote_identifier(table),
        where_clauses.join(" AND ")
    );

    if query.bucket.is_some() {
        sql.push_str(" GROUP BY period ORDER BY period");
    }

    Ok(RenderedQuery {
        sql,
        params: binder.params,
    })
}

/// Render the insert statement for a table
pub fn render_insert(table: &str) -> Result<String> {
    validate_identifier(table)?;
    Ok(format!(
        "INSERT INTO {} (metric_name, value, occurred_at, parameters) FORMAT JSONEachRow",
        quote_identifier(table)
    ))
}

/// Serialize one event as a `JSONEachRow` line
pub fn event_row(event: &StatisticEvent) -> std::result::Result<String, WriteError> {
    let parameters = serde_json::to_string(&event.parameters)
        .map_err(|e| WriteError::Rejected(format!("failed to encode parameters: {}", e)))?;
    let row = serde_json::json!({
        "metric_name": event.metric_name,
        "value": event.value,
        "occurred_at": format_timestamp(event.occurred_at),
        "parameters": parameters,
    });
    Ok(row.to_string())
}

// =============================================================================
// Backend Implementation
// =============================================================================

/// ClickHouse statistic store using the HTTP interface
#[derive(Clone)]
pub struct ClickHouseStore {
    client: reqwest::Client,
    config: ClickHouseStoreConfig,
}

impl std::fmt::Debug for ClickHouseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseStore")
            .field("url", &self.config.url)
            .field("database", &self.config.database)
            .field("table", &self.config.table)
            .finish()
    }
}

/// Transport-level failure, mapped into read or write errors by the caller
enum HttpFailure {
    Connection(String),
    Status(String),
}

impl ClickHouseStore {
    /// Create a new ClickHouse store from config
    pub fn new(config: &ClickHouseStoreConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: config.clone(),
        }
    }

    /// Create from URL and database directly
    pub fn from_url(url: impl Into<String>, database: impl Into<String>) -> Self {
        let config = ClickHouseStoreConfig::new(url, database);
        Self::new(&config)
    }

    /// Store configuration
    pub fn config(&self) -> &ClickHouseStoreConfig {
        &self.config
    }

    /// POST a statement with bound parameters and return the body
    async fn post(
        &self,
        params: &[(String, String)],
        body: String,
    ) -> std::result::Result<String, HttpFailure> {
        let mut request = self
            .client
            .post(&self.config.url)
            .query(&[
                ("database", self.config.database.as_str()),
                (
                    "max_execution_time",
                    &self.config.max_execution_time.to_string(),
                ),
            ])
            .query(params)
            .body(body);

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|e| HttpFailure::Connection(format!("ClickHouse connection failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HttpFailure::Status(format!(
                "ClickHouse error ({}): {}",
                status, body
            )));
        }

        response
            .text()
            .await
            .map_err(|e| HttpFailure::Connection(format!("failed to read response: {}", e)))
    }
}

#[async_trait]
impl StatisticStore for ClickHouseStore {
    async fn aggregate(&self, query: &StoreQuery) -> Result<AggregateRows> {
        let rendered = render_aggregate(&self.config.table, query)?;
        let start = Instant::now();

        let body = format!("{} FORMAT JSONEachRow", rendered.sql);
        let response_text = self
            .post(&rendered.params, body)
            .await
            .map_err(|failure| match failure {
                HttpFailure::Connection(msg) => StoreError::Unavailable(msg),
                HttpFailure::Status(msg) => StoreError::Execution(msg),
            })?;

        let rows = parse_rows(&response_text)?;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            metric = %query.metric_name,
            rows = rows.len(),
            time_ms = execution_time_ms,
            "ClickHouse query executed"
        );

        Ok(AggregateRows::new(rows, execution_time_ms))
    }

    async fn health_check(&self) -> Result<()> {
        self.post(&[], "SELECT 1".to_string())
            .await
            .map_err(|failure| match failure {
                HttpFailure::Connection(msg) | HttpFailure::Status(msg) => {
                    StoreError::Unavailable(msg)
                }
            })?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "clickhouse"
    }
}

#[async_trait]
impl EventWriter for ClickHouseStore {
    async fn commit(&self, event: &StatisticEvent) -> std::result::Result<(), WriteError> {
        event.validate()?;

        let insert = render_insert(&self.config.table)
            .map_err(|e| WriteError::Rejected(e.to_string()))?;
        let row = event_row(event)?;
        let params = [("query".to_string(), insert)];

        self.post(&params, row).await.map_err(|failure| match failure {
            HttpFailure::Connection(msg) => WriteError::Unavailable(msg),
            HttpFailure::Status(msg) => WriteError::Rejected(msg),
        })?;

        tracing::trace!(metric = %event.metric_name, "event committed to ClickHouse");
        Ok(())
    }
}

// =============================================================================
// Response Parsing
// =============================================================================

/// One `JSONEachRow` result line
#[derive(Debug, Deserialize)]
struct RowJson {
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    value: serde_json::Value,
}

/// Parse `JSONEachRow` output into aggregate rows
fn parse_rows(response_text: &str) -> Result<Vec<AggregateRow>> {
    response_text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let row: RowJson = serde_json::from_str(line).map_err(|e| {
                StoreError::Serialization(format!("failed to parse JSON row: {}", e))
            })?;
            Ok(AggregateRow::new(row.period, json_number(&row.value)))
        })
        .collect()
}

/// Read a numeric cell; 64-bit integers may arrive quoted
fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
