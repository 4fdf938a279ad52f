//! Pending statistic events
//!
//! Builder for one event on the write path. Nothing is written until
//! [`PendingEvent::commit`] is awaited; dropping an uncommitted event writes
//! nothing and logs a warning.

use chrono::{DateTime, Utc};

use tally_query::{EventWriter, Parameters, StatisticEvent, WriteError};

/// An event being assembled for commit
#[must_use = "pending events are only recorded by `commit`"]
#[derive(Debug)]
pub struct PendingEvent {
    metric_name: String,
    value: i64,
    occurred_at: DateTime<Utc>,
    parameters: Parameters,
    fillable: Option<Vec<String>>,
    error: Option<WriteError>,
    finished: bool,
}

impl PendingEvent {
    /// Start an event for `metric_name`, occurring now
    pub fn new(metric_name: impl Into<String>, value: i64) -> Self {
        Self {
            metric_name: metric_name.into(),
            value,
            occurred_at: Utc::now(),
            parameters: Parameters::new(),
            fillable: None,
            error: None,
            finished: false,
        }
    }

    /// Restrict bulk assignment to the given keys
    pub fn with_fillable(mut self, fillable: Option<&[&str]>) -> Self {
        self.fillable = fillable.map(|keys| keys.iter().map(|k| k.to_string()).collect());
        self
    }

    /// Set the value
    pub fn value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }

    /// Set when the event happened
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Set one parameter
    ///
    /// Explicit assignment is not subject to the fillable list.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Set several parameters at once, honouring the fillable list
    ///
    /// Keys outside a non-empty fillable list are skipped. With an empty
    /// list every key is guarded and `commit` fails.
    pub fn with_all<K, V, I>(mut self, entries: I) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            let key = key.into();
            match self.fillable.as_deref() {
                None => {}
                Some([]) => {
                    if self.error.is_none() {
                        self.error = Some(WriteError::Guarded(key));
                    }
                    continue;
                }
                Some(keys) if !keys.contains(&key) => continue,
                Some(_) => {}
            }
            self.parameters.insert(key, value.into());
        }
        self
    }

    /// Parameters assembled so far
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Build the event record without committing it
    pub fn to_event(&self) -> StatisticEvent {
        StatisticEvent {
            metric_name: self.metric_name.clone(),
            value: self.value,
            occurred_at: self.occurred_at,
            parameters: self.parameters.clone(),
        }
    }

    /// Persist the event through `writer`
    pub async fn commit(mut self, writer: &dyn EventWriter) -> Result<(), WriteError> {
        self.finished = true;

        if let Some(err) = self.error.take() {
            return Err(err);
        }

        let event = StatisticEvent {
            metric_name: std::mem::take(&mut self.metric_name),
            value: self.value,
            occurred_at: self.occurred_at,
            parameters: std::mem::take(&mut self.parameters),
        };
        writer.commit(&event).await
    }

    /// Drop the event without writing and without a warning
    pub fn discard(mut self) {
        self.finished = true;
    }
}

impl Drop for PendingEvent {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                metric = %self.metric_name,
                value = self.value,
                "pending statistic event dropped without commit"
            );
        }
    }
}
