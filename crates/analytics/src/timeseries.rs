//! Time series result types
//!
//! A query result is an ordered sequence of `{period, value}` buckets, the
//! shape charts and APIs consume directly.

use serde::{Deserialize, Serialize, Serializer};

/// One labelled aggregation window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Calendar label, range label or total label
    pub period: String,
    /// The aggregated value
    pub value: f64,
}

impl Bucket {
    /// Create a new bucket
    pub fn new(period: impl Into<String>, value: f64) -> Self {
        Self {
            period: period.into(),
            value,
        }
    }
}

/// Ordered buckets, optionally followed by a rollup total
///
/// Serializes as a plain JSON array of buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    buckets: Vec<Bucket>,
    has_total: bool,
}

impl TimeSeries {
    /// Create from buckets in chronological order
    pub fn from_buckets(buckets: Vec<Bucket>) -> Self {
        Self {
            buckets,
            has_total: false,
        }
    }

    /// Append the rollup total bucket
    pub fn with_total(mut self, label: impl Into<String>, value: f64) -> Self {
        self.buckets.push(Bucket::new(label, value));
        self.has_total = true;
        self
    }

    /// All buckets, total included
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Buckets without the total
    pub fn periods(&self) -> &[Bucket] {
        if self.has_total {
            &self.buckets[..self.buckets.len() - 1]
        } else {
            &self.buckets
        }
    }

    /// The total bucket, if one was appended
    pub fn total(&self) -> Option<&Bucket> {
        if self.has_total {
            self.buckets.last()
        } else {
            None
        }
    }

    /// Value of the bucket labelled `period`
    pub fn get(&self, period: &str) -> Option<f64> {
        self.buckets
            .iter()
            .find(|b| b.period == period)
            .map(|b| b.value)
    }

    /// Values of the non-total buckets, in order
    pub fn values(&self) -> Vec<f64> {
        self.periods().iter().map(|b| b.value).collect()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of buckets, total included
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Consume into the bucket list
    pub fn into_buckets(self) -> Vec<Bucket> {
        self.buckets
    }
}

impl Serialize for TimeSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.buckets.serialize(serializer)
    }
}

impl IntoIterator for TimeSeries {
    type Item = Bucket;
    type IntoIter = std::vec::IntoIter<Bucket>;

    fn into_iter(self) -> Self::IntoIter {
        self.buckets.into_iter()
    }
}
