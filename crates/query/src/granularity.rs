//! Bucket granularity
//!
//! Shared by the store (to label rows while grouping) and the calendar (to
//! enumerate the expected labels). Both sides must format labels identically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Calendar bucket size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Per minute
    Minute,
    /// Per hour
    Hour,
    /// Per day
    Day,
    /// Per ISO week (Monday start)
    Week,
    /// Per month
    Month,
    /// Per year
    Year,
}

impl Granularity {
    /// All granularities, finest first
    pub const ALL: [Granularity; 6] = [
        Self::Minute,
        Self::Hour,
        Self::Day,
        Self::Week,
        Self::Month,
        Self::Year,
    ];

    /// Look up a granularity tag (case-insensitive)
    pub fn from_tag(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "minute" | "min" => Some(Self::Minute),
            "hour" | "hourly" => Some(Self::Hour),
            "day" | "daily" => Some(Self::Day),
            "week" | "weekly" => Some(Self::Week),
            "month" | "monthly" => Some(Self::Month),
            "year" | "yearly" => Some(Self::Year),
            _ => None,
        }
    }

    /// Canonical tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// chrono format string for bucket labels
    ///
    /// Weeks use the ISO week-year (`%G`), which differs from the calendar
    /// year around January 1st.
    pub fn label_format(&self) -> &'static str {
        match self {
            Self::Minute => "%Y-%m-%d %H:%M",
            Self::Hour => "%Y-%m-%d %H",
            Self::Day => "%Y-%m-%d",
            Self::Week => "%G-W%V",
            Self::Month => "%Y-%m",
            Self::Year => "%Y",
        }
    }

    /// ClickHouse `formatDateTime` pattern producing the same labels
    ///
    /// ClickHouse uses `%i` for minutes (`%M` is the month name there).
    pub fn clickhouse_format(&self) -> &'static str {
        match self {
            Self::Minute => "%Y-%m-%d %H:%i",
            Self::Hour => "%Y-%m-%d %H",
            Self::Day => "%Y-%m-%d",
            Self::Week => "%G-W%V",
            Self::Month => "%Y-%m",
            Self::Year => "%Y",
        }
    }

    /// Bucket label of the period containing `instant`
    pub fn label(&self, instant: DateTime<Utc>) -> String {
        instant.format(self.label_format()).to_string()
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
