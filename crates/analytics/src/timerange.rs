//! Time range parsing
//!
//! Supports relative ranges (`7d`, `24h`), predefined ranges (`today`, `mtd`)
//! and custom date ranges (`2024-01-01,2024-01-31`). All ranges are UTC and
//! inclusive on both ends.

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};

use tally_query::Granularity;

use crate::calendar::{boundaries, truncate};
use crate::error::{AnalyticsError, Result};

/// A time range for statistic queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start of the range (inclusive)
    pub start: DateTime<Utc>,
    /// End of the range (inclusive)
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(AnalyticsError::InvalidTimeRange(format!(
                "end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// The month leading up to `now`
    ///
    /// Default range for queries that never set one.
    pub fn last_month(now: DateTime<Utc>) -> Self {
        let start = now.checked_sub_months(Months::new(1)).unwrap_or(now);
        Self { start, end: now }
    }

    /// Parse a time range string
    ///
    /// Supported formats:
    /// - Relative: `1h`, `24h`, `7d`, `2w`, `3m`, `1y`
    /// - Predefined: `today`, `yesterday`, `wtd`, `mtd`, `ytd`
    /// - Custom: `2024-01-01,2024-01-31`
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_at(s, Utc::now())
    }

    /// Parse a time range string relative to a fixed `now`
    pub fn parse_at(s: &str, now: DateTime<Utc>) -> Result<Self> {
        let s = s.trim().to_lowercase();

        if let Some(range) = Self::parse_predefined(&s, now) {
            return Ok(range);
        }

        if let Some(range) = Self::parse_relative(&s, now) {
            return Ok(range);
        }

        if let Some(range) = Self::parse_custom(&s)? {
            return Ok(range);
        }

        Err(AnalyticsError::InvalidTimeRange(format!(
            "unknown time range format: {}",
            s
        )))
    }

    /// Get the duration of this range
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Number of calendar days touched by this range (inclusive)
    pub fn days(&self) -> i64 {
        (self.end.date_naive() - self.start.date_naive()).num_days() + 1
    }
}

impl TimeRange {
    fn parse_predefined(s: &str, now: DateTime<Utc>) -> Option<Self> {
        let (today_start, today_end) = boundaries(Granularity::Day, now);

        let start = match s {
            "today" => today_start,
            "yesterday" => {
                let (start, end) = boundaries(Granularity::Day, today_start - Duration::days(1));
                return Some(Self { start, end });
            }
            "wtd" => truncate(Granularity::Week, now),
            "mtd" => truncate(Granularity::Month, now),
            "ytd" => truncate(Granularity::Year, now),
            _ => return None,
        };

        Some(Self {
            start,
            end: today_end,
        })
    }

    fn parse_relative(s: &str, now: DateTime<Utc>) -> Option<Self> {
        let (num, unit) = extract_num_unit(s)?;

        let start = match unit {
            'h' => now.checked_sub_signed(Duration::try_hours(num)?)?,
            // 7d means today plus the 6 previous days
            'd' => truncate(Granularity::Day, now.checked_sub_signed(Duration::try_days(num - 1)?)?),
            'w' => truncate(
                Granularity::Day,
                now.checked_sub_signed(Duration::try_weeks(num)?.checked_sub(&Duration::days(1))?)?,
            ),
            'm' => truncate(
                Granularity::Day,
                now.checked_sub_months(Months::new(u32::try_from(num).ok()?))?,
            ),
            'y' => truncate(
                Granularity::Day,
                now.checked_sub_months(Months::new(u32::try_from(num.checked_mul(12)?).ok()?))?,
            ),
            _ => return None,
        };

        let end = match unit {
            'h' => now,
            _ => boundaries(Granularity::Day, now).1,
        };

        Some(Self { start, end })
    }

    fn parse_custom(s: &str) -> Result<Option<Self>> {
        let Some((start, end)) = s.split_once(',') else {
            return Ok(None);
        };

        let start = parse_date(start.trim())?;
        let end = parse_date(end.trim())?;

        let (start, _) = boundaries(Granularity::Day, start);
        let (_, end) = boundaries(Granularity::Day, end);

        Self::new(start, end).map(Some)
    }
}

fn extract_num_unit(s: &str) -> Option<(i64, char)> {
    let unit = s.chars().last()?;
    if !unit.is_ascii_alphabetic() {
        return None;
    }

    let num: i64 = s[..s.len() - 1].parse().ok()?;
    if num <= 0 {
        return None;
    }

    Some((num, unit))
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| {
            AnalyticsError::InvalidTimeRange(format!("invalid date format: {} (use YYYY-MM-DD)", s))
        })
}
