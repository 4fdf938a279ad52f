//! Period calendar
//!
//! Calendar-aligned bucket arithmetic in UTC. Buckets are derived by
//! truncation to the enclosing calendar unit, never by dividing the range
//! into fixed durations, so months and years keep their real lengths. Weeks
//! start on Monday and are labelled with the ISO week-year.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Timelike, Utc};

use tally_query::Granularity;

use crate::error::{AnalyticsError, Result};

/// Default upper bound on the number of buckets a single query may enumerate
///
/// Queries override it with `max_buckets`.
pub const MAX_BUCKETS: u64 = 100_000;

/// Parse a granularity tag (`day`, `week`, `month`, ...)
pub fn parse_period(tag: &str) -> Result<Granularity> {
    Granularity::from_tag(tag).ok_or_else(|| AnalyticsError::InvalidPeriod(tag.to_string()))
}

/// Start of the calendar period containing `instant`
pub fn truncate(period: Granularity, instant: DateTime<Utc>) -> DateTime<Utc> {
    let date = instant.date_naive();
    let truncated = match period {
        Granularity::Minute => date.and_hms_opt(instant.hour(), instant.minute(), 0),
        Granularity::Hour => date.and_hms_opt(instant.hour(), 0, 0),
        Granularity::Day => date.and_hms_opt(0, 0, 0),
        Granularity::Week => {
            let days_from_monday = date.weekday().num_days_from_monday() as i64;
            (date - Duration::days(days_from_monday)).and_hms_opt(0, 0, 0)
        }
        Granularity::Month => {
            NaiveDate::from_ymd_opt(date.year(), date.month(), 1).and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        Granularity::Year => {
            NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
        }
    };
    truncated.map(|t| t.and_utc()).unwrap_or(instant)
}

/// Move forward by one calendar unit
///
/// Returns `None` past the representable range.
pub fn advance(period: Granularity, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match period {
        Granularity::Minute => instant.checked_add_signed(Duration::minutes(1)),
        Granularity::Hour => instant.checked_add_signed(Duration::hours(1)),
        Granularity::Day => instant.checked_add_signed(Duration::days(1)),
        Granularity::Week => instant.checked_add_signed(Duration::weeks(1)),
        Granularity::Month => instant.checked_add_months(Months::new(1)),
        Granularity::Year => instant.checked_add_months(Months::new(12)),
    }
}

/// First and last instant of the period containing `instant`
///
/// The end is the last nanosecond before the next period starts.
pub fn boundaries(period: Granularity, instant: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = truncate(period, instant);
    let end = advance(period, start)
        .map(|next| next - Duration::nanoseconds(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    (start, end)
}

/// Bucket label of the period containing `instant`
pub fn label(period: Granularity, instant: DateTime<Utc>) -> String {
    period.label(instant)
}

/// Label for the single whole-range bucket
pub fn range_label(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!("{} - {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
}

/// Labels of every period touching `[start, end]`, in chronological order
pub fn enumerate(period: Granularity, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<String> {
    let last = truncate(period, end);
    let mut cursor = truncate(period, start);
    let mut labels = Vec::new();

    while cursor <= last {
        labels.push(label(period, cursor));
        match advance(period, cursor) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    labels
}

/// Number of buckets `enumerate` would produce, without building them
pub fn bucket_count(period: Granularity, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let first = truncate(period, start);
    let last = truncate(period, end);
    if last < first {
        return 0;
    }

    let span = last - first;
    let steps = match period {
        Granularity::Minute => span.num_minutes(),
        Granularity::Hour => span.num_hours(),
        Granularity::Day => span.num_days(),
        Granularity::Week => span.num_weeks(),
        Granularity::Month => month_index(last) - month_index(first),
        Granularity::Year => (last.year() - first.year()) as i64,
    };
    steps as u64 + 1
}

fn month_index(instant: DateTime<Utc>) -> i64 {
    instant.year() as i64 * 12 + instant.month0() as i64
}
