//! Key codec
//!
//! ```text
//! historical:{project}:{strategy}:{YYYY-MM-DD}:{epochMs}          data point
//! historical:{project}:{strategy}:{YYYY-MM-DD}                    data point (legacy, one per day)
//! historical:agg:{project}:{strategy}:{granularity}:{label}       aggregate bucket
//! ```
//!
//! Strategy segments are lowercase; dates and labels are UTC. Builders are
//! pure and infallible.

use crate::backend::escape_glob;
use crate::clock::utc_from_millis;
use crate::types::{Granularity, RenderingStrategy};

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Prefix of every history key
pub const KEY_PREFIX: &str = "historical:";

/// Segment separating aggregate keys from point keys
pub const AGGREGATE_SEGMENT: &str = "agg:";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Decoded point key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointKey {
    /// Project the point belongs to
    pub project_id: String,
    /// Rendering strategy
    pub strategy: RenderingStrategy,
    /// UTC calendar day of the measurement
    pub date: NaiveDate,
    /// Exact measurement time; `None` for legacy day-only keys
    pub timestamp_ms: Option<i64>,
}

/// `YYYY-MM-DD` of a timestamp in UTC
pub fn day_label(timestamp_ms: i64) -> String {
    utc_from_millis(timestamp_ms).format(DATE_FORMAT).to_string()
}

/// Key of one data point
pub fn point_key(strategy: RenderingStrategy, project_id: &str, timestamp_ms: i64) -> String {
    format!(
        "{}{}:{}:{}:{}",
        KEY_PREFIX,
        project_id,
        strategy.key_segment(),
        day_label(timestamp_ms),
        timestamp_ms
    )
}

/// Pattern matching every point of a strategy/project pair
pub fn point_pattern(strategy: RenderingStrategy, project_id: &str) -> String {
    format!(
        "{}{}:{}:*",
        KEY_PREFIX,
        escape_glob(project_id),
        strategy.key_segment()
    )
}

/// Pattern matching the points of one calendar day, legacy keys included
pub fn day_pattern(strategy: RenderingStrategy, project_id: &str, date: NaiveDate) -> String {
    format!(
        "{}{}:{}:{}*",
        KEY_PREFIX,
        escape_glob(project_id),
        strategy.key_segment(),
        date.format(DATE_FORMAT)
    )
}

/// Label of the bucket containing `timestamp_ms`
///
/// Hour `YYYY-MM-DD-HH`, day `YYYY-MM-DD`, week ISO `YYYY-Www`, month `YYYY-MM`.
pub fn bucket_label(granularity: Granularity, timestamp_ms: i64) -> String {
    let dt: DateTime<Utc> = utc_from_millis(timestamp_ms);
    match granularity {
        Granularity::Hour => dt.format("%Y-%m-%d-%H").to_string(),
        Granularity::Day => dt.format(DATE_FORMAT).to_string(),
        Granularity::Week => {
            let week = dt.iso_week();
            format!("{:04}-W{:02}", week.year(), week.week())
        },
        Granularity::Month => dt.format("%Y-%m").to_string(),
    }
}

/// Key of a pre-aggregated bucket
pub fn aggregate_key(
    strategy: RenderingStrategy,
    project_id: &str,
    granularity: Granularity,
    timestamp_ms: i64,
) -> String {
    format!(
        "{}{}{}:{}:{}:{}",
        KEY_PREFIX,
        AGGREGATE_SEGMENT,
        project_id,
        strategy.key_segment(),
        granularity.as_str(),
        bucket_label(granularity, timestamp_ms)
    )
}

/// Decode a point key, current or legacy layout
///
/// Segments are read from the right so project ids may contain `:`.
pub fn parse_point_key(key: &str) -> Option<PointKey> {
    let rest = key.strip_prefix(KEY_PREFIX)?;

    let mut parts = rest.rsplitn(4, ':');
    let last = parts.next()?;
    let second = parts.next()?;

    if let (Ok(timestamp_ms), Some(date)) = (last.parse::<i64>(), parse_date(second)) {
        let strategy = parts.next()?.parse().ok()?;
        let project_id = parts.next().filter(|p| !p.is_empty())?;
        return Some(PointKey {
            project_id: project_id.to_string(),
            strategy,
            date,
            timestamp_ms: Some(timestamp_ms),
        });
    }

    // Legacy: {project}:{strategy}:{date}
    let mut parts = rest.rsplitn(3, ':');
    let date = parse_date(parts.next()?)?;
    let strategy = parts.next()?.parse().ok()?;
    let project_id = parts.next().filter(|p| !p.is_empty())?;
    Some(PointKey {
        project_id: project_id.to_string(),
        strategy,
        date,
        timestamp_ms: None,
    })
}

fn parse_date(segment: &str) -> Option<NaiveDate> {
    // Exact width rejects forms chrono would otherwise accept, like "2024-1-1"
    if segment.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(segment, DATE_FORMAT).ok()
}
