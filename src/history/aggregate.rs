//! Calendar bucketing and per-metric statistics
//!
//! Buckets are aligned to UTC calendar units rather than fixed intervals:
//! weeks start on the ISO Monday and months on day 1.

use crate::types::{AggregatedBucket, Granularity, HistoricalDataPoint, MetricName, MetricStats};

use chrono::{DateTime, Datelike, Days, NaiveDate, Timelike, Utc};
use std::collections::BTreeMap;

/// Start of the bucket containing `timestamp_ms`, in epoch milliseconds
///
/// Falls back to the timestamp itself if it or the calendar arithmetic
/// leaves chrono's range.
pub fn bucket_start(granularity: Granularity, timestamp_ms: i64) -> i64 {
    let Some(dt) = DateTime::<Utc>::from_timestamp_millis(timestamp_ms) else {
        return timestamp_ms;
    };
    let date = dt.date_naive();

    let start = match granularity {
        Granularity::Hour => date.and_hms_opt(dt.hour(), 0, 0),
        Granularity::Day => date.and_hms_opt(0, 0, 0),
        Granularity::Week => date
            .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
            .and_then(|monday| monday.and_hms_opt(0, 0, 0)),
        Granularity::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .and_then(|first| first.and_hms_opt(0, 0, 0)),
    };

    start
        .map(|naive| naive.and_utc().timestamp_millis())
        .unwrap_or(timestamp_ms)
}

/// Group points into calendar buckets, ascending by bucket start
///
/// Every bucket carries stats for all five metrics.
pub fn aggregate_points(
    points: &[HistoricalDataPoint],
    granularity: Granularity,
) -> Vec<AggregatedBucket> {
    if points.is_empty() {
        return vec![];
    }

    let mut groups: BTreeMap<i64, Vec<&HistoricalDataPoint>> = BTreeMap::new();
    for point in points {
        groups
            .entry(bucket_start(granularity, point.timestamp))
            .or_default()
            .push(point);
    }

    groups
        .into_iter()
        .map(|(timestamp, members)| {
            let metrics = MetricName::ALL
                .iter()
                .map(|&metric| {
                    let values: Vec<f64> =
                        members.iter().map(|p| p.metrics.value(metric)).collect();
                    (metric, MetricStats::from_values(&values))
                })
                .collect();

            AggregatedBucket {
                timestamp,
                count: members.len(),
                metrics,
            }
        })
        .collect()
}
