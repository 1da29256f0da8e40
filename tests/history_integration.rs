//! History Integration Tests
//!
//! End-to-end behavior of the history service over the in-memory backend:
//! save/get round trips, window filtering, ordering, roll-ups and
//! regression detection.
//!
//! Run with: cargo test --test history_integration

use chrono::{DateTime, NaiveDate};
use std::sync::Arc;
use vitals_tsdb::backend::InMemoryBackend;
use vitals_tsdb::clock::ManualClock;
use vitals_tsdb::history::keys::point_key;
use vitals_tsdb::{
    CoreMetrics, Granularity, HistoryConfig, HistoryService, MetricName, NewDataPoint,
    RenderingStrategy, TimeRangeQuery,
};

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;

fn ms(rfc3339: &str) -> i64 {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .timestamp_millis()
}

fn metrics(lcp: f64) -> CoreMetrics {
    CoreMetrics::from_values("2024-01-01T00:00:00Z", [1200.0, lcp, 0.08, 180.0, 600.0])
}

fn ssr(lcp: f64) -> NewDataPoint {
    NewDataPoint::new(RenderingStrategy::Ssr, metrics(lcp))
}

fn setup(now: i64) -> (Arc<ManualClock>, Arc<InMemoryBackend>, HistoryService) {
    let clock = Arc::new(ManualClock::new(now));
    let backend = Arc::new(InMemoryBackend::with_clock(clock.clone()));
    let service = HistoryService::with_clock(backend.clone(), HistoryConfig::default(), clock.clone());
    (clock, backend, service)
}

// ============================================================================
// SAVE / GET
// ============================================================================

#[tokio::test]
async fn test_save_then_get_roundtrip() {
    let (_, _, service) = setup(ms("2024-02-01T00:00:00Z"));

    let point = NewDataPoint::new(RenderingStrategy::Isr, metrics(2100.0))
        .with_project("storefront")
        .with_metadata("url", "https://example.com/")
        .with_metadata("environment", "production");
    assert!(service.save(point.clone(), Some(ms("2024-01-15T08:30:00Z"))).await);

    let found = service
        .get(
            RenderingStrategy::Isr,
            Some("storefront"),
            NaiveDate::from_ymd_opt(2024, 1, 15),
        )
        .await
        .expect("point should be readable for its calendar day");

    assert_eq!(found.strategy, RenderingStrategy::Isr);
    assert_eq!(found.project_id, "storefront");
    assert_eq!(found.metrics, point.metrics);
    assert_eq!(found.metadata, point.metadata);
    assert_eq!(found.timestamp, ms("2024-01-15T08:30:00Z"));
}

#[tokio::test]
async fn test_every_save_is_retained() {
    let (_, backend, service) = setup(ms("2024-01-01T23:00:00Z"));

    for hour in 0..5 {
        assert!(service.save(ssr(2000.0), Some(ms("2024-01-01T00:00:00Z") + hour * HOUR)).await);
    }

    assert_eq!(backend.len(), 5);
    let points = service
        .query(&TimeRangeQuery::new(ms("2024-01-01T00:00:00Z"), ms("2024-01-01T23:59:59Z")))
        .await;
    assert_eq!(points.len(), 5);
}

#[tokio::test]
async fn test_same_millisecond_last_write_wins() {
    let ts = ms("2024-01-01T10:00:00Z");
    let (_, backend, service) = setup(ts);

    service.save(ssr(1000.0), Some(ts)).await;
    service.save(ssr(3000.0), Some(ts)).await;

    assert_eq!(backend.len(), 1);
    let found = service.get(RenderingStrategy::Ssr, None, None).await.unwrap();
    assert_eq!(found.metrics.value(MetricName::Lcp), 3000.0);
}

#[tokio::test]
async fn test_get_reads_legacy_day_key() {
    let (_, backend, service) = setup(ms("2024-01-01T12:00:00Z"));
    let legacy = ssr(1750.0).into_historical(ms("2024-01-01T06:00:00Z"), "default");
    backend.insert_raw(
        "historical:default:ssr:2024-01-01",
        serde_json::to_string(&legacy).unwrap(),
    );

    let found = service.get(RenderingStrategy::Ssr, None, None).await;
    assert_eq!(found, Some(legacy.clone()));

    // Legacy records are also visible to range queries
    let points = service
        .query(&TimeRangeQuery::new(ms("2024-01-01T00:00:00Z"), ms("2024-01-01T23:59:59Z")))
        .await;
    assert_eq!(points, vec![legacy]);
}

#[tokio::test]
async fn test_points_expire_after_retention() {
    let ts = ms("2024-01-01T00:00:00Z");
    let (clock, _, service) = setup(ts);
    service.save(ssr(2000.0), None).await;

    clock.advance(89 * DAY);
    let window = TimeRangeQuery::new(ts, ts);
    assert_eq!(service.query(&window).await.len(), 1);

    clock.advance(DAY);
    assert!(service.query(&window).await.is_empty());
}

// ============================================================================
// QUERY
// ============================================================================

#[tokio::test]
async fn test_three_point_scenario() {
    let (_, _, service) = setup(ms("2024-01-03T00:00:00Z"));

    service.save(ssr(1900.0), Some(ms("2024-01-02T09:00:00Z"))).await;
    service.save(ssr(1800.0), Some(ms("2024-01-01T10:00:00Z"))).await;
    service.save(ssr(2000.0), Some(ms("2024-01-01T14:00:00Z"))).await;

    let start = ms("2024-01-01T00:00:00Z");
    let end = ms("2024-01-02T23:59:59.999Z");

    let points = service
        .query(&TimeRangeQuery::new(start, end).with_strategy(RenderingStrategy::Ssr))
        .await;
    let lcps: Vec<f64> = points.iter().map(|p| p.metrics.value(MetricName::Lcp)).collect();
    assert_eq!(lcps, vec![1800.0, 2000.0, 1900.0]);

    let buckets = service
        .aggregate(Some(RenderingStrategy::Ssr), None, Granularity::Day, start, end)
        .await;
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].timestamp, start);
    assert_eq!(buckets[0].count, 2);
    assert_eq!(buckets[1].timestamp, ms("2024-01-02T00:00:00Z"));
    assert_eq!(buckets[1].count, 1);

    let lcp = buckets[0].metrics[&MetricName::Lcp];
    assert_eq!((lcp.avg, lcp.min, lcp.max), (1900.0, 1800.0, 2000.0));
}

#[tokio::test]
async fn test_window_filters_at_millisecond_resolution() {
    let (_, _, service) = setup(ms("2024-01-02T00:00:00Z"));
    service.save(ssr(1800.0), Some(ms("2024-01-01T10:00:00Z"))).await;
    service.save(ssr(2000.0), Some(ms("2024-01-01T14:00:00Z"))).await;

    // Both keys carry 2024-01-01, only one timestamp is inside
    let points = service
        .query(&TimeRangeQuery::new(
            ms("2024-01-01T10:00:00.001Z"),
            ms("2024-01-01T14:00:00Z"),
        ))
        .await;
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].timestamp, ms("2024-01-01T14:00:00Z"));
}

#[tokio::test]
async fn test_query_output_is_ordered_across_strategies() {
    let (_, _, service) = setup(ms("2024-01-10T00:00:00Z"));
    let base = ms("2024-01-01T00:00:00Z");

    for i in 0..40i64 {
        let strategy = RenderingStrategy::ALL[(i % 4) as usize];
        // Scatter timestamps so storage order differs from time order
        let ts = base + ((i * 7_919) % 40) * HOUR;
        service
            .save(NewDataPoint::new(strategy, metrics(2000.0)), Some(ts))
            .await;
    }

    let points = service.query(&TimeRangeQuery::new(base, base + 40 * HOUR)).await;
    assert_eq!(points.len(), 40);
    assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_query_issues_one_batch_read() {
    let (_, backend, service) = setup(ms("2024-01-10T00:00:00Z"));
    let base = ms("2024-01-01T00:00:00Z");
    for i in 0..25 {
        service.save(ssr(2000.0), Some(base + i * HOUR)).await;
    }

    let before = backend.calls();
    let points = service
        .query(&TimeRangeQuery::new(base, base + 30 * HOUR).with_strategy(RenderingStrategy::Ssr))
        .await;
    let after = backend.calls();

    assert_eq!(points.len(), 25);
    assert_eq!(after.multi_get - before.multi_get, 1);
    assert_eq!(after.get, before.get);
    assert_eq!(after.list_keys - before.list_keys, 1);
}

#[tokio::test]
async fn test_query_isolates_projects() {
    let (_, _, service) = setup(ms("2024-01-02T00:00:00Z"));
    let ts = ms("2024-01-01T10:00:00Z");
    service.save(ssr(1000.0), Some(ts)).await;
    service.save(ssr(2000.0).with_project("blog"), Some(ts)).await;
    service.save(ssr(3000.0).with_project("blog*"), Some(ts)).await;

    let blog = service
        .query(&TimeRangeQuery::new(ts, ts).with_project("blog"))
        .await;
    assert_eq!(blog.len(), 1);
    assert_eq!(blog[0].metrics.value(MetricName::Lcp), 2000.0);

    let default = service.query(&TimeRangeQuery::new(ts, ts)).await;
    assert_eq!(default.len(), 1);
    assert_eq!(default[0].project_id, "default");
}

#[tokio::test]
async fn test_inverted_window_is_empty() {
    let (_, _, service) = setup(ms("2024-01-02T00:00:00Z"));
    service.save(ssr(1000.0), None).await;

    let now = ms("2024-01-02T00:00:00Z");
    assert!(service.query(&TimeRangeQuery::new(now, now - 1)).await.is_empty());
}

#[tokio::test]
async fn test_open_ended_window_reaches_stored_points() {
    let ts = ms("2024-01-01T10:00:00Z");
    let (_, _, service) = setup(ts);
    assert!(service.save(ssr(1800.0), Some(ts)).await);

    assert_eq!(service.query(&TimeRangeQuery::new(0, i64::MAX)).await.len(), 1);
    assert_eq!(
        service
            .query(&TimeRangeQuery::new(0, 9_000_000_000_000_000))
            .await
            .len(),
        1
    );

    let buckets = service
        .aggregate(None, None, Granularity::Day, 0, i64::MAX)
        .await;
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].count, 1);
}

#[tokio::test]
async fn test_non_finite_metrics_are_not_persisted() {
    let ts = ms("2024-01-01T10:00:00Z");
    let (_, backend, service) = setup(ts);
    assert!(service.save(ssr(1800.0), Some(ts)).await);

    assert!(!service.save(ssr(f64::NAN), Some(ts + 1)).await);
    assert!(!service.save(ssr(f64::INFINITY), Some(ts + 2)).await);

    let mut bad_delta = ssr(1800.0);
    bad_delta.metrics.cls.delta = f64::NEG_INFINITY;
    assert!(!service.save(bad_delta, Some(ts + 3)).await);

    assert_eq!(backend.len(), 1);
    assert_eq!(service.stats().save_failures, 3);

    let points = service.query(&TimeRangeQuery::new(ts - 10, ts + 10)).await;
    assert_eq!(points.len(), 1);
    let found = service.get(RenderingStrategy::Ssr, None, None).await.unwrap();
    assert_eq!(found.timestamp, ts);
}

// ============================================================================
// AGGREGATION
// ============================================================================

#[tokio::test]
async fn test_aggregation_conserves_counts() {
    let (_, _, service) = setup(ms("2024-03-01T00:00:00Z"));
    let base = ms("2024-01-01T00:00:00Z");

    for i in 0..60 {
        let strategy = RenderingStrategy::ALL[(i % 4) as usize];
        service
            .save(
                NewDataPoint::new(strategy, metrics(1500.0 + i as f64)),
                Some(base + i * 17 * HOUR),
            )
            .await;
    }

    let end = base + 60 * 17 * HOUR;
    let total = service.query(&TimeRangeQuery::new(base, end)).await.len();
    assert_eq!(total, 60);

    for granularity in [
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
    ] {
        let buckets = service.aggregate(None, None, granularity, base, end).await;
        let counted: usize = buckets.iter().map(|b| b.count).sum();
        assert_eq!(counted, total, "{} buckets lose points", granularity);
        assert!(buckets.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}

#[tokio::test]
async fn test_weekly_buckets_start_on_monday() {
    let (_, _, service) = setup(ms("2024-02-01T00:00:00Z"));
    // Wednesday and the following Sunday share a week; Monday starts the next
    service.save(ssr(1000.0), Some(ms("2024-01-10T12:00:00Z"))).await;
    service.save(ssr(2000.0), Some(ms("2024-01-14T23:00:00Z"))).await;
    service.save(ssr(3000.0), Some(ms("2024-01-15T01:00:00Z"))).await;

    let buckets = service
        .aggregate(
            Some(RenderingStrategy::Ssr),
            None,
            Granularity::Week,
            ms("2024-01-01T00:00:00Z"),
            ms("2024-01-31T00:00:00Z"),
        )
        .await;

    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].timestamp, ms("2024-01-08T00:00:00Z"));
    assert_eq!(buckets[0].count, 2);
    assert_eq!(buckets[1].timestamp, ms("2024-01-15T00:00:00Z"));
}

#[tokio::test]
async fn test_aggregate_empty_window() {
    let (_, _, service) = setup(ms("2024-01-01T00:00:00Z"));
    let buckets = service
        .aggregate(None, None, Granularity::Day, 0, ms("2024-01-01T00:00:00Z"))
        .await;
    assert!(buckets.is_empty());
}

// ============================================================================
// REGRESSIONS
// ============================================================================

#[tokio::test]
async fn test_regression_threshold_boundary() {
    let now = ms("2024-01-10T00:00:00Z");
    let (_, _, service) = setup(now);

    for (days_ago, lcp) in [(6, 2000.0), (5, 2000.0), (2, 2500.0), (1, 2500.0)] {
        service.save(ssr(lcp), Some(now - days_ago * DAY)).await;
    }

    let findings = service
        .detect_regressions(RenderingStrategy::Ssr, None, Some(0.2))
        .await;
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].metric, MetricName::Lcp);
    assert_eq!(findings[0].baseline, 2000.0);
    assert_eq!(findings[0].current, 2500.0);
    assert!((findings[0].change - 0.25).abs() < 1e-9);

    assert!(service
        .detect_regressions(RenderingStrategy::Ssr, None, Some(0.3))
        .await
        .is_empty());
}

#[tokio::test]
async fn test_regression_needs_two_points() {
    let now = ms("2024-01-10T00:00:00Z");
    let (_, _, service) = setup(now);
    service.save(ssr(9000.0), Some(now - DAY)).await;

    assert!(service
        .detect_regressions(RenderingStrategy::Ssr, None, None)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_regression_ignores_other_strategies_and_old_points() {
    let now = ms("2024-01-10T00:00:00Z");
    let (_, _, service) = setup(now);

    service.save(ssr(500.0), Some(now - 10 * DAY)).await;
    service.save(ssr(2000.0), Some(now - 3 * DAY)).await;
    service.save(ssr(2000.0), Some(now - DAY)).await;
    service
        .save(
            NewDataPoint::new(RenderingStrategy::Csr, metrics(9000.0)),
            Some(now - HOUR),
        )
        .await;

    assert!(service
        .detect_regressions(RenderingStrategy::Ssr, None, None)
        .await
        .is_empty());
}

#[test]
fn test_key_layout_is_stable() {
    assert_eq!(
        point_key(RenderingStrategy::Ssg, "default", ms("2024-01-01T10:00:00Z")),
        "historical:default:ssg:2024-01-01:1704103200000"
    );
}
