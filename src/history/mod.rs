//! Historical vitals: storage, range queries, roll-ups and regression checks
//!
//! # Architecture
//!
//! ```text
//!                        ┌─────────────────┐
//!   save / get ────────► │ DataPointStore  │ ──┐
//!                        └─────────────────┘   │    ┌──────────────┐
//!                        ┌─────────────────┐   ├──► │  KvBackend   │
//!   query ─────────────► │ RangeQueryEngine│ ──┘    └──────────────┘
//!                        └────────┬────────┘
//!                                 │ points, oldest first
//!                   ┌─────────────┴─────────────┐
//!                   ▼                           ▼
//!           aggregate_points            find_regressions
//! ```
//!
//! Public operations never fail: backend and decoding errors are logged,
//! counted in [`HistoryStats`] and turned into `false`, `None` or an empty
//! list. Each has a `try_*` twin returning the underlying [`StoreError`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vitals_tsdb::backend::InMemoryBackend;
//! use vitals_tsdb::config::HistoryConfig;
//! use vitals_tsdb::history::HistoryService;
//! use vitals_tsdb::types::{CoreMetrics, NewDataPoint, RenderingStrategy, TimeRangeQuery};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let service = HistoryService::new(Arc::new(InMemoryBackend::new()), HistoryConfig::default());
//!
//! let metrics = CoreMetrics::from_values("2024-01-01T10:00:00Z", [1200.0, 1800.0, 0.05, 150.0, 400.0]);
//! let point = NewDataPoint::new(RenderingStrategy::Ssr, metrics);
//! assert!(service.save(point, Some(1_704_103_200_000)).await);
//!
//! let points = service
//!     .query(&TimeRangeQuery::new(1_704_067_200_000, 1_704_153_599_999))
//!     .await;
//! assert_eq!(points.len(), 1);
//! # }
//! ```

pub mod aggregate;
pub mod keys;
pub mod query;
pub mod regression;
pub mod stats;
pub mod store;

pub use aggregate::{aggregate_points, bucket_start};
pub use query::RangeQueryEngine;
pub use regression::find_regressions;
pub use stats::{HistoryStats, HistoryStatsSnapshot};
pub use store::DataPointStore;

use crate::backend::KvBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::HistoryConfig;
use crate::error::StoreError;
use crate::types::{
    AggregatedBucket, Granularity, HistoricalDataPoint, NewDataPoint, RegressionFinding,
    RenderingStrategy, TimeRangeQuery,
};

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, warn};

/// Entry point for every history operation
pub struct HistoryService {
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
    store: DataPointStore,
    engine: RangeQueryEngine,
    config: HistoryConfig,
    stats: HistoryStats,
}

impl HistoryService {
    /// Create a service on the system clock
    pub fn new(backend: Arc<dyn KvBackend>, config: HistoryConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Create a service reading "now" from `clock`
    pub fn with_clock(
        backend: Arc<dyn KvBackend>,
        config: HistoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = DataPointStore::new(
            backend.clone(),
            clock.clone(),
            config.retention_secs(),
            config.default_project_id.clone(),
        );
        let engine = RangeQueryEngine::new(backend.clone(), config.default_project_id.clone());

        debug!(
            backend = backend.backend_id(),
            retention_days = config.retention_days,
            "History service initialized"
        );

        Self {
            backend,
            clock,
            store,
            engine,
            config,
            stats: HistoryStats::default(),
        }
    }

    /// Identifier of the underlying backend
    pub fn backend_id(&self) -> &str {
        self.backend.backend_id()
    }

    /// Active configuration
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Operation counters
    pub fn stats(&self) -> HistoryStatsSnapshot {
        self.stats.snapshot()
    }

    // =========================================================================
    // Save
    // =========================================================================

    /// Persist a point; `false` on any failure
    ///
    /// The record expires after the configured retention. A later save for
    /// the same strategy, project and millisecond replaces this one.
    ///
    /// # Arguments
    ///
    /// * `point` - Snapshot to store; `project_id` falls back to the configured default
    /// * `timestamp` - Measurement time in epoch milliseconds; now when `None`
    ///
    /// # Returns
    ///
    /// `true` once the backend acknowledged the write. Backend errors and
    /// snapshots holding NaN or infinite values yield `false` and bump
    /// `save_failures`.
    pub async fn save(&self, point: NewDataPoint, timestamp: Option<i64>) -> bool {
        HistoryStats::bump(&self.stats.saves);
        let strategy = point.strategy;

        match self.try_save(point, timestamp).await {
            Ok(_) => true,
            Err(e) => {
                HistoryStats::bump(&self.stats.save_failures);
                warn!(error = %e, %strategy, "Failed to save data point");
                false
            },
        }
    }

    /// Persist a point, returning the stored record
    pub async fn try_save(
        &self,
        point: NewDataPoint,
        timestamp: Option<i64>,
    ) -> Result<HistoricalDataPoint, StoreError> {
        self.store.try_save(point, timestamp).await
    }

    // =========================================================================
    // Get
    // =========================================================================

    /// Latest point of a strategy/project/day; `None` on miss or failure
    ///
    /// # Arguments
    ///
    /// * `strategy` - Rendering strategy to read
    /// * `project_id` - Project; the configured default when `None`
    /// * `date` - UTC calendar day; today when `None`
    ///
    /// # Returns
    ///
    /// The point with the greatest timestamp stored for that day, or `None`
    /// when the day is empty or the read failed.
    pub async fn get(
        &self,
        strategy: RenderingStrategy,
        project_id: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Option<HistoricalDataPoint> {
        HistoryStats::bump(&self.stats.reads);

        match self.try_get(strategy, project_id, date).await {
            Ok(point) => point,
            Err(e) => {
                HistoryStats::bump(&self.stats.read_failures);
                warn!(
                    error = %e,
                    %strategy,
                    project_id = project_id.unwrap_or(&self.config.default_project_id),
                    "Failed to read data point"
                );
                None
            },
        }
    }

    /// Latest point of a strategy/project/day
    pub async fn try_get(
        &self,
        strategy: RenderingStrategy,
        project_id: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Option<HistoricalDataPoint>, StoreError> {
        self.store.try_get(strategy, project_id, date).await
    }

    // =========================================================================
    // Query
    // =========================================================================

    /// Points in an inclusive window, oldest first; empty on failure
    ///
    /// Keys are listed per strategy, pruned by calendar day and fetched in a
    /// single batch read. The exact window is then applied to each record's
    /// timestamp, so bounds such as `0..=i64::MAX` are valid.
    ///
    /// # Arguments
    ///
    /// * `query` - Window bounds plus optional strategy and project filters
    ///
    /// # Returns
    ///
    /// Matching points sorted by timestamp. An inverted window, a backend
    /// error or an undecodable record yields an empty list.
    pub async fn query(&self, query: &TimeRangeQuery) -> Vec<HistoricalDataPoint> {
        HistoryStats::bump(&self.stats.queries);

        match self.try_query(query).await {
            Ok(points) => {
                HistoryStats::add(&self.stats.points_returned, points.len());
                points
            },
            Err(e) => {
                HistoryStats::bump(&self.stats.query_failures);
                warn!(
                    error = %e,
                    start = query.start,
                    end = query.end,
                    strategy = ?query.strategy,
                    "Range query failed"
                );
                Vec::new()
            },
        }
    }

    /// Points in an inclusive window, oldest first
    pub async fn try_query(
        &self,
        query: &TimeRangeQuery,
    ) -> Result<Vec<HistoricalDataPoint>, StoreError> {
        self.engine.try_query(query).await
    }

    // =========================================================================
    // Aggregate
    // =========================================================================

    /// Calendar buckets over `[start, end]`; empty on failure
    ///
    /// # Arguments
    ///
    /// * `strategy` - Restrict to one strategy; all strategies when `None`
    /// * `project_id` - Project; the configured default when `None`
    /// * `granularity` - UTC hour, day, ISO week or calendar month
    /// * `start`, `end` - Inclusive window in epoch milliseconds
    ///
    /// # Returns
    ///
    /// Non-empty buckets ascending by start, each with count, mean, min and
    /// max for all five metrics.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use std::sync::Arc;
    /// # use vitals_tsdb::backend::InMemoryBackend;
    /// # use vitals_tsdb::config::HistoryConfig;
    /// # use vitals_tsdb::history::HistoryService;
    /// # use vitals_tsdb::types::{CoreMetrics, Granularity, NewDataPoint, RenderingStrategy};
    /// # #[tokio::main]
    /// # async fn main() {
    /// let service = HistoryService::new(Arc::new(InMemoryBackend::new()), HistoryConfig::default());
    /// let metrics = CoreMetrics::from_values("t", [1200.0, 1800.0, 0.05, 150.0, 400.0]);
    ///
    /// // 2024-01-01T10:00Z and 14:00Z share a day bucket
    /// for ts in [1_704_103_200_000, 1_704_117_600_000] {
    ///     service.save(NewDataPoint::new(RenderingStrategy::Ssr, metrics.clone()), Some(ts)).await;
    /// }
    ///
    /// let buckets = service
    ///     .aggregate(None, None, Granularity::Day, 0, i64::MAX)
    ///     .await;
    /// assert_eq!(buckets.len(), 1);
    /// assert_eq!(buckets[0].count, 2);
    /// # }
    /// ```
    pub async fn aggregate(
        &self,
        strategy: Option<RenderingStrategy>,
        project_id: Option<&str>,
        granularity: Granularity,
        start: i64,
        end: i64,
    ) -> Vec<AggregatedBucket> {
        HistoryStats::bump(&self.stats.aggregations);

        match self
            .try_aggregate(strategy, project_id, granularity, start, end)
            .await
        {
            Ok(buckets) => buckets,
            Err(e) => {
                HistoryStats::bump(&self.stats.aggregation_failures);
                warn!(error = %e, %granularity, start, end, "Aggregation failed");
                Vec::new()
            },
        }
    }

    /// Calendar buckets over `[start, end]`
    pub async fn try_aggregate(
        &self,
        strategy: Option<RenderingStrategy>,
        project_id: Option<&str>,
        granularity: Granularity,
        start: i64,
        end: i64,
    ) -> Result<Vec<AggregatedBucket>, StoreError> {
        let points = self
            .engine
            .try_query(&window_query(strategy, project_id, start, end))
            .await?;
        Ok(aggregate_points(&points, granularity))
    }

    // =========================================================================
    // Regressions
    // =========================================================================

    /// Metrics that worsened over the trailing window; empty on failure
    ///
    /// The window ends now and spans the configured number of days. Its
    /// points are split in half by position; a metric is reported when the
    /// mean of the later half exceeds the earlier half by more than
    /// `threshold`. Metrics whose earlier mean is zero are skipped.
    ///
    /// # Arguments
    ///
    /// * `strategy` - Rendering strategy to check
    /// * `project_id` - Project; the configured default when `None`
    /// * `threshold` - Fractional increase, e.g. `0.2` for 20%; configured default when `None`
    ///
    /// # Returns
    ///
    /// One finding per regressed metric, in metric order. Fewer than two
    /// points or a failed read yields an empty list.
    pub async fn detect_regressions(
        &self,
        strategy: RenderingStrategy,
        project_id: Option<&str>,
        threshold: Option<f64>,
    ) -> Vec<RegressionFinding> {
        HistoryStats::bump(&self.stats.regression_checks);

        match self
            .try_detect_regressions(strategy, project_id, threshold)
            .await
        {
            Ok(findings) => findings,
            Err(e) => {
                HistoryStats::bump(&self.stats.regression_failures);
                warn!(error = %e, %strategy, "Regression check failed");
                Vec::new()
            },
        }
    }

    /// Metrics that worsened over the trailing window
    pub async fn try_detect_regressions(
        &self,
        strategy: RenderingStrategy,
        project_id: Option<&str>,
        threshold: Option<f64>,
    ) -> Result<Vec<RegressionFinding>, StoreError> {
        let threshold = threshold.unwrap_or(self.config.regression_threshold);
        let end = self.clock.now_millis();
        let start = end.saturating_sub(self.config.regression_window_ms());

        let points = self
            .engine
            .try_query(&window_query(Some(strategy), project_id, start, end))
            .await?;
        let findings = find_regressions(&points, threshold);

        debug!(
            %strategy,
            points = points.len(),
            findings = findings.len(),
            threshold,
            "Regression check complete"
        );
        Ok(findings)
    }
}

fn window_query(
    strategy: Option<RenderingStrategy>,
    project_id: Option<&str>,
    start: i64,
    end: i64,
) -> TimeRangeQuery {
    TimeRangeQuery {
        start,
        end,
        strategy,
        project_id: project_id.map(str::to_string),
    }
}
