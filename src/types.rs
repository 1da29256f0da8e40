//! Core data types used throughout the history engine
//!
//! # Key Types
//!
//! - **`MetricName`**: One of the five tracked vitals (`fcp`, `lcp`, `cls`, `inp`, `ttfb`)
//! - **`CoreMetrics`**: A full snapshot holding one sample per vital
//! - **`RenderingStrategy`**: Rendering mode a snapshot was measured under
//! - **`HistoricalDataPoint`**: The persisted unit (timestamp + strategy + project + metrics)
//! - **`TimeRange`** / **`TimeRangeQuery`**: Inclusive windows for range queries
//! - **`AggregatedBucket`** / **`RegressionFinding`**: Analysis outputs
//!
//! # Example
//!
//! ```rust
//! use vitals_tsdb::types::{CoreMetrics, MetricName, NewDataPoint, RenderingStrategy, TimeRange};
//!
//! let metrics = CoreMetrics::from_values("2024-01-01T10:00:00Z", [1200.0, 1800.0, 0.05, 150.0, 400.0]);
//! assert_eq!(metrics.value(MetricName::Lcp), 1800.0);
//!
//! let point = NewDataPoint::new(RenderingStrategy::Ssr, metrics).with_project("shop");
//! assert_eq!(point.project_id.as_deref(), Some("shop"));
//!
//! let range = TimeRange::new(1000, 2000).unwrap();
//! assert!(range.contains(2000));
//! ```

use crate::clock::utc_from_millis;
use crate::error::{Error, StoreError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Project id used when a caller does not name one
pub const DEFAULT_PROJECT_ID: &str = "default";

fn default_project_id() -> String {
    DEFAULT_PROJECT_ID.to_string()
}

// =============================================================================
// Metrics
// =============================================================================

/// The five tracked vitals
///
/// Every metric is "lower is better". Declaration order is the iteration
/// order used for aggregation output and regression findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricName {
    /// First Contentful Paint (ms)
    Fcp,
    /// Largest Contentful Paint (ms)
    Lcp,
    /// Cumulative Layout Shift (unitless)
    Cls,
    /// Interaction to Next Paint (ms)
    Inp,
    /// Time to First Byte (ms)
    Ttfb,
}

impl MetricName {
    /// All metrics in iteration order
    pub const ALL: [MetricName; 5] = [
        MetricName::Fcp,
        MetricName::Lcp,
        MetricName::Cls,
        MetricName::Inp,
        MetricName::Ttfb,
    ];

    /// Wire name of the metric
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Fcp => "fcp",
            MetricName::Lcp => "lcp",
            MetricName::Cls => "cls",
            MetricName::Inp => "inp",
            MetricName::Ttfb => "ttfb",
        }
    }

    /// Upper bounds of the `good` and `needs-improvement` bands
    pub fn thresholds(&self) -> (f64, f64) {
        match self {
            MetricName::Fcp => (1800.0, 3000.0),
            MetricName::Lcp => (2500.0, 4000.0),
            MetricName::Cls => (0.1, 0.25),
            MetricName::Inp => (200.0, 500.0),
            MetricName::Ttfb => (800.0, 1800.0),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricName::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Parse(format!("unknown metric '{}'", s)))
    }
}

/// Quality band of a metric observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    /// Within the recommended target
    Good,
    /// Between the good and poor thresholds
    NeedsImprovement,
    /// Beyond the poor threshold
    Poor,
}

impl Rating {
    /// Rate a value against the metric's published thresholds
    pub fn for_value(metric: MetricName, value: f64) -> Self {
        let (good, poor) = metric.thresholds();
        if value <= good {
            Rating::Good
        } else if value <= poor {
            Rating::NeedsImprovement
        } else {
            Rating::Poor
        }
    }
}

/// One named metric observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Observed value
    pub value: f64,
    /// Quality band reported by the producer
    pub rating: Rating,
    /// Change since the previous report of the same page load
    pub delta: f64,
}

impl MetricSample {
    /// Create a sample with an explicit rating
    pub fn new(value: f64, rating: Rating, delta: f64) -> Self {
        Self {
            value,
            rating,
            delta,
        }
    }

    /// Create a sample whose rating is derived from the metric thresholds
    pub fn rated(metric: MetricName, value: f64) -> Self {
        Self::new(value, Rating::for_value(metric, value), 0.0)
    }
}

/// A full vitals snapshot
///
/// All five metrics are required; a stored record missing any of them fails
/// to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreMetrics {
    /// First Contentful Paint
    pub fcp: MetricSample,
    /// Largest Contentful Paint
    pub lcp: MetricSample,
    /// Cumulative Layout Shift
    pub cls: MetricSample,
    /// Interaction to Next Paint
    pub inp: MetricSample,
    /// Time to First Byte
    pub ttfb: MetricSample,
    /// ISO-8601 time the producer captured the snapshot
    pub timestamp: String,
}

impl CoreMetrics {
    /// Build a snapshot from raw values ordered as [`MetricName::ALL`]
    pub fn from_values(timestamp: impl Into<String>, values: [f64; 5]) -> Self {
        let [fcp, lcp, cls, inp, ttfb] = values;
        Self {
            fcp: MetricSample::rated(MetricName::Fcp, fcp),
            lcp: MetricSample::rated(MetricName::Lcp, lcp),
            cls: MetricSample::rated(MetricName::Cls, cls),
            inp: MetricSample::rated(MetricName::Inp, inp),
            ttfb: MetricSample::rated(MetricName::Ttfb, ttfb),
            timestamp: timestamp.into(),
        }
    }

    /// Sample for a metric
    pub fn sample(&self, metric: MetricName) -> &MetricSample {
        match metric {
            MetricName::Fcp => &self.fcp,
            MetricName::Lcp => &self.lcp,
            MetricName::Cls => &self.cls,
            MetricName::Inp => &self.inp,
            MetricName::Ttfb => &self.ttfb,
        }
    }

    /// Value for a metric
    pub fn value(&self, metric: MetricName) -> f64 {
        self.sample(metric).value
    }

    /// First metric whose value or delta is NaN or infinite
    ///
    /// JSON has no encoding for non-finite numbers, so such a snapshot
    /// cannot be stored and read back.
    pub fn first_non_finite(&self) -> Option<MetricName> {
        MetricName::ALL.iter().copied().find(|&metric| {
            let sample = self.sample(metric);
            !sample.value.is_finite() || !sample.delta.is_finite()
        })
    }
}

// =============================================================================
// Strategy
// =============================================================================

/// Rendering strategy a snapshot was measured under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum RenderingStrategy {
    /// Server-side rendering
    #[serde(rename = "SSR")]
    Ssr,
    /// Static site generation
    #[serde(rename = "SSG")]
    Ssg,
    /// Incremental static regeneration
    #[serde(rename = "ISR")]
    Isr,
    /// Client-side rendering
    #[serde(rename = "CSR")]
    Csr,
}

impl RenderingStrategy {
    /// Every known strategy, scanned in this order by unfiltered queries
    pub const ALL: [RenderingStrategy; 4] = [
        RenderingStrategy::Ssr,
        RenderingStrategy::Ssg,
        RenderingStrategy::Isr,
        RenderingStrategy::Csr,
    ];

    /// Wire name (`SSR`, `SSG`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderingStrategy::Ssr => "SSR",
            RenderingStrategy::Ssg => "SSG",
            RenderingStrategy::Isr => "ISR",
            RenderingStrategy::Csr => "CSR",
        }
    }

    /// Lowercased form used inside backend keys
    pub fn key_segment(&self) -> &'static str {
        match self {
            RenderingStrategy::Ssr => "ssr",
            RenderingStrategy::Ssg => "ssg",
            RenderingStrategy::Isr => "isr",
            RenderingStrategy::Csr => "csr",
        }
    }
}

impl fmt::Display for RenderingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RenderingStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Parse(format!("unknown rendering strategy '{}'", s)))
    }
}

// =============================================================================
// Data points
// =============================================================================

/// A measurement about to be saved; the store assigns its timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDataPoint {
    /// Rendering strategy
    pub strategy: RenderingStrategy,
    /// Project identifier, `"default"` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Vitals snapshot
    pub metrics: CoreMetrics,
    /// Auxiliary tags (origin URL, environment, user agent, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl NewDataPoint {
    /// Create a point for the default project without metadata
    pub fn new(strategy: RenderingStrategy, metrics: CoreMetrics) -> Self {
        Self {
            strategy,
            project_id: None,
            metrics,
            metadata: None,
        }
    }

    /// Attach a project id
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Add one metadata tag
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Resolve into the persisted form
    pub fn into_historical(self, timestamp: i64, default_project_id: &str) -> HistoricalDataPoint {
        HistoricalDataPoint {
            timestamp,
            strategy: self.strategy,
            project_id: self
                .project_id
                .unwrap_or_else(|| default_project_id.to_string()),
            metrics: self.metrics,
            metadata: self.metadata,
        }
    }
}

/// The persisted unit
///
/// Serializes to the record layout shared with existing data:
/// `{timestamp, strategy, projectId, metrics, metadata?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalDataPoint {
    /// True measurement time in epoch milliseconds
    pub timestamp: i64,
    /// Rendering strategy
    pub strategy: RenderingStrategy,
    /// Project identifier
    #[serde(default = "default_project_id")]
    pub project_id: String,
    /// Vitals snapshot
    pub metrics: CoreMetrics,
    /// Auxiliary tags, opaque to the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

// =============================================================================
// Time windows
// =============================================================================

/// Time range for queries (inclusive on both ends)
///
/// ```rust
/// use vitals_tsdb::types::TimeRange;
///
/// let range = TimeRange::new(1000, 2000).unwrap();
/// assert!(range.contains(1000));
/// assert!(range.contains(2000));
/// assert!(!range.contains(2001));
/// assert!(TimeRange::new(2000, 1000).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,

    /// End timestamp in milliseconds (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: i64, end: i64) -> Result<Self, StoreError> {
        if start > end {
            return Err(StoreError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Duration of the range in milliseconds, `None` on overflow
    pub fn duration_ms(&self) -> Option<i64> {
        self.end.checked_sub(self.start)
    }

    /// First and last UTC calendar day touched by the range
    ///
    /// Bounds outside chrono's range clamp to `NaiveDate::MIN` / `NaiveDate::MAX`.
    pub fn days(&self) -> (NaiveDate, NaiveDate) {
        (
            utc_from_millis(self.start).date_naive(),
            utc_from_millis(self.end).date_naive(),
        )
    }
}

/// Range query as received from callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangeQuery {
    /// Window start in epoch milliseconds (inclusive)
    pub start: i64,
    /// Window end in epoch milliseconds (inclusive)
    pub end: i64,
    /// Restrict to one strategy; all known strategies when absent
    #[serde(default)]
    pub strategy: Option<RenderingStrategy>,
    /// Project identifier, `"default"` when absent
    #[serde(default)]
    pub project_id: Option<String>,
}

impl TimeRangeQuery {
    /// Query every strategy of the default project
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            strategy: None,
            project_id: None,
        }
    }

    /// Restrict to one strategy
    pub fn with_strategy(mut self, strategy: RenderingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Restrict to one project
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

// =============================================================================
// Analysis outputs
// =============================================================================

/// Bucket width for roll-ups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Calendar hour
    Hour,
    /// Calendar day
    Day,
    /// ISO week, starting Monday
    Week,
    /// Calendar month
    Month,
}

impl Granularity {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            _ => Err(Error::Parse(format!("unknown granularity '{}'", s))),
        }
    }
}

/// Average, minimum and maximum of one metric within a bucket
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricStats {
    /// Arithmetic mean
    pub avg: f64,
    /// Smallest value
    pub min: f64,
    /// Largest value
    pub max: f64,
}

impl MetricStats {
    /// Compute stats over a set of values; empty input yields all zeros
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &value in values {
            min = min.min(value);
            max = max.max(value);
            sum += value;
        }

        Self {
            avg: sum / values.len() as f64,
            min,
            max,
        }
    }
}

/// One roll-up row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedBucket {
    /// Bucket start in epoch milliseconds
    pub timestamp: i64,
    /// Number of points in the bucket
    pub count: usize,
    /// Stats per metric, keyed in [`MetricName::ALL`] order
    pub metrics: BTreeMap<MetricName, MetricStats>,
}

/// A metric whose recent average worsened beyond the threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionFinding {
    /// Affected metric
    pub metric: MetricName,
    /// Mean over the older half of the window
    pub baseline: f64,
    /// Mean over the newer half of the window
    pub current: f64,
    /// Fractional change, `(current - baseline) / baseline`
    pub change: f64,
}
