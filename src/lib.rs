//! vitals-tsdb - Time-series history for Core Web Vitals snapshots
//!
//! This library stores performance measurements tagged by rendering strategy
//! and project over a flat key-value store, and provides:
//! - Range-queryable key layout with one record per measurement
//! - Batched range queries with exact millisecond filtering
//! - Calendar-aligned roll-ups (hour, day, ISO week, month)
//! - Split-window regression detection
//! - Redis and in-memory backends behind one trait

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod clock;
pub mod error;
pub mod history;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// Redis backend: connection pool, retries and the key-value adapter
pub mod redis;

// Re-export main types
pub use backend::{InMemoryBackend, KvBackend};
pub use config::{Config, HistoryConfig};
pub use error::{Error, Result, StoreError};
pub use history::HistoryService;
pub use types::{
    AggregatedBucket, CoreMetrics, Granularity, HistoricalDataPoint, MetricName, NewDataPoint,
    RegressionFinding, RenderingStrategy, TimeRange, TimeRangeQuery,
};
