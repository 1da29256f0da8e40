//! Redis storage for the history engine
//!
//! # Key Schema
//!
//! ```text
//! historical:{project}:{strategy}:{YYYY-MM-DD}:{epochMs}  → JSON HistoricalDataPoint (EX 90d)
//! historical:agg:{project}:{strategy}:{granularity}:{label} → reserved for pre-aggregated buckets
//! ```
//!
//! # Features
//!
//! - Multiplexed connection with bounded in-flight commands
//! - Per-command timeouts and retry with exponential backoff
//! - Non-blocking key listing via `SCAN`
//! - Credential-safe error messages
//!
//! # Example
//!
//! ```rust,no_run
//! use vitals_tsdb::backend::KvBackend;
//! use vitals_tsdb::redis::{RedisBackend, RedisConfig, DEFAULT_SCAN_COUNT};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = RedisBackend::connect(RedisConfig::default(), DEFAULT_SCAN_COUNT).await?;
//! assert_eq!(backend.backend_id(), "redis-kv-v1");
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod connection;
pub mod util;

pub use backend::{RedisBackend, DEFAULT_SCAN_COUNT};
pub use connection::{
    HealthStatus, PoolMetrics, PoolMetricsSnapshot, RedisConfig, RedisPool, RetryPolicy,
};
