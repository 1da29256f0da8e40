//! Redis connection pool with health checking and retry logic
//!
//! Wraps one multiplexed connection behind a semaphore that bounds the number
//! of in-flight commands. Every command runs under a timeout and transient
//! failures are retried with exponential backoff and jitter.
//!
//! # Example
//!
//! ```rust,no_run
//! use vitals_tsdb::redis::{RedisConfig, RedisPool};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisConfig::with_url("redis://localhost:6379")
//!     .pool_size(32)
//!     .command_timeout(Duration::from_millis(500));
//!
//! let pool = RedisPool::new(config).await?;
//! let pong: String = pool
//!     .execute("PING", |mut conn| async move {
//!         redis::cmd("PING").query_async(&mut conn).await
//!     })
//!     .await?;
//! assert_eq!(pong, "PONG");
//! # Ok(())
//! # }
//! ```

use crate::error::StoreError;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, warn};

use super::util::safe_redis_error;

/// Configuration for the Redis connection pool
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis server URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Maximum number of concurrent in-flight commands
    /// Default: 16
    pub pool_size: u32,

    /// Timeout for establishing the connection
    /// Default: 5 seconds
    pub connection_timeout: Duration,

    /// Timeout for individual commands
    /// Default: 1 second
    pub command_timeout: Duration,

    /// Retry policy for failed commands
    pub retry_policy: RetryPolicy,

    /// Enable TLS (`rediss://`)
    /// Default: false
    pub tls_enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
            tls_enabled: false,
        }
    }
}

impl RedisConfig {
    /// Create a config for `url` with default limits
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of in-flight commands
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the per-command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Enable or disable TLS; requires the `redis-tls` feature
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |msg: &str| Err(StoreError::Configuration(msg.to_string()));

        if self.url.is_empty() {
            return invalid("Redis URL cannot be empty");
        }
        if self.pool_size == 0 {
            return invalid("Pool size must be greater than 0");
        }
        if self.pool_size > 1000 {
            return invalid("Pool size cannot exceed 1000");
        }
        if self.command_timeout.is_zero() {
            return invalid("Command timeout must be greater than 0");
        }

        #[cfg(not(feature = "redis-tls"))]
        if self.tls_enabled {
            return invalid(
                "TLS is enabled but the 'redis-tls' feature is not compiled. \
                 Enable it with: cargo build --features redis-tls",
            );
        }

        if !self.tls_enabled && self.url.starts_with("rediss://") {
            return invalid(
                "URL uses 'rediss://' scheme but TLS is not enabled. \
                 Either use 'redis://' or enable TLS with .tls(true)",
            );
        }

        Ok(())
    }

    /// URL with the scheme matching the TLS setting
    pub fn effective_url(&self) -> String {
        match (self.tls_enabled, self.url.strip_prefix("redis://")) {
            (true, Some(rest)) => format!("rediss://{}", rest),
            _ => self.url.clone(),
        }
    }
}

/// Retry policy with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    /// Default: 3
    pub max_retries: u32,

    /// Delay before the first retry
    /// Default: 100ms
    pub initial_delay: Duration,

    /// Upper bound on any single delay
    /// Default: 5 seconds
    pub max_delay: Duration,

    /// Backoff multiplier
    /// Default: 2.0
    pub multiplier: f64,

    /// Add up to 25% random jitter
    /// Default: true
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.jitter {
            capped * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            capped
        };

        Duration::from_millis(delay_ms as u64)
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Pool counters
#[derive(Debug, Default)]
pub struct PoolMetrics {
    connections_created: AtomicU64,
    connection_failures: AtomicU64,
    commands_executed: AtomicU64,
    command_failures: AtomicU64,
    retries: AtomicU64,
    total_latency_us: AtomicU64,
}

impl PoolMetrics {
    fn record_connection(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_command(&self, latency: Duration) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_command_failure(&self) {
        self.command_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        let executed = self.commands_executed.load(Ordering::Relaxed);
        let latency = self.total_latency_us.load(Ordering::Relaxed);
        PoolMetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            commands_executed: executed,
            command_failures: self.command_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            average_latency_us: if executed == 0 {
                0.0
            } else {
                latency as f64 / executed as f64
            },
        }
    }
}

/// Snapshot of pool metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMetricsSnapshot {
    /// Connections established
    pub connections_created: u64,
    /// Failed connection attempts
    pub connection_failures: u64,
    /// Successful commands
    pub commands_executed: u64,
    /// Failed command attempts (including retried ones)
    pub command_failures: u64,
    /// Retries performed
    pub retries: u64,
    /// Mean latency of successful commands in microseconds
    pub average_latency_us: f64,
}

/// Health of the Redis connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// PING answered quickly
    Healthy,
    /// PING answered but slowly (>100ms)
    Degraded,
    /// PING failed
    Unhealthy,
}

/// Shared Redis connection with bounded concurrency
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    config: RedisConfig,
    metrics: Arc<PoolMetrics>,
    permits: Arc<Semaphore>,
}

impl RedisPool {
    /// Validate the config, open the client and establish the connection
    pub async fn new(config: RedisConfig) -> Result<Self, StoreError> {
        config.validate()?;

        let url = config.effective_url();
        let client = Client::open(url.as_str())
            .map_err(|e| StoreError::Configuration(safe_redis_error(&url, &e)))?;

        let pool = Self {
            client,
            connection: RwLock::new(None),
            permits: Arc::new(Semaphore::new(config.pool_size as usize)),
            metrics: Arc::new(PoolMetrics::default()),
            config,
        };
        pool.connect().await?;

        debug!(pool_size = pool.config.pool_size, "Redis connection pool initialized");
        Ok(pool)
    }

    /// Establish or re-establish the multiplexed connection
    async fn connect(&self) -> Result<MultiplexedConnection, StoreError> {
        let start = Instant::now();

        let conn = tokio::time::timeout(
            self.config.connection_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            self.metrics.record_connection_failure();
            StoreError::Timeout(self.config.connection_timeout)
        })?
        .map_err(|e| {
            self.metrics.record_connection_failure();
            StoreError::Connection(safe_redis_error(&self.config.url, &e))
        })?;

        *self.connection.write().await = Some(conn.clone());
        self.metrics.record_connection();

        debug!("Redis connection established in {:?}", start.elapsed());
        Ok(conn)
    }

    /// Acquire a command permit and a handle to the shared connection
    async fn checkout(&self) -> Result<(OwnedSemaphorePermit, MultiplexedConnection), StoreError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Connection("Redis pool closed".to_string()))?;

        let existing = self.connection.read().await.clone();
        let conn = match existing {
            Some(conn) => conn,
            None => self.connect().await?,
        };

        Ok((permit, conn))
    }

    /// Run a command with timeout and retry
    ///
    /// Each attempt holds one of `pool_size` permits and runs under
    /// `command_timeout`. Dropped connections, I/O errors, `LOADING` and
    /// `TRYAGAIN` replies are retried per the [`RetryPolicy`]; the permit
    /// is released while backing off.
    ///
    /// # Arguments
    ///
    /// * `command` - Name of the operation, used in logs only
    /// * `f` - Builds the request from a clone of the multiplexed connection;
    ///   called once per attempt
    ///
    /// # Returns
    ///
    /// The command's reply, or a [`StoreError`] classified as `Timeout`,
    /// `Connection` or `Backend` with credentials removed.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use vitals_tsdb::redis::{RedisConfig, RedisPool};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let pool = RedisPool::new(RedisConfig::default()).await?;
    /// let len: usize = pool
    ///     .execute("STRLEN", |mut conn| async move {
    ///         redis::cmd("STRLEN").arg("some:key").query_async(&mut conn).await
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute<F, Fut, T>(&self, command: &str, f: F) -> Result<T, StoreError>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        let policy = &self.config.retry_policy;
        let mut attempt = 0;

        loop {
            let (permit, conn) = self.checkout().await?;
            let start = Instant::now();

            let error = match tokio::time::timeout(self.config.command_timeout, f(conn)).await {
                Ok(Ok(value)) => {
                    self.metrics.record_command(start.elapsed());
                    return Ok(value);
                },
                Ok(Err(e)) => {
                    self.metrics.record_command_failure();
                    let error = classify(&self.config, &e);
                    if !(policy.should_retry(attempt) && is_retriable_error(&e)) {
                        return Err(error);
                    }
                    if is_connection_error(&e) {
                        // Force a fresh connection on the next checkout
                        *self.connection.write().await = None;
                    }
                    error
                },
                Err(_) => {
                    self.metrics.record_command_failure();
                    if !policy.should_retry(attempt) {
                        return Err(StoreError::Timeout(self.config.command_timeout));
                    }
                    StoreError::Timeout(self.config.command_timeout)
                },
            };

            drop(permit);
            let delay = policy.delay_for_attempt(attempt);
            self.metrics.record_retry();
            warn!(
                command,
                attempt = attempt + 1,
                error = %error,
                "Redis command failed, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Send PING and classify the round trip
    pub async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let result: Result<String, _> = self
            .execute("PING", |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await;

        match result {
            Ok(_) if start.elapsed() > Duration::from_millis(100) => HealthStatus::Degraded,
            Ok(_) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        }
    }

    /// Pool metrics
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Pool configuration
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

/// Map a Redis error onto the backend error taxonomy without leaking credentials
fn classify(config: &RedisConfig, e: &RedisError) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout(config.command_timeout)
    } else if is_connection_error(e) {
        StoreError::Connection(safe_redis_error(&config.url, e))
    } else {
        StoreError::Backend(safe_redis_error(&config.url, e))
    }
}

fn is_retriable_error(e: &RedisError) -> bool {
    e.is_connection_dropped()
        || e.is_timeout()
        || e.is_io_error()
        || matches!(e.kind(), redis::ErrorKind::BusyLoadingError | redis::ErrorKind::TryAgain)
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error() || e.is_connection_refusal()
}
