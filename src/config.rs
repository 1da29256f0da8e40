//! Configuration management for vitals-tsdb
//!
//! TOML file support with environment variable overrides and defaults for
//! every field, so an empty file is a valid configuration.
//!
//! ```toml
//! [redis]
//! url = "redis://127.0.0.1:6379"
//! pool_size = 16
//!
//! [history]
//! retention_days = 90
//! regression_threshold = 0.2
//!
//! [monitoring]
//! log_level = "info"
//! ```

use crate::error::{Error, Result};
use crate::redis::{RedisConfig, RetryPolicy, DEFAULT_SCAN_COUNT};
use crate::history::regression::{DEFAULT_REGRESSION_THRESHOLD, DEFAULT_REGRESSION_WINDOW_DAYS};
use crate::types::DEFAULT_PROJECT_ID;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Redis backend
    #[serde(default)]
    pub redis: RedisSettings,

    /// History engine
    #[serde(default)]
    pub history: HistoryConfig,

    /// Logging
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Redis backend configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RedisSettings {
    /// Server URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Maximum in-flight commands
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// `COUNT` hint for key scans
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
}

/// History engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HistoryConfig {
    /// Days a data point is kept before the backend expires it
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Length of the trailing window inspected for regressions
    #[serde(default = "default_regression_window_days")]
    pub regression_window_days: u32,

    /// Fractional increase reported as a regression
    #[serde(default = "default_regression_threshold")]
    pub regression_threshold: f64,

    /// Project id used when a caller does not name one
    #[serde(default = "default_project_id")]
    pub default_project_id: String,
}

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level (error, warn, info, debug, trace) or an `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_pool_size() -> u32 { 16 }
fn default_connection_timeout_ms() -> u64 { 5_000 }
fn default_command_timeout_ms() -> u64 { 1_000 }
fn default_max_retries() -> u32 { 3 }
fn default_scan_count() -> usize { DEFAULT_SCAN_COUNT }
fn default_retention_days() -> u64 { 90 }
fn default_regression_window_days() -> u32 { DEFAULT_REGRESSION_WINDOW_DAYS }
fn default_regression_threshold() -> f64 { DEFAULT_REGRESSION_THRESHOLD }
fn default_project_id() -> String { DEFAULT_PROJECT_ID.to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connection_timeout_ms: default_connection_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            max_retries: default_max_retries(),
            scan_count: default_scan_count(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            regression_window_days: default_regression_window_days(),
            regression_threshold: default_regression_threshold(),
            default_project_id: default_project_id(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl RedisSettings {
    /// Pool configuration for these settings
    pub fn to_redis_config(&self) -> RedisConfig {
        RedisConfig::with_url(self.url.clone())
            .pool_size(self.pool_size)
            .connection_timeout(Duration::from_millis(self.connection_timeout_ms))
            .command_timeout(Duration::from_millis(self.command_timeout_ms))
            .retry_policy(RetryPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            })
            .tls(self.url.starts_with("rediss://"))
    }
}

impl HistoryConfig {
    /// Retention as a backend expiry in seconds
    pub fn retention_secs(&self) -> u64 {
        self.retention_days.saturating_mul(SECS_PER_DAY)
    }

    /// Regression window in milliseconds
    pub fn regression_window_ms(&self) -> i64 {
        i64::from(self.regression_window_days) * MS_PER_DAY
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Unparsable numeric values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("VITALS_REDIS_URL") {
            self.redis.url = url;
        }

        if let Ok(days) = std::env::var("VITALS_RETENTION_DAYS") {
            if let Ok(d) = days.parse() {
                self.history.retention_days = d;
            }
        }
        if let Ok(threshold) = std::env::var("VITALS_REGRESSION_THRESHOLD") {
            if let Ok(t) = threshold.parse() {
                self.history.regression_threshold = t;
            }
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Configuration(msg.to_string()));

        self.redis
            .to_redis_config()
            .validate()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        if self.redis.scan_count == 0 {
            return invalid("Redis scan count must be > 0");
        }

        if self.history.retention_days == 0 {
            return invalid("Retention must be at least one day");
        }
        if self.history.regression_window_days == 0 {
            return invalid("Regression window must be at least one day");
        }
        if !self.history.regression_threshold.is_finite() || self.history.regression_threshold < 0.0
        {
            return invalid("Regression threshold must be a non-negative number");
        }
        if self.history.default_project_id.is_empty() {
            return invalid("Default project id cannot be empty");
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path.display(), e))
        })
    }
}
