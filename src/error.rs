//! Error types for the history engine

use std::time::Duration;
use thiserror::Error;

/// Crate-level error type
///
/// Returned by configuration loading, argument parsing and anything else that
/// sits outside the fail-soft history operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Key-value backend or record error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unrecognized strategy, granularity or metric name
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised at the key-value backend boundary
///
/// Every public history operation converts these into its documented
/// sentinel (`false`, `None`, empty list); the `try_*` counterparts expose
/// them directly.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Could not reach the backend or the connection dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// A backend command did not complete in time
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    /// The backend rejected or failed a command
    #[error("Backend error: {0}")]
    Backend(String),

    /// A data point could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored record could not be decoded
    #[error("Malformed record at {key}: {reason}")]
    Deserialization {
        /// Backend key holding the record
        key: String,
        /// Decoder message
        reason: String,
    },

    /// Window start lies after its end
    #[error("Invalid time range: start {start} > end {end}")]
    InvalidTimeRange {
        /// Start timestamp (ms)
        start: i64,
        /// End timestamp (ms)
        end: i64,
    },

    /// Backend configuration is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Whether the failure came from the transport rather than the data
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Timeout(_) | StoreError::Backend(_)
        )
    }
}

/// Result alias using the crate-level [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
