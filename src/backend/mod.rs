//! Key-value backend contract
//!
//! The history engine only needs four operations from its storage:
//! expiring writes, point reads, pattern listing and order-preserving batch
//! reads. Implementations:
//!
//! - [`crate::redis::RedisBackend`] for production
//! - [`InMemoryBackend`] for tests and local runs
//!
//! A backend is built once at startup and shared as `Arc<dyn KvBackend>`.

mod memory;
mod pattern;

pub use memory::{BackendCallSnapshot, BackendOp, InMemoryBackend};
pub use pattern::{escape_glob, glob_match};

use crate::error::StoreError;
use async_trait::async_trait;

/// Core trait for key-value backends
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Unique identifier for this backend
    fn backend_id(&self) -> &str;

    /// Store `value` under `key`, expiring after `ttl_secs` seconds
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// List keys matching a glob pattern (`*`, `?`, `[...]`, `\` escapes)
    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Read many keys in one round trip
    ///
    /// The result has the same length and order as `keys`; missing keys
    /// come back as `None`.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;
}
