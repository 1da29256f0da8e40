//! Redis implementation of [`KvBackend`]
//!
//! | Operation    | Redis command                     |
//! |--------------|-----------------------------------|
//! | `set`        | `SET key value EX ttl`            |
//! | `get`        | `GET key`                         |
//! | `list_keys`  | `SCAN cursor MATCH pattern COUNT n` until the cursor returns to 0 |
//! | `multi_get`  | one `MGET` for the whole batch    |
//!
//! `SCAN` is used instead of `KEYS` so listing never blocks the server, at
//! the price of possibly seeing a key twice; duplicates are dropped here.

use super::connection::{HealthStatus, PoolMetricsSnapshot, RedisConfig, RedisPool};
use crate::backend::KvBackend;
use crate::error::StoreError;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Default `COUNT` hint for `SCAN`
pub const DEFAULT_SCAN_COUNT: usize = 500;

/// Key-value backend over a shared [`RedisPool`]
pub struct RedisBackend {
    pool: Arc<RedisPool>,
    scan_count: usize,
}

impl RedisBackend {
    /// Open a pool for `config` and wrap it
    pub async fn connect(config: RedisConfig, scan_count: usize) -> Result<Self, StoreError> {
        let pool = RedisPool::new(config).await?;
        Ok(Self::from_pool(Arc::new(pool), scan_count))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Arc<RedisPool>, scan_count: usize) -> Self {
        Self {
            pool,
            scan_count: scan_count.max(1),
        }
    }

    /// PING the server
    pub async fn health_check(&self) -> HealthStatus {
        self.pool.health_check().await
    }

    /// Connection pool metrics
    pub fn pool_metrics(&self) -> PoolMetricsSnapshot {
        self.pool.metrics()
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    fn backend_id(&self) -> &str {
        "redis-kv-v1"
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.pool
            .execute("SET", |mut conn| async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl_secs.max(1))
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self
            .pool
            .execute("GET", |mut conn| async move {
                redis::cmd("GET").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(value)
    }

    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let count = self.scan_count;
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        let mut pages = 0usize;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .pool
                .execute("SCAN", |mut conn| async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(count)
                        .query_async(&mut conn)
                        .await
                })
                .await?;

            merge_scan_page(&mut seen, &mut keys, batch);
            pages += 1;

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern, pages, matched = keys.len(), "SCAN complete");
        Ok(keys)
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = self
            .pool
            .execute("MGET", |mut conn| async move {
                redis::cmd("MGET").arg(keys).query_async(&mut conn).await
            })
            .await?;

        if values.len() != keys.len() {
            return Err(StoreError::Backend(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }
}

/// Append the keys of one `SCAN` page that have not been seen yet
fn merge_scan_page(seen: &mut HashSet<String>, keys: &mut Vec<String>, page: Vec<String>) {
    for key in page {
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }
}
