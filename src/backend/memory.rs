//! In-memory key-value backend
//!
//! A lightweight alternative to Redis for tests and local runs. Entries live
//! in a `HashMap` guarded by a `parking_lot::RwLock`, expire against an
//! injected [`Clock`], and every operation can be made to fail on demand so
//! the fail-soft paths of the history engine can be exercised.
//!
//! **Not suitable for production use:** all data is lost on restart.

use super::pattern::glob_match;
use super::KvBackend;
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Backend operations, used to target fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    /// `set`
    Set,
    /// `get`
    Get,
    /// `list_keys`
    ListKeys,
    /// `multi_get`
    MultiGet,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |at| now_ms < at)
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    set: AtomicU64,
    get: AtomicU64,
    list_keys: AtomicU64,
    multi_get: AtomicU64,
}

/// Number of calls served per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCallSnapshot {
    /// `set` calls
    pub set: u64,
    /// `get` calls
    pub get: u64,
    /// `list_keys` calls
    pub list_keys: u64,
    /// `multi_get` calls
    pub multi_get: u64,
}

#[derive(Debug, Default)]
struct Faults {
    always: HashSet<BackendOp>,
    once: HashSet<BackendOp>,
}

/// In-memory [`KvBackend`]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    faults: Mutex<Faults>,
    calls: CallCounters,
}

impl InMemoryBackend {
    /// Create an empty backend on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty backend whose TTLs run on `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            faults: Mutex::new(Faults::default()),
            calls: CallCounters::default(),
        }
    }

    /// Make every subsequent call of `op` fail until [`clear_faults`](Self::clear_faults)
    pub fn fail_always(&self, op: BackendOp) {
        self.faults.lock().always.insert(op);
    }

    /// Make only the next call of `op` fail
    pub fn fail_next(&self, op: BackendOp) {
        self.faults.lock().once.insert(op);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        let mut faults = self.faults.lock();
        faults.always.clear();
        faults.once.clear();
    }

    /// Store a raw value without expiry, bypassing fault injection and counters
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at_ms: None,
            },
        );
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries
            .read()
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Whether the backend holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of a key in seconds, `None` if absent or persistent
    pub fn ttl_secs(&self, key: &str) -> Option<i64> {
        let now = self.clock.now_millis();
        let entries = self.entries.read();
        let entry = entries.get(key).filter(|entry| entry.is_live(now))?;
        entry.expires_at_ms.map(|at| (at - now) / 1000)
    }

    /// Calls served so far
    pub fn calls(&self) -> BackendCallSnapshot {
        BackendCallSnapshot {
            set: self.calls.set.load(Ordering::Relaxed),
            get: self.calls.get.load(Ordering::Relaxed),
            list_keys: self.calls.list_keys.load(Ordering::Relaxed),
            multi_get: self.calls.multi_get.load(Ordering::Relaxed),
        }
    }

    fn enter(&self, op: BackendOp) -> Result<(), StoreError> {
        let counter = match op {
            BackendOp::Set => &self.calls.set,
            BackendOp::Get => &self.calls.get,
            BackendOp::ListKeys => &self.calls.list_keys,
            BackendOp::MultiGet => &self.calls.multi_get,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut faults = self.faults.lock();
        if faults.always.contains(&op) || faults.once.remove(&op) {
            return Err(StoreError::Connection(format!(
                "injected {:?} failure",
                op
            )));
        }
        Ok(())
    }

    fn read_live(&self, key: &str, now_ms: i64) -> Option<String> {
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now_ms))
            .map(|entry| entry.value.clone())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    fn backend_id(&self) -> &str {
        "in-memory-kv-v1"
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.enter(BackendOp::Set)?;

        let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let expires_at_ms = Some(self.clock.now_millis().saturating_add(ttl_ms));
        self.entries.write().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.enter(BackendOp::Get)?;
        Ok(self.read_live(key, self.clock.now_millis()))
    }

    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.enter(BackendOp::ListKeys)?;

        let now = self.clock.now_millis();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        // HashMap order is arbitrary; callers must not rely on it either way
        keys.sort_unstable();
        Ok(keys)
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        self.enter(BackendOp::MultiGet)?;

        let now = self.clock.now_millis();
        Ok(keys.iter().map(|key| self.read_live(key, now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn backend_at(now_ms: i64) -> (Arc<ManualClock>, InMemoryBackend) {
        let clock = Arc::new(ManualClock::new(now_ms));
        let backend = InMemoryBackend::with_clock(clock.clone());
        (clock, backend)
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let (_, backend) = backend_at(0);
        backend.set("a", "1", 60).await.unwrap();
        assert_eq!(backend.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(backend.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (clock, backend) = backend_at(1_000);
        backend.set("a", "1", 10).await.unwrap();
        assert_eq!(backend.ttl_secs("a"), Some(10));

        clock.advance(9_999);
        assert!(backend.get("a").await.unwrap().is_some());

        clock.advance(1);
        assert!(backend.get("a").await.unwrap().is_none());
        assert!(backend.list_keys("*").await.unwrap().is_empty());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_list_keys_pattern() {
        let (_, backend) = backend_at(0);
        backend.set("historical:default:ssr:2024-01-01:1", "x", 60).await.unwrap();
        backend.set("historical:default:ssr:2024-01-02:2", "x", 60).await.unwrap();
        backend.set("historical:default:csr:2024-01-01:3", "x", 60).await.unwrap();

        let keys = backend.list_keys("historical:default:ssr:*").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "historical:default:ssr:2024-01-01:1".to_string(),
                "historical:default:ssr:2024-01-02:2".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_multi_get_preserves_order() {
        let (_, backend) = backend_at(0);
        backend.set("a", "1", 60).await.unwrap();
        backend.set("c", "3", 60).await.unwrap();

        let keys = vec!["c".to_string(), "b".to_string(), "a".to_string()];
        let values = backend.multi_get(&keys).await.unwrap();
        assert_eq!(values, vec![Some("3".to_string()), None, Some("1".to_string())]);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let (_, backend) = backend_at(0);

        backend.fail_next(BackendOp::Set);
        assert!(backend.set("a", "1", 60).await.is_err());
        assert!(backend.set("a", "1", 60).await.is_ok());

        backend.fail_always(BackendOp::ListKeys);
        assert!(backend.list_keys("*").await.is_err());
        assert!(backend.list_keys("*").await.is_err());

        backend.clear_faults();
        assert_eq!(backend.list_keys("*").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_call_counters() {
        let (_, backend) = backend_at(0);
        backend.set("a", "1", 60).await.unwrap();
        backend.get("a").await.unwrap();
        backend.list_keys("*").await.unwrap();
        backend.multi_get(&["a".to_string()]).await.unwrap();
        backend.fail_next(BackendOp::Get);
        let _ = backend.get("a").await;

        assert_eq!(
            backend.calls(),
            BackendCallSnapshot {
                set: 1,
                get: 2,
                list_keys: 1,
                multi_get: 1,
            }
        );
    }

    #[test]
    fn test_insert_raw_has_no_expiry() {
        let (_, backend) = backend_at(0);
        backend.insert_raw("legacy", "{}");
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.ttl_secs("legacy"), None);
    }
}
