//! Wall-clock sources
//!
//! Operations that depend on "now" (default save timestamp, default lookup
//! day, the regression window, in-memory TTL expiry) read it through the
//! [`Clock`] trait so tests can pin time with [`ManualClock`].

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync + 'static {
    /// Current time in epoch milliseconds
    fn now_millis(&self) -> i64;

    /// Current time as a UTC datetime
    fn now(&self) -> DateTime<Utc> {
        utc_from_millis(self.now_millis())
    }
}

/// Reads the system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Create a clock pinned at `now_ms`
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Pin the clock at `now_ms`
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Move the clock forward by `delta_ms`
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Convert epoch milliseconds to a UTC datetime
///
/// Values outside chrono's representable range clamp to the nearest
/// representable instant, so open-ended bounds such as `i64::MAX` stay
/// ordered after every real timestamp.
pub fn utc_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(if ms < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}
