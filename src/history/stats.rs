//! Operation counters for the history service

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters bumped by every public history operation
///
/// Failures are counted when an error is converted into a sentinel.
#[derive(Debug, Default)]
pub struct HistoryStats {
    pub(crate) saves: AtomicU64,
    pub(crate) save_failures: AtomicU64,
    pub(crate) reads: AtomicU64,
    pub(crate) read_failures: AtomicU64,
    pub(crate) queries: AtomicU64,
    pub(crate) query_failures: AtomicU64,
    pub(crate) points_returned: AtomicU64,
    pub(crate) aggregations: AtomicU64,
    pub(crate) aggregation_failures: AtomicU64,
    pub(crate) regression_checks: AtomicU64,
    pub(crate) regression_failures: AtomicU64,
}

impl HistoryStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> HistoryStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        HistoryStatsSnapshot {
            saves: load(&self.saves),
            save_failures: load(&self.save_failures),
            reads: load(&self.reads),
            read_failures: load(&self.read_failures),
            queries: load(&self.queries),
            query_failures: load(&self.query_failures),
            points_returned: load(&self.points_returned),
            aggregations: load(&self.aggregations),
            aggregation_failures: load(&self.aggregation_failures),
            regression_checks: load(&self.regression_checks),
            regression_failures: load(&self.regression_failures),
        }
    }
}

/// Snapshot of [`HistoryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStatsSnapshot {
    /// `save` calls
    pub saves: u64,
    /// `save` calls that returned `false`
    pub save_failures: u64,
    /// `get` calls
    pub reads: u64,
    /// `get` calls that hit an error
    pub read_failures: u64,
    /// `query` calls
    pub queries: u64,
    /// `query` calls that hit an error
    pub query_failures: u64,
    /// Points returned by successful `query` calls
    pub points_returned: u64,
    /// `aggregate` calls
    pub aggregations: u64,
    /// `aggregate` calls that hit an error
    pub aggregation_failures: u64,
    /// `detect_regressions` calls
    pub regression_checks: u64,
    /// `detect_regressions` calls that hit an error
    pub regression_failures: u64,
}

impl HistoryStatsSnapshot {
    /// Failures across all operations
    pub fn total_failures(&self) -> u64 {
        self.save_failures
            + self.read_failures
            + self.query_failures
            + self.aggregation_failures
            + self.regression_failures
    }
}
