//! Windowed contention analytics.

use serde::{Deserialize, Serialize};

/// Efficiency movement relative to the prior window.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

/// A contended resource and how many distinct sessions waited on it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Hotspot {
    pub lock_type_hash: u64,
    pub target_hash: u64,
    pub distinct_waiters: usize,
}

/// Aggregated contention picture for one period [period_start, period_end).
///
/// One window is produced per sampling pass; the trend compares this
/// window's efficiency against the prior one and tolerates the prior window
/// being absent on the first run.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct AnalysisWindow {
    pub tenant_hash: u64,

    pub period_start: i64,
    pub period_end: i64,

    pub total_locks: usize,
    pub granted_locks: usize,
    pub waiting_locks: usize,

    /// Waits-for edges observed in the period.
    pub blocking_events: usize,
    pub deadlocks: usize,

    /// Wait-duration statistics over waiting records, seconds.
    pub avg_wait_secs: f64,
    pub max_wait_secs: i64,

    /// Most-contended resources, by distinct waiter count descending.
    pub hotspots: Vec<Hotspot>,

    /// Session blocking the most distinct waiters, if any blocking occurred.
    pub most_blocking_session: Option<i32>,
    /// Session waiting on the most distinct holders.
    pub most_blocked_session: Option<i32>,

    pub peak_concurrent_locks: usize,

    /// 100 minus a bounded penalty per blocking event.
    pub efficiency_score: u8,
    pub trend: TrendDirection,
}
