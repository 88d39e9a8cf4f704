//! Session observations and per-session blocking rollups.

use serde::{Deserialize, Serialize};

/// One client backend observed in a sampling pass.
///
/// Background workers (autovacuum, walwriter, ...) are filtered out by the
/// sampler and never reach the analysis layer.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct SessionInfo {
    /// Backend process id.
    pub session_id: i32,

    /// Backend start time, seconds since epoch.
    pub backend_start: i64,

    /// Current transaction start (0 when no transaction is open).
    pub xact_start: i64,

    /// Current query start.
    pub query_start: i64,

    /// Interned session metadata.
    pub state_hash: u64,
    pub datname_hash: u64,
    pub usename_hash: u64,
    pub application_name_hash: u64,
    pub backend_type_hash: u64,
    pub query_hash: u64,

    /// Client address as reported; addresses vary in length so the text is
    /// kept inline rather than interned.
    pub client_addr: String,
}

/// Blocking severity ladder, graded from time spent blocking others.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImpactSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            ImpactSeverity::Low => "LOW",
            ImpactSeverity::Medium => "MEDIUM",
            ImpactSeverity::High => "HIGH",
            ImpactSeverity::Critical => "CRITICAL",
        }
    }
}

/// Per-session rollup of one pass's blocking state.
///
/// Derived from the pass's edges and lock records; feeds dashboards and
/// recommendations. `auto_kill_eligible` is advisory — this engine never
/// terminates sessions.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SessionSummary {
    pub tenant_hash: u64,
    pub session_id: i32,

    pub locks_held: usize,
    pub locks_waited: usize,

    /// Distinct sessions waiting on this one.
    pub blocked_session_count: usize,

    pub severity: ImpactSeverity,

    /// Longest time (seconds) this session has kept a waiter blocked.
    pub blocking_duration_secs: i64,

    pub auto_kill_eligible: bool,

    /// Interned metadata of the blocking session, for display.
    pub query_hash: u64,
    pub usename_hash: u64,
    pub datname_hash: u64,
}
