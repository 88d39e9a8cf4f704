//! Point-in-time capture of the resource manager's lock state.

use serde::{Deserialize, Serialize};

use super::{LockRecord, SessionInfo};

/// One pass's immutable observation of locks and client sessions.
///
/// Snapshots carry a monotonically increasing generation so derived
/// findings can always be traced back to the pass that produced them; no
/// later pass mutates an earlier generation's records.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LockSnapshot {
    /// Pass counter, unique per engine instance.
    pub generation: u64,

    /// Seconds since epoch when the sample was taken.
    pub timestamp: i64,

    /// Scope tag shared by every record in this snapshot.
    pub tenant_hash: u64,

    pub locks: Vec<LockRecord>,
    pub sessions: Vec<SessionInfo>,
}

impl LockSnapshot {
    pub fn session(&self, session_id: i32) -> Option<&SessionInfo> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }

    /// Granted-lock count; the peak-concurrency input for window analytics.
    pub fn granted_count(&self) -> usize {
        self.locks.iter().filter(|l| l.granted).count()
    }

    pub fn waiting_count(&self) -> usize {
        self.locks.iter().filter(|l| !l.granted).count()
    }
}
