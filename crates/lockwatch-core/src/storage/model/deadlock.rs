//! Deadlock events.

use serde::{Deserialize, Serialize};

use super::BlockingEdge;

/// Lifecycle of a detected deadlock.
///
/// Detected → Resolved when a later pass no longer observes the cycle or an
/// external actor reports the outcome; Expired is the terminal state applied
/// by retention to events that were never resolved.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum DeadlockStatus {
    Detected,
    Resolved,
    Expired,
}

/// How a deadlock left the Detected state.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum ResolutionKind {
    /// The cycle disappeared between passes.
    Inferred,
    /// An external actor reported the resolution.
    Reported,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub at: i64,
    pub kind: ResolutionKind,
}

/// A cycle found in the waits-for graph.
///
/// Immutable after creation except for the resolution. The victim is chosen
/// deterministically (see the detector) and is a recommendation only.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct DeadlockEvent {
    pub tenant_hash: u64,

    /// Sessions in the cycle, sorted ascending for a stable identity.
    pub session_ids: Vec<i32>,

    /// The cycle's edges in traversal order.
    pub edges: Vec<BlockingEdge>,

    pub detected_at: i64,

    /// Session recommended for termination by the victim policy.
    pub victim_session_id: i32,

    pub status: DeadlockStatus,
    pub resolution: Option<Resolution>,
}

impl DeadlockEvent {
    /// Stable identity of the cycle for cross-pass reconciliation: the same
    /// set of sessions deadlocked the same way compares equal between passes.
    pub fn cycle_key(&self) -> &[i32] {
        &self.session_ids
    }

    /// Seconds from detection to resolution; None while still open.
    pub fn duration_secs(&self) -> Option<i64> {
        self.resolution.map(|r| (r.at - self.detected_at).max(0))
    }

    pub fn is_open(&self) -> bool {
        self.status == DeadlockStatus::Detected
    }
}
