//! Lock observations and the waits-for edge they derive into.

use serde::{Deserialize, Serialize};

/// PostgreSQL table-level lock modes, weakest to strongest.
///
/// The ordinal order matters: it indexes the conflict matrix and provides
/// the stable sort key used wherever determinism is required.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    AccessExclusive,
}

/// Conflict matrix indexed by mode ordinal; bit N set means "conflicts with
/// the mode whose ordinal is N". Mirrors the pg_locks documentation table.
const CONFLICTS: [u8; 8] = [
    0b1000_0000, // AccessShare: AccessExclusive
    0b1100_0000, // RowShare: Exclusive, AccessExclusive
    0b1111_0000, // RowExclusive: Share and stronger
    0b1111_1000, // ShareUpdateExclusive: self and stronger
    0b1110_1100, // Share: RowExclusive, ShareUpdateExclusive, ShareRowExclusive..
    0b1111_1100, // ShareRowExclusive: RowExclusive and stronger
    0b1111_1110, // Exclusive: everything but AccessShare
    0b1111_1111, // AccessExclusive: everything
];

impl LockMode {
    /// Parses the mode label reported by the resource manager
    /// (e.g. "AccessShareLock", "RowExclusiveLock").
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.strip_suffix("Lock").unwrap_or(label);
        match label {
            "AccessShare" => Some(LockMode::AccessShare),
            "RowShare" => Some(LockMode::RowShare),
            "RowExclusive" => Some(LockMode::RowExclusive),
            "ShareUpdateExclusive" => Some(LockMode::ShareUpdateExclusive),
            "Share" => Some(LockMode::Share),
            "ShareRowExclusive" => Some(LockMode::ShareRowExclusive),
            "Exclusive" => Some(LockMode::Exclusive),
            "AccessExclusive" => Some(LockMode::AccessExclusive),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LockMode::AccessShare => "AccessShareLock",
            LockMode::RowShare => "RowShareLock",
            LockMode::RowExclusive => "RowExclusiveLock",
            LockMode::ShareUpdateExclusive => "ShareUpdateExclusiveLock",
            LockMode::Share => "ShareLock",
            LockMode::ShareRowExclusive => "ShareRowExclusiveLock",
            LockMode::Exclusive => "ExclusiveLock",
            LockMode::AccessExclusive => "AccessExclusiveLock",
        }
    }

    /// True when the two modes are mutually exclusive on the same resource.
    pub fn conflicts_with(&self, other: LockMode) -> bool {
        CONFLICTS[*self as usize] & (1 << other as usize) != 0
    }

    /// Modes that exclude concurrent writers and readers alike; these carry
    /// the higher mode-severity weight in impact scoring.
    pub fn is_exclusive_like(&self) -> bool {
        matches!(
            self,
            LockMode::ShareRowExclusive | LockMode::Exclusive | LockMode::AccessExclusive
        )
    }
}

/// One lock request observed in a sampling pass.
///
/// Immutable once captured. For a granted entry `session_id` is the holder;
/// for a waiting entry it is the requester.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LockRecord {
    /// Owning tenant tag (or the system-wide sentinel).
    pub tenant_hash: u64,

    /// Hash of the lock type reported by the resource manager
    /// (relation, tuple, transactionid, advisory, ...).
    pub lock_type_hash: u64,

    /// Hash of the locked object's name (schema-qualified relation where
    /// known, "unknown" when the object vanished mid-pass).
    pub target_hash: u64,

    /// Requested (waiting) or held (granted) mode.
    pub mode: LockMode,

    pub granted: bool,

    /// Backend process id: holder when granted, requester when waiting.
    pub session_id: i32,

    /// When the lock was acquired (granted) or the wait began (waiting),
    /// seconds since epoch. 0 when the resource manager did not report it.
    pub acquired_at: i64,

    /// Hash of the session's current query text.
    pub query_hash: u64,

    /// Client metadata, interned.
    pub datname_hash: u64,
    pub usename_hash: u64,
    pub application_name_hash: u64,

    /// Impact score (0-100), filled by the scorer after edge resolution.
    pub impact_score: u8,
}

impl LockRecord {
    /// Identity of the locked object: records on the same (type, target)
    /// compete with each other.
    pub fn resource_key(&self) -> (u64, u64) {
        (self.lock_type_hash, self.target_hash)
    }

    /// Age of the grant or wait at `now`; 0 when untimestamped.
    pub fn duration_secs(&self, now: i64) -> i64 {
        if self.acquired_at <= 0 {
            0
        } else {
            (now - self.acquired_at).max(0)
        }
    }
}

/// A waits-for relationship derived for one pass: `waiter_session_id` is
/// blocked on a resource held by `holder_session_id`. Recomputed every pass,
/// never persisted on its own.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockingEdge {
    pub waiter_session_id: i32,
    pub holder_session_id: i32,
    pub lock_type_hash: u64,
    pub target_hash: u64,
    /// Mode the waiter asked for.
    pub requested_mode: LockMode,
    /// Mode the holder has granted.
    pub held_mode: LockMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_matrix_is_symmetric() {
        const ALL: [LockMode; 8] = [
            LockMode::AccessShare,
            LockMode::RowShare,
            LockMode::RowExclusive,
            LockMode::ShareUpdateExclusive,
            LockMode::Share,
            LockMode::ShareRowExclusive,
            LockMode::Exclusive,
            LockMode::AccessExclusive,
        ];
        for a in ALL {
            for b in ALL {
                assert_eq!(
                    a.conflicts_with(b),
                    b.conflicts_with(a),
                    "{:?} vs {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn shared_readers_do_not_conflict() {
        assert!(!LockMode::AccessShare.conflicts_with(LockMode::AccessShare));
        assert!(!LockMode::Share.conflicts_with(LockMode::Share));
        assert!(!LockMode::AccessShare.conflicts_with(LockMode::RowExclusive));
    }

    #[test]
    fn access_exclusive_conflicts_with_everything() {
        assert!(LockMode::AccessExclusive.conflicts_with(LockMode::AccessShare));
        assert!(LockMode::AccessExclusive.conflicts_with(LockMode::AccessExclusive));
        assert!(LockMode::Exclusive.conflicts_with(LockMode::Exclusive));
        assert!(!LockMode::Exclusive.conflicts_with(LockMode::AccessShare));
    }

    #[test]
    fn from_label_round_trips() {
        for label in [
            "AccessShareLock",
            "RowShareLock",
            "RowExclusiveLock",
            "ShareUpdateExclusiveLock",
            "ShareLock",
            "ShareRowExclusiveLock",
            "ExclusiveLock",
            "AccessExclusiveLock",
        ] {
            let mode = LockMode::from_label(label).unwrap();
            assert_eq!(mode.label(), label);
        }
        assert_eq!(LockMode::from_label("SpinLock"), None);
    }

    #[test]
    fn duration_ignores_missing_timestamps() {
        let record = LockRecord {
            tenant_hash: 0,
            lock_type_hash: 1,
            target_hash: 2,
            mode: LockMode::AccessShare,
            granted: true,
            session_id: 10,
            acquired_at: 0,
            query_hash: 0,
            datname_hash: 0,
            usename_hash: 0,
            application_name_hash: 0,
            impact_score: 0,
        };
        assert_eq!(record.duration_secs(1_700_000_000), 0);
    }
}
