//! Blocking resolver: derives the waits-for graph from one pass's lock set.

use std::collections::BTreeSet;

use crate::storage::model::{BlockingEdge, LockRecord};

/// Derives every waits-for edge in the snapshot.
///
/// For each non-granted record, scans the granted records on the same
/// resource and emits an edge per mode conflict. A waiter may have several
/// holders (fan-in) and a holder several waiters (fan-out). A session never
/// blocks itself: the same backend holding other locks is not a true block.
///
/// Pure function of the lock set — same input, same edge set, which keeps
/// re-resolution idempotent.
pub fn resolve_blocking(locks: &[LockRecord]) -> Vec<BlockingEdge> {
    let mut edges: BTreeSet<BlockingEdge> = BTreeSet::new();

    for waiter in locks.iter().filter(|l| !l.granted) {
        for holder in locks.iter().filter(|l| l.granted) {
            if holder.resource_key() != waiter.resource_key() {
                continue;
            }
            if holder.session_id == waiter.session_id {
                continue;
            }
            if waiter.mode.conflicts_with(holder.mode) {
                edges.insert(BlockingEdge {
                    waiter_session_id: waiter.session_id,
                    holder_session_id: holder.session_id,
                    lock_type_hash: waiter.lock_type_hash,
                    target_hash: waiter.target_hash,
                    requested_mode: waiter.mode,
                    held_mode: holder.mode,
                });
            }
        }
    }

    edges.into_iter().collect()
}
