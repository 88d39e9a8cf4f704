//! Impact scorer: composite 0-100 severity per lock observation.

use std::collections::HashSet;

use crate::storage::model::{BlockingEdge, LockRecord};

/// Score above which a lock counts as critical-impact for alerting.
pub const CRITICAL_IMPACT: u8 = 75;

/// Computes the impact score for one record.
///
/// Additive weights, clamped to 0-100. Each factor only ever raises the
/// score: waiting beats granted, exclusive-like modes beat shared ones,
/// longer durations beat shorter, and having downstream waiters beats
/// having none.
pub fn impact_score(record: &LockRecord, now: i64, has_waiters: bool) -> u8 {
    let base: u32 = if record.granted { 10 } else { 40 };
    let mode: u32 = if record.mode.is_exclusive_like() { 30 } else { 10 };
    let duration = record.duration_secs(now);
    let age: u32 = if duration > 300 {
        20
    } else if duration > 60 {
        10
    } else {
        0
    };
    let fan_out: u32 = if has_waiters { 20 } else { 0 };

    (base + mode + age + fan_out).min(100) as u8
}

/// Scores every record in place.
///
/// "Has waiters" is true for granted records whose holder appears on the
/// holding side of an edge for the same resource.
pub fn apply_scores(locks: &mut [LockRecord], edges: &[BlockingEdge], now: i64) {
    let holders: HashSet<(i32, u64, u64)> = edges
        .iter()
        .map(|e| (e.holder_session_id, e.lock_type_hash, e.target_hash))
        .collect();

    for record in locks.iter_mut() {
        let has_waiters = record.granted
            && holders.contains(&(
                record.session_id,
                record.lock_type_hash,
                record.target_hash,
            ));
        record.impact_score = impact_score(record, now, has_waiters);
    }
}

/// Locks at or above the critical-impact threshold.
pub fn critical_count(locks: &[LockRecord]) -> usize {
    locks
        .iter()
        .filter(|l| l.impact_score >= CRITICAL_IMPACT)
        .count()
}
