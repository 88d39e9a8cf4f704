//! Window analyzer: per-interval contention aggregates and trend.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::EngineConfig;
use crate::storage::model::{
    AnalysisWindow, BlockingEdge, Hotspot, LockSnapshot, TrendDirection,
};

/// Number of hotspots retained per window.
const MAX_HOTSPOTS: usize = 5;

/// Builds the analysis window for one pass.
///
/// The window covers [prior window end, this pass's timestamp); on the
/// first run the period collapses to the pass instant and the trend is
/// Stable — a missing prior window is expected, not an error.
pub fn build_window(
    snapshot: &LockSnapshot,
    edges: &[BlockingEdge],
    deadlocks: usize,
    prior: Option<&AnalysisWindow>,
    config: &EngineConfig,
) -> AnalysisWindow {
    let now = snapshot.timestamp;
    let period_start = prior.map_or(now, |p| p.period_end);

    let granted = snapshot.granted_count();
    let waiting = snapshot.waiting_count();

    let wait_durations: Vec<i64> = snapshot
        .locks
        .iter()
        .filter(|l| !l.granted)
        .map(|l| l.duration_secs(now))
        .collect();
    let max_wait_secs = wait_durations.iter().copied().max().unwrap_or(0);
    let avg_wait_secs = if wait_durations.is_empty() {
        0.0
    } else {
        wait_durations.iter().sum::<i64>() as f64 / wait_durations.len() as f64
    };

    // Hotspots: distinct waiters per contested resource.
    let mut waiters_by_resource: BTreeMap<(u64, u64), BTreeSet<i32>> = BTreeMap::new();
    for edge in edges {
        waiters_by_resource
            .entry((edge.lock_type_hash, edge.target_hash))
            .or_default()
            .insert(edge.waiter_session_id);
    }
    let mut hotspots: Vec<Hotspot> = waiters_by_resource
        .into_iter()
        .map(|((lock_type_hash, target_hash), waiters)| Hotspot {
            lock_type_hash,
            target_hash,
            distinct_waiters: waiters.len(),
        })
        .collect();
    hotspots.sort_by(|a, b| {
        b.distinct_waiters
            .cmp(&a.distinct_waiters)
            .then(a.target_hash.cmp(&b.target_hash))
    });
    hotspots.truncate(MAX_HOTSPOTS);

    let most_blocking_session = extreme_session(edges, |e| (e.holder_session_id, e.waiter_session_id));
    let most_blocked_session = extreme_session(edges, |e| (e.waiter_session_id, e.holder_session_id));

    let penalty = (edges.len() as f64 * config.efficiency_penalty_per_event).min(100.0);
    let efficiency_score = (100.0 - penalty).round().clamp(0.0, 100.0) as u8;

    let trend = match prior {
        None => TrendDirection::Stable,
        Some(p) => {
            let delta = efficiency_score as i32 - p.efficiency_score as i32;
            if delta > config.trend_noise_band as i32 {
                TrendDirection::Improving
            } else if delta < -(config.trend_noise_band as i32) {
                TrendDirection::Degrading
            } else {
                TrendDirection::Stable
            }
        }
    };

    AnalysisWindow {
        tenant_hash: snapshot.tenant_hash,
        period_start,
        period_end: now,
        total_locks: snapshot.locks.len(),
        granted_locks: granted,
        waiting_locks: waiting,
        blocking_events: edges.len(),
        deadlocks,
        avg_wait_secs,
        max_wait_secs,
        hotspots,
        most_blocking_session,
        most_blocked_session,
        peak_concurrent_locks: granted,
        efficiency_score,
        trend,
    }
}

/// Session with the most distinct counterparties on the chosen side of the
/// edge; ties break toward the lowest session id.
fn extreme_session(
    edges: &[BlockingEdge],
    sides: impl Fn(&BlockingEdge) -> (i32, i32),
) -> Option<i32> {
    let mut counterparties: BTreeMap<i32, BTreeSet<i32>> = BTreeMap::new();
    for edge in edges {
        let (subject, other) = sides(edge);
        counterparties.entry(subject).or_default().insert(other);
    }
    counterparties
        .into_iter()
        .max_by(|(a_id, a), (b_id, b)| a.len().cmp(&b.len()).then(b_id.cmp(a_id)))
        .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::resolver::resolve_blocking;
    use crate::clock::FixedClock;
    use crate::collector::{MockLockSource, Sampler};
    use crate::storage::interner::StringInterner;
    use crate::tenant::TenantScope;

    const NOW: i64 = 1_700_000_000;

    fn snapshot_of(source: &mut MockLockSource) -> LockSnapshot {
        let mut sampler = Sampler::new();
        let mut interner = StringInterner::new();
        sampler
            .collect(
                source,
                &TenantScope::SystemWide,
                &FixedClock(NOW),
                &mut interner,
            )
            .unwrap()
    }

    #[test]
    fn quiet_pass_scores_full_efficiency() {
        let mut source = MockLockSource::idle_system(NOW);
        let snapshot = snapshot_of(&mut source);
        let window = build_window(&snapshot, &[], 0, None, &EngineConfig::default());

        assert_eq!(window.efficiency_score, 100);
        assert_eq!(window.blocking_events, 0);
        assert_eq!(window.trend, TrendDirection::Stable);
        assert!(window.hotspots.is_empty());
        assert_eq!(window.most_blocking_session, None);
        assert_eq!(window.peak_concurrent_locks, 1);
        assert_eq!(window.period_start, window.period_end);
    }

    #[test]
    fn blocking_events_reduce_efficiency() {
        let mut source = MockLockSource::contention_storm(NOW, 4);
        let snapshot = snapshot_of(&mut source);
        let edges = resolve_blocking(&snapshot.locks);
        assert_eq!(edges.len(), 4);

        let window = build_window(&snapshot, &edges, 0, None, &EngineConfig::default());
        assert_eq!(window.efficiency_score, 80);
        assert_eq!(window.waiting_locks, 4);
        assert_eq!(window.max_wait_secs, 350);
        assert_eq!(window.hotspots.len(), 4);
        assert_eq!(window.hotspots[0].distinct_waiters, 1);
    }

    #[test]
    fn trend_compares_against_prior_window() {
        let mut source = MockLockSource::idle_system(NOW);
        let snapshot = snapshot_of(&mut source);
        let config = EngineConfig::default();

        let mut prior = build_window(&snapshot, &[], 0, None, &config);
        prior.period_end = NOW - 30;

        // Same efficiency: stable.
        let same = build_window(&snapshot, &[], 0, Some(&prior), &config);
        assert_eq!(same.trend, TrendDirection::Stable);
        assert_eq!(same.period_start, NOW - 30);

        // Prior much worse: improving beyond the noise band.
        prior.efficiency_score = 80;
        let better = build_window(&snapshot, &[], 0, Some(&prior), &config);
        assert_eq!(better.trend, TrendDirection::Improving);

        // Prior slightly better than current: inside the ±3 band.
        prior.efficiency_score = 100;
        let mut storm = MockLockSource::single_block(NOW);
        let snapshot2 = snapshot_of(&mut storm);
        let edges = resolve_blocking(&snapshot2.locks);
        let noisy = build_window(&snapshot2, &edges[..0], 0, Some(&prior), &config);
        assert_eq!(noisy.trend, TrendDirection::Stable);
    }

    #[test]
    fn degrading_trend_beyond_noise_band() {
        let mut source = MockLockSource::contention_storm(NOW, 2);
        let snapshot = snapshot_of(&mut source);
        let edges = resolve_blocking(&snapshot.locks);
        let config = EngineConfig::default();

        let mut quiet_source = MockLockSource::idle_system(NOW - 30);
        let mut sampler = Sampler::new();
        let mut interner = StringInterner::new();
        let quiet = sampler
            .collect(
                &mut quiet_source,
                &TenantScope::SystemWide,
                &FixedClock(NOW - 30),
                &mut interner,
            )
            .unwrap();
        let prior = build_window(&quiet, &[], 0, None, &config);

        let window = build_window(&snapshot, &edges, 0, Some(&prior), &config);
        assert_eq!(window.efficiency_score, 90);
        assert_eq!(window.trend, TrendDirection::Degrading);
    }

    #[test]
    fn most_blocking_and_most_blocked_sessions() {
        let mut source = MockLockSource::contention_storm(NOW, 3);
        let snapshot = snapshot_of(&mut source);
        let edges = resolve_blocking(&snapshot.locks);

        let window = build_window(&snapshot, &edges, 0, None, &EngineConfig::default());
        // All holders block exactly one waiter; lowest id wins the tie.
        assert_eq!(window.most_blocking_session, Some(400));
        assert_eq!(window.most_blocked_session, Some(401));
    }
}
