//! Blocking session aggregator: rolls waits-for edges up per holder.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::config::EngineConfig;
use crate::storage::model::{
    BlockingEdge, ImpactSeverity, LockSnapshot, SessionSummary,
};

/// Grades time spent blocking others on the configured ladder.
pub fn grade_severity(config: &EngineConfig, blocking_secs: i64) -> ImpactSeverity {
    if blocking_secs >= config.severity_critical_secs {
        ImpactSeverity::Critical
    } else if blocking_secs >= config.severity_high_secs {
        ImpactSeverity::High
    } else if blocking_secs >= config.severity_medium_secs {
        ImpactSeverity::Medium
    } else {
        ImpactSeverity::Low
    }
}

/// Builds one `SessionSummary` per blocking session.
///
/// Edges referencing a session that vanished between sampling and
/// aggregation are dropped with a warning; a half-missing edge must not
/// fail the pass. The result never drives termination — eligibility is a
/// flag for an external, explicitly authorized actor.
pub fn aggregate(
    snapshot: &LockSnapshot,
    edges: &[BlockingEdge],
    config: &EngineConfig,
) -> Vec<SessionSummary> {
    let now = snapshot.timestamp;

    let mut waiters_by_holder: BTreeMap<i32, BTreeSet<i32>> = BTreeMap::new();
    let mut blocking_secs: BTreeMap<i32, i64> = BTreeMap::new();

    for edge in edges {
        if snapshot.session(edge.holder_session_id).is_none()
            || snapshot.session(edge.waiter_session_id).is_none()
        {
            warn!(
                waiter = edge.waiter_session_id,
                holder = edge.holder_session_id,
                "dropping edge referencing vanished session"
            );
            continue;
        }

        waiters_by_holder
            .entry(edge.holder_session_id)
            .or_default()
            .insert(edge.waiter_session_id);

        // How long this edge has existed: the age of the waiter's pending
        // request on the contested resource.
        let wait_secs = snapshot
            .locks
            .iter()
            .find(|l| {
                !l.granted
                    && l.session_id == edge.waiter_session_id
                    && l.lock_type_hash == edge.lock_type_hash
                    && l.target_hash == edge.target_hash
            })
            .map(|l| l.duration_secs(now))
            .unwrap_or(0);

        let entry = blocking_secs.entry(edge.holder_session_id).or_insert(0);
        *entry = (*entry).max(wait_secs);
    }

    let mut summaries: Vec<SessionSummary> = waiters_by_holder
        .into_iter()
        .map(|(holder, waiters)| {
            let duration = blocking_secs.get(&holder).copied().unwrap_or(0);
            let severity = grade_severity(config, duration);
            let session = snapshot.session(holder);

            SessionSummary {
                tenant_hash: snapshot.tenant_hash,
                session_id: holder,
                locks_held: snapshot
                    .locks
                    .iter()
                    .filter(|l| l.granted && l.session_id == holder)
                    .count(),
                locks_waited: snapshot
                    .locks
                    .iter()
                    .filter(|l| !l.granted && l.session_id == holder)
                    .count(),
                blocked_session_count: waiters.len(),
                severity,
                blocking_duration_secs: duration,
                auto_kill_eligible: duration > config.kill_threshold_secs
                    && severity >= ImpactSeverity::High,
                query_hash: session.map(|s| s.query_hash).unwrap_or(0),
                usename_hash: session.map(|s| s.usename_hash).unwrap_or(0),
                datname_hash: session.map(|s| s.datname_hash).unwrap_or(0),
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.blocked_session_count.cmp(&a.blocked_session_count))
            .then(a.session_id.cmp(&b.session_id))
    });
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::collector::{MockLockSource, Sampler};
    use crate::analysis::resolver::resolve_blocking;
    use crate::storage::interner::StringInterner;
    use crate::storage::model::LockMode;
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
    fn single_block_yields_one_summary_with_one_waiter() {
        let mut source = MockLockSource::single_block(NOW);
        let snapshot = snapshot_of(&mut source);
        let edges = resolve_blocking(&snapshot.locks);
        assert_eq!(edges.len(), 1);

        let summaries = aggregate(&snapshot, &edges, &EngineConfig::default());
        assert_eq!(summaries.len(), 1);
        let holder = &summaries[0];
        assert_eq!(holder.session_id, 201);
        assert_eq!(holder.blocked_session_count, 1);
        assert_eq!(holder.locks_held, 1);
        assert_eq!(holder.locks_waited, 0);
        // Waiter has been waiting 90s: Medium on the default ladder.
        assert_eq!(holder.severity, ImpactSeverity::Medium);
        assert!(!holder.auto_kill_eligible);
    }

    #[test]
    fn distinct_waiters_are_counted_once() {
        use crate::collector::mock::{MockLock, MockSession};

        let mut source = MockLockSource::new();
        source.push_session(MockSession::client(1, "app").xact_start(NOW - 700));
        source.push_session(MockSession::client(2, "app"));
        source.push_lock(MockLock::granted(1, "public.a", LockMode::AccessExclusive, NOW - 700));
        source.push_lock(MockLock::granted(1, "public.b", LockMode::AccessExclusive, NOW - 700));
        // Session 2 waits on both resources held by 1.
        source.push_lock(MockLock::waiting(2, "public.a", LockMode::AccessShare, NOW - 650));
        source.push_lock(MockLock::waiting(2, "public.b", LockMode::AccessShare, NOW - 650));

        let snapshot = snapshot_of(&mut source);
        let edges = resolve_blocking(&snapshot.locks);
        assert_eq!(edges.len(), 2);

        let summaries = aggregate(&snapshot, &edges, &EngineConfig::default());
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].blocked_session_count, 1);
        assert_eq!(summaries[0].severity, ImpactSeverity::Critical);
        assert!(summaries[0].auto_kill_eligible);
    }

    #[test]
    fn edges_to_vanished_sessions_are_dropped() {
        let mut source = MockLockSource::single_block(NOW);
        let mut snapshot = snapshot_of(&mut source);
        let edges = resolve_blocking(&snapshot.locks);

        // Simulate the waiter disappearing between sub-steps.
        snapshot.sessions.retain(|s| s.session_id != 202);
        let summaries = aggregate(&snapshot, &edges, &EngineConfig::default());
        assert!(summaries.is_empty());
    }

    #[test]
    fn severity_ladder_matches_config() {
        let config = EngineConfig::default();
        assert_eq!(grade_severity(&config, 0), ImpactSeverity::Low);
        assert_eq!(grade_severity(&config, 59), ImpactSeverity::Low);
        assert_eq!(grade_severity(&config, 60), ImpactSeverity::Medium);
        assert_eq!(grade_severity(&config, 299), ImpactSeverity::Medium);
        assert_eq!(grade_severity(&config, 300), ImpactSeverity::High);
        assert_eq!(grade_severity(&config, 600), ImpactSeverity::Critical);
    }
}
