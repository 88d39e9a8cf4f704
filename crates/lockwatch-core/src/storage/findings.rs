//! Append-only findings store.
//!
//! Every persisted finding is wrapped in a generation-stamped, tenant-tagged
//! `Versioned` row. Rows are appended, never mutated in place; history ends
//! by closing (end-dating) a row, so past state is always reconstructable.
//! The only post-creation update the model allows is a deadlock's
//! resolution.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::PassReport;
use crate::storage::model::{
    AnalysisWindow, DeadlockEvent, DeadlockStatus, ImpactSeverity, LockRecord, Resolution,
    ResolutionKind, SessionSummary,
};

/// Close-only lifecycle: setting the end-timestamp is the single permitted
/// state change, and it happens at most once.
pub trait Closeable {
    fn close(&mut self, at: i64) -> bool;
    fn closed_at(&self) -> Option<i64>;
}

/// One persisted row: the finding plus its versioning envelope.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Versioned<T> {
    pub id: u64,
    pub tenant_hash: u64,
    /// Sampling pass that produced the row.
    pub generation: u64,
    pub recorded_at: i64,
    pub closed_at: Option<i64>,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

impl<T> Closeable for Versioned<T> {
    /// Idempotent: closing an already-closed row is a no-op.
    fn close(&mut self, at: i64) -> bool {
        if self.closed_at.is_none() {
            self.closed_at = Some(at);
            true
        } else {
            false
        }
    }

    fn closed_at(&self) -> Option<i64> {
        self.closed_at
    }
}

/// The full persisted history, the unit the segment archive serializes.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct FindingsHistory {
    pub locks: Vec<Versioned<LockRecord>>,
    pub summaries: Vec<Versioned<SessionSummary>>,
    pub deadlocks: Vec<Versioned<DeadlockEvent>>,
    pub windows: Vec<Versioned<AnalysisWindow>>,
}

impl FindingsHistory {
    pub fn total_rows(&self) -> usize {
        self.locks.len() + self.summaries.len() + self.deadlocks.len() + self.windows.len()
    }
}

#[derive(Default)]
pub struct FindingsStore {
    next_id: u64,
    history: FindingsHistory,
}

impl FindingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from an archived history (daemon restart).
    pub fn from_history(history: FindingsHistory) -> Self {
        let max_id = history
            .locks
            .iter()
            .map(|r| r.id)
            .chain(history.summaries.iter().map(|r| r.id))
            .chain(history.deadlocks.iter().map(|r| r.id))
            .chain(history.windows.iter().map(|r| r.id))
            .max()
            .unwrap_or(0);
        Self {
            next_id: max_id,
            history,
        }
    }

    pub fn history(&self) -> &FindingsHistory {
        &self.history
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------

    /// Persists one completed pass.
    ///
    /// Lock records stay open until retention closes them; summaries and
    /// windows are closed historical facts the moment they are written;
    /// deadlock events stay open until resolved.
    pub fn record_pass(&mut self, report: &PassReport) {
        let generation = report.snapshot.generation;
        let at = report.snapshot.timestamp;
        let tenant_hash = report.snapshot.tenant_hash;

        for lock in &report.snapshot.locks {
            let id = self.next_id();
            self.history.locks.push(Versioned {
                id,
                tenant_hash,
                generation,
                recorded_at: at,
                closed_at: None,
                value: lock.clone(),
            });
        }
        for summary in &report.summaries {
            let id = self.next_id();
            self.history.summaries.push(Versioned {
                id,
                tenant_hash,
                generation,
                recorded_at: at,
                closed_at: Some(at),
                value: summary.clone(),
            });
        }
        for event in &report.new_deadlocks {
            let id = self.next_id();
            self.history.deadlocks.push(Versioned {
                id,
                tenant_hash,
                generation,
                recorded_at: at,
                closed_at: None,
                value: event.clone(),
            });
        }
        let id = self.next_id();
        self.history.windows.push(Versioned {
            id,
            tenant_hash,
            generation,
            recorded_at: at,
            closed_at: Some(at),
            value: report.window.clone(),
        });

        debug!(
            generation,
            locks = report.snapshot.locks.len(),
            summaries = report.summaries.len(),
            deadlocks = report.new_deadlocks.len(),
            "pass persisted"
        );
    }

    /// Marks the open deadlocks matching the given cycle keys as resolved.
    /// Returns how many events changed state.
    pub fn resolve_deadlocks(
        &mut self,
        tenant_hash: u64,
        cycle_keys: &[Vec<i32>],
        at: i64,
        kind: ResolutionKind,
    ) -> usize {
        let mut resolved = 0;
        for row in &mut self.history.deadlocks {
            if row.tenant_hash != tenant_hash || !row.value.is_open() {
                continue;
            }
            if cycle_keys.iter().any(|k| k == row.value.cycle_key()) {
                row.value.status = DeadlockStatus::Resolved;
                row.value.resolution = Some(Resolution { at, kind });
                row.close(at);
                resolved += 1;
            }
        }
        resolved
    }

    /// External actors report a resolution for a specific event row.
    pub fn resolve_deadlock_reported(&mut self, id: u64, at: i64) -> bool {
        for row in &mut self.history.deadlocks {
            if row.id == id && row.value.is_open() {
                row.value.status = DeadlockStatus::Resolved;
                row.value.resolution = Some(Resolution {
                    at,
                    kind: ResolutionKind::Reported,
                });
                row.close(at);
                return true;
            }
        }
        false
    }

    // ------------------------------------------------------------
    // Reads (dashboard API)
    // ------------------------------------------------------------

    /// The most recent window for a tenant, if any pass has run.
    pub fn latest_window(&self, tenant_hash: u64) -> Option<&AnalysisWindow> {
        self.history
            .windows
            .iter()
            .filter(|w| w.tenant_hash == tenant_hash)
            .max_by_key(|w| w.generation)
            .map(|w| &w.value)
    }

    /// Cycle keys of every unresolved deadlock for a tenant.
    pub fn open_deadlock_cycles(&self, tenant_hash: u64) -> Vec<Vec<i32>> {
        self.history
            .deadlocks
            .iter()
            .filter(|d| d.tenant_hash == tenant_hash && d.value.is_open())
            .map(|d| d.value.cycle_key().to_vec())
            .collect()
    }

    /// Summaries recorded at or after `since`, at or above `min_severity`.
    pub fn recent_summaries(
        &self,
        tenant_hash: u64,
        since: i64,
        min_severity: ImpactSeverity,
    ) -> Vec<&Versioned<SessionSummary>> {
        self.history
            .summaries
            .iter()
            .filter(|s| {
                s.tenant_hash == tenant_hash
                    && s.recorded_at >= since
                    && s.value.severity >= min_severity
            })
            .collect()
    }

    pub fn recent_windows(&self, tenant_hash: u64, since: i64) -> Vec<&Versioned<AnalysisWindow>> {
        self.history
            .windows
            .iter()
            .filter(|w| w.tenant_hash == tenant_hash && w.recorded_at >= since)
            .collect()
    }

    pub fn recent_deadlocks(
        &self,
        tenant_hash: u64,
        since: i64,
    ) -> Vec<&Versioned<DeadlockEvent>> {
        self.history
            .deadlocks
            .iter()
            .filter(|d| d.tenant_hash == tenant_hash && d.recorded_at >= since)
            .collect()
    }

    // ------------------------------------------------------------
    // Retention hooks
    // ------------------------------------------------------------

    pub(crate) fn history_mut(&mut self) -> &mut FindingsHistory {
        &mut self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyzer;
    use crate::clock::FixedClock;
    use crate::collector::{MockLockSource, Sampler};
    use crate::config::EngineConfig;
    use crate::storage::interner::StringInterner;
    use crate::tenant::TenantScope;

    const NOW: i64 = 1_700_000_000;

    fn report_for(source: &mut MockLockSource) -> PassReport {
        let mut sampler = Sampler::new();
        let mut interner = StringInterner::new();
        let snapshot = sampler
            .collect(
                source,
                &TenantScope::SystemWide,
                &FixedClock(NOW),
                &mut interner,
            )
            .unwrap();
        Analyzer::new(EngineConfig::default()).run(snapshot, None, &[])
    }

    #[test]
    fn record_pass_appends_tenant_tagged_rows() {
        let mut source = MockLockSource::single_block(NOW);
        let report = report_for(&mut source);
        let tenant = report.snapshot.tenant_hash;

        let mut store = FindingsStore::new();
        store.record_pass(&report);

        assert_eq!(store.history().locks.len(), 2);
        assert_eq!(store.history().summaries.len(), 1);
        assert_eq!(store.history().windows.len(), 1);
        assert!(store.history().locks.iter().all(|l| l.tenant_hash == tenant));
        // Summaries and windows are closed facts; locks stay open.
        assert!(store.history().summaries.iter().all(|s| !s.is_open()));
        assert!(store.history().locks.iter().all(|l| l.is_open()));
        assert_eq!(store.latest_window(tenant).map(|w| w.period_end), Some(NOW));
    }

    #[test]
    fn closing_a_row_twice_is_a_no_op() {
        let mut row = Versioned {
            id: 1,
            tenant_hash: 0,
            generation: 1,
            recorded_at: 100,
            closed_at: None,
            value: 42u8,
        };
        assert!(row.close(200));
        assert!(!row.close(300));
        assert_eq!(row.closed_at(), Some(200));
    }

    #[test]
    fn deadlock_resolution_closes_the_event() {
        let mut source = MockLockSource::deadlock_pair(NOW);
        let report = report_for(&mut source);
        let tenant = report.snapshot.tenant_hash;

        let mut store = FindingsStore::new();
        store.record_pass(&report);
        assert_eq!(store.open_deadlock_cycles(tenant), vec![vec![301, 302]]);

        let resolved =
            store.resolve_deadlocks(tenant, &[vec![301, 302]], NOW + 30, ResolutionKind::Inferred);
        assert_eq!(resolved, 1);
        assert!(store.open_deadlock_cycles(tenant).is_empty());

        let event = &store.history().deadlocks[0];
        assert_eq!(event.value.status, DeadlockStatus::Resolved);
        assert_eq!(event.value.duration_secs(), Some(30));
        assert_eq!(event.closed_at(), Some(NOW + 30));

        // Resolving again changes nothing.
        let again =
            store.resolve_deadlocks(tenant, &[vec![301, 302]], NOW + 60, ResolutionKind::Inferred);
        assert_eq!(again, 0);
    }

    #[test]
    fn reported_resolution_targets_one_event() {
        let mut source = MockLockSource::deadlock_pair(NOW);
        let report = report_for(&mut source);
        let mut store = FindingsStore::new();
        store.record_pass(&report);

        let id = store.history().deadlocks[0].id;
        assert!(store.resolve_deadlock_reported(id, NOW + 10));
        assert!(!store.resolve_deadlock_reported(id, NOW + 20));
        assert_eq!(
            store.history().deadlocks[0].value.resolution.map(|r| r.kind),
            Some(ResolutionKind::Reported)
        );
    }

    #[test]
    fn dashboard_reads_filter_by_recency_and_severity() {
        let mut source = MockLockSource::contention_storm(NOW, 2);
        let report = report_for(&mut source);
        let tenant = report.snapshot.tenant_hash;
        let mut store = FindingsStore::new();
        store.record_pass(&report);

        assert_eq!(
            store
                .recent_summaries(tenant, NOW - 60, ImpactSeverity::Low)
                .len(),
            2
        );
        // Storm holders block for 350s: High but not Critical.
        assert_eq!(
            store
                .recent_summaries(tenant, NOW - 60, ImpactSeverity::Critical)
                .len(),
            0
        );
        assert!(store.recent_summaries(tenant, NOW + 1, ImpactSeverity::Low).is_empty());
        assert_eq!(store.recent_windows(tenant, NOW - 60).len(), 1);
        // Cross-tenant reads see nothing.
        assert!(store.recent_windows(tenant ^ 1, NOW - 60).is_empty());
    }

    #[test]
    fn from_history_continues_id_sequence() {
        let mut source = MockLockSource::single_block(NOW);
        let report = report_for(&mut source);
        let mut store = FindingsStore::new();
        store.record_pass(&report);
        let max_id = store.history().windows.last().unwrap().id;

        let mut revived = FindingsStore::from_history(store.history().clone());
        revived.record_pass(&report);
        assert!(revived.history().locks.iter().any(|l| l.id > max_id));
    }
}
