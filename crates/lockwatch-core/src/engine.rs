//! Pass orchestration.
//!
//! One `Engine` owns a lock source, the analyzer, and the findings store
//! for a set of tenants it is scheduled against. `run_once` executes a full
//! pass: sample → analyze → persist → alert. A cancelled pass persists
//! nothing; a failed sample is reported and the next scheduled pass retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info};

use crate::alert::{AlertEvent, AlertLevel, AlertSink, LogAlertSink};
use crate::analysis::Analyzer;
use crate::clock::Clock;
use crate::collector::{LockSource, SampleError, Sampler};
use crate::config::EngineConfig;
use crate::storage::findings::FindingsStore;
use crate::storage::interner::StringInterner;
use crate::storage::model::{ImpactSeverity, ResolutionKind};
use crate::storage::retention::{RetentionManager, RetentionResult};
use crate::tenant::TenantScope;

/// Error type for one pass.
#[derive(Debug)]
pub enum PassError {
    /// Sampling failed; nothing was derived or persisted.
    Sample(SampleError),
    /// Shutdown requested mid-pass; partial results were discarded.
    Cancelled,
}

impl std::fmt::Display for PassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassError::Sample(e) => write!(f, "pass failed: {}", e),
            PassError::Cancelled => write!(f, "pass cancelled"),
        }
    }
}

impl std::error::Error for PassError {}

/// Summary returned to the scheduler after each pass.
#[derive(Clone, Serialize, Debug)]
pub struct PassOutcome {
    pub generation: u64,
    pub tenant: String,
    pub timestamp: i64,
    pub locks_captured: usize,
    pub blocking_count: usize,
    pub critical_count: usize,
    pub deadlocks_count: usize,
    pub alert_level: AlertLevel,
    /// Recommendation actions, worst severity first.
    pub recommendations: Vec<String>,
}

pub struct Engine<S: LockSource> {
    source: S,
    sampler: Sampler,
    analyzer: Analyzer,
    store: FindingsStore,
    interner: StringInterner,
    clock: Box<dyn Clock>,
    cancel: Arc<AtomicBool>,
    sink: Box<dyn AlertSink>,
}

impl<S: LockSource> Engine<S> {
    pub fn new(source: S, config: EngineConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            source,
            sampler: Sampler::new(),
            analyzer: Analyzer::new(config),
            store: FindingsStore::new(),
            interner: StringInterner::new(),
            clock,
            cancel: Arc::new(AtomicBool::new(false)),
            sink: Box::new(LogAlertSink),
        }
    }

    pub fn with_alert_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Resumes from an archived findings history.
    pub fn with_store(mut self, store: FindingsStore, interner: StringInterner) -> Self {
        self.store = store;
        self.interner = interner;
        self
    }

    /// Shared flag that aborts an in-flight pass when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn store(&self) -> &FindingsStore {
        &self.store
    }

    pub fn interner(&self) -> &StringInterner {
        &self.interner
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn config(&self) -> &EngineConfig {
        self.analyzer.config()
    }

    /// External actors report a deadlock resolution (e.g. after a manual
    /// termination); forwards to the store.
    pub fn report_deadlock_resolved(&mut self, event_id: u64) -> bool {
        let now = self.clock.now();
        self.store.resolve_deadlock_reported(event_id, now)
    }

    /// Runs the retention manager against this engine's findings.
    pub fn run_retention(&mut self) -> RetentionResult {
        let manager = RetentionManager::new(self.analyzer.config().retention);
        let now = self.clock.now();
        manager.run(&mut self.store, now)
    }

    /// Executes one full pass for the given scope.
    pub fn run_once(&mut self, scope: &TenantScope) -> Result<PassOutcome, PassError> {
        self.check_cancelled()?;

        let snapshot = self
            .sampler
            .collect(
                &mut self.source,
                scope,
                self.clock.as_ref(),
                &mut self.interner,
            )
            .map_err(PassError::Sample)?;
        let tenant_hash = snapshot.tenant_hash;
        let at = snapshot.timestamp;

        self.check_cancelled()?;

        let prior_window = self.store.latest_window(tenant_hash).cloned();
        let open_cycles = self.store.open_deadlock_cycles(tenant_hash);
        let report = self
            .analyzer
            .run(snapshot, prior_window.as_ref(), &open_cycles);

        // Nothing from a cancelled pass may reach the store.
        self.check_cancelled()?;

        let resolved = self.store.resolve_deadlocks(
            tenant_hash,
            &report.resolved_cycles,
            at,
            ResolutionKind::Inferred,
        );
        if resolved > 0 {
            info!(tenant = %scope.label(), resolved, "deadlock cycles no longer observed");
        }
        self.store.record_pass(&report);

        let outcome = PassOutcome {
            generation: report.snapshot.generation,
            tenant: scope.label().to_string(),
            timestamp: at,
            locks_captured: report.snapshot.locks.len(),
            blocking_count: report.summaries.len(),
            critical_count: crate::analysis::scorer::critical_count(&report.snapshot.locks),
            deadlocks_count: report.deadlocks_observed,
            alert_level: report.alert_level,
            recommendations: report
                .recommendations
                .iter()
                .map(|r| r.action.clone())
                .collect(),
        };

        if report.alert_level >= AlertLevel::Warning {
            let event = AlertEvent {
                tenant: scope.label().to_string(),
                level: report.alert_level,
                at,
                triggering_summaries: report
                    .summaries
                    .iter()
                    .filter(|s| s.severity >= ImpactSeverity::High)
                    .cloned()
                    .collect(),
                triggering_deadlocks: report.new_deadlocks.clone(),
                recommendations: report.recommendations.clone(),
            };
            self.sink.emit(&event);
        } else {
            debug!(tenant = %scope.label(), "pass completed without alert");
        }

        Ok(outcome)
    }

    fn check_cancelled(&self) -> Result<(), PassError> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(PassError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::VecAlertSink;
    use crate::clock::FixedClock;
    use crate::collector::MockLockSource;
    use crate::storage::model::DeadlockStatus;

    const NOW: i64 = 1_700_000_000;

    fn engine_with(source: MockLockSource) -> Engine<MockLockSource> {
        Engine::new(source, EngineConfig::default(), Box::new(FixedClock(NOW)))
    }

    #[test]
    fn run_once_reports_the_contract_summary() {
        let mut engine = engine_with(MockLockSource::single_block(NOW));
        let outcome = engine.run_once(&TenantScope::SystemWide).unwrap();

        assert_eq!(outcome.generation, 1);
        assert_eq!(outcome.locks_captured, 2);
        assert_eq!(outcome.blocking_count, 1);
        assert_eq!(outcome.deadlocks_count, 0);
        assert_eq!(outcome.tenant, "system");
        assert!(!outcome.recommendations.is_empty());
        assert_eq!(engine.store().history().windows.len(), 1);
    }

    #[test]
    fn quiet_pass_recommends_exactly_normal_activity() {
        let mut engine = engine_with(MockLockSource::idle_system(NOW));
        let outcome = engine.run_once(&TenantScope::SystemWide).unwrap();

        assert_eq!(outcome.recommendations, vec!["normal activity"]);
        assert_eq!(outcome.alert_level, AlertLevel::None);
    }

    #[test]
    fn deadlock_pass_emits_a_critical_alert() {
        let sink = VecAlertSink::default();
        let mut engine = engine_with(MockLockSource::deadlock_pair(NOW))
            .with_alert_sink(Box::new(sink.clone()));
        let outcome = engine.run_once(&TenantScope::SystemWide).unwrap();

        assert_eq!(outcome.deadlocks_count, 1);
        assert_eq!(outcome.alert_level, AlertLevel::Critical);
        assert!(outcome.recommendations.contains(&"implement retry logic".to_string()));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, AlertLevel::Critical);
        assert_eq!(events[0].triggering_deadlocks.len(), 1);
        assert!(
            events[0]
                .recommendations
                .iter()
                .any(|r| r.action == "implement retry logic")
        );
    }

    #[test]
    fn quiet_pass_emits_no_alert() {
        let sink = VecAlertSink::default();
        let mut engine = engine_with(MockLockSource::idle_system(NOW))
            .with_alert_sink(Box::new(sink.clone()));
        engine.run_once(&TenantScope::SystemWide).unwrap();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn vanished_cycle_resolves_on_the_next_pass() {
        let mut engine = engine_with(MockLockSource::deadlock_pair(NOW));
        let scope = TenantScope::SystemWide;
        engine.run_once(&scope).unwrap();

        // The contention clears before the second pass.
        let quiet = MockLockSource::idle_system(NOW);
        *engine.source_mut() = quiet;
        let outcome = engine.run_once(&scope).unwrap();

        assert_eq!(outcome.deadlocks_count, 0);
        let event = &engine.store().history().deadlocks[0];
        assert_eq!(event.value.status, DeadlockStatus::Resolved);
        assert_eq!(
            event.value.resolution.map(|r| r.kind),
            Some(ResolutionKind::Inferred)
        );
    }

    #[test]
    fn persistent_cycle_is_recorded_once() {
        let mut engine = engine_with(MockLockSource::deadlock_pair(NOW));
        let scope = TenantScope::SystemWide;
        engine.run_once(&scope).unwrap();
        *engine.source_mut() = MockLockSource::deadlock_pair(NOW + 30);
        engine.run_once(&scope).unwrap();

        assert_eq!(engine.store().history().deadlocks.len(), 1);
        assert!(engine.store().history().deadlocks[0].value.is_open());
    }

    #[test]
    fn cancelled_pass_persists_nothing() {
        let mut engine = engine_with(MockLockSource::single_block(NOW));
        engine.cancel_flag().store(true, Ordering::SeqCst);

        let result = engine.run_once(&TenantScope::SystemWide);
        assert!(matches!(result, Err(PassError::Cancelled)));
        assert_eq!(engine.store().history().total_rows(), 0);
    }

    #[test]
    fn failed_sample_is_reported_and_persists_nothing() {
        let mut engine = engine_with(MockLockSource::new());
        engine.source_mut().fail_next("connection refused");

        let result = engine.run_once(&TenantScope::SystemWide);
        assert!(matches!(result, Err(PassError::Sample(_))));
        assert_eq!(engine.store().history().total_rows(), 0);

        // The next scheduled pass retries and succeeds.
        *engine.source_mut() = MockLockSource::idle_system(NOW);
        assert!(engine.run_once(&TenantScope::SystemWide).is_ok());
    }

    #[test]
    fn trend_degrades_when_contention_appears() {
        let mut engine = engine_with(MockLockSource::idle_system(NOW));
        let scope = TenantScope::SystemWide;
        engine.run_once(&scope).unwrap();

        *engine.source_mut() = MockLockSource::contention_storm(NOW, 2);
        engine.run_once(&scope).unwrap();

        use crate::storage::model::TrendDirection;
        let windows = &engine.store().history().windows;
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].value.trend, TrendDirection::Stable);
        assert_eq!(windows[1].value.trend, TrendDirection::Degrading);
    }

    #[test]
    fn retention_runs_through_the_engine() {
        let mut engine = engine_with(MockLockSource::single_block(NOW));
        engine.run_once(&TenantScope::SystemWide).unwrap();

        // Fresh records: nothing to close.
        let result = engine.run_retention();
        assert_eq!(result.total(), 0);
    }
}
