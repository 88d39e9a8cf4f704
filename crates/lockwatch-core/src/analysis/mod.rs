//! Contention analysis over one pass's snapshot.
//!
//! Stages run in a fixed order: blocking resolution, impact scoring,
//! per-session aggregation, deadlock detection, window analytics and
//! recommendations. Every stage is a pure function of the snapshot plus
//! the previous pass's carried-over state (prior window, open deadlock
//! cycles), so a pass is fully reproducible.

pub mod advisor;
pub mod aggregator;
pub mod deadlock;
pub mod resolver;
pub mod scorer;
pub mod window;

use crate::alert::AlertLevel;
use crate::config::EngineConfig;
use advisor::Recommendation;
use crate::storage::model::{
    AnalysisWindow, BlockingEdge, DeadlockEvent, LockSnapshot, SessionSummary,
};

/// Everything one pass derived, ready for persistence and alerting.
pub struct PassReport {
    /// The snapshot with impact scores filled in.
    pub snapshot: LockSnapshot,
    pub edges: Vec<BlockingEdge>,
    pub summaries: Vec<SessionSummary>,

    /// Cycles first observed in this pass.
    pub new_deadlocks: Vec<DeadlockEvent>,
    /// Open cycle keys no longer observed; their events resolve as inferred.
    pub resolved_cycles: Vec<Vec<i32>>,
    /// Cycles present in this pass, new or still open.
    pub deadlocks_observed: usize,

    pub window: AnalysisWindow,
    pub recommendations: Vec<Recommendation>,
    pub alert_level: AlertLevel,
}

pub struct Analyzer {
    config: EngineConfig,
}

impl Analyzer {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs every analysis stage for one snapshot.
    ///
    /// `prior_window` and `open_cycles` come from the previous pass's
    /// persisted results; both are empty/absent on the first run.
    pub fn run(
        &self,
        mut snapshot: LockSnapshot,
        prior_window: Option<&AnalysisWindow>,
        open_cycles: &[Vec<i32>],
    ) -> PassReport {
        let edges = resolver::resolve_blocking(&snapshot.locks);
        scorer::apply_scores(&mut snapshot.locks, &edges, snapshot.timestamp);

        let summaries = aggregator::aggregate(&snapshot, &edges, &self.config);

        let cycles = deadlock::detect_cycles(&edges);
        let (fresh, resolved_cycles) = deadlock::reconcile(&cycles, open_cycles);
        let new_deadlocks: Vec<DeadlockEvent> = fresh
            .into_iter()
            .map(|cycle| deadlock::build_event(cycle, &snapshot, &edges))
            .collect();

        let window = window::build_window(&snapshot, &edges, cycles.len(), prior_window, &self.config);

        let ctx = advisor::AdvisorContext {
            summaries: &summaries,
            deadlocks: cycles.len(),
            critical_locks: scorer::critical_count(&snapshot.locks),
            window: &window,
            config: &self.config,
        };
        let (recommendations, alert_level) = advisor::evaluate_all(&ctx);

        PassReport {
            snapshot,
            edges,
            summaries,
            new_deadlocks,
            resolved_cycles,
            deadlocks_observed: cycles.len(),
            window,
            recommendations,
            alert_level,
        }
    }
}
