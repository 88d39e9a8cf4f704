//! Recommendation engine: fixed thresholds over the pass's findings.

use serde::Serialize;

use crate::alert::AlertLevel;
use crate::config::EngineConfig;
use crate::storage::model::{AnalysisWindow, ImpactSeverity, SessionSummary};

/// One actionable recommendation. `action` is the short human-readable
/// phrase surfaced in pass outcomes; `detail` carries the reasoning.
#[derive(Clone, Serialize, Debug)]
pub struct Recommendation {
    pub id: String,
    pub severity: AlertLevel,
    pub action: String,
    pub detail: String,
}

/// Inputs every advisor sees: the pass's summaries, deadlock count,
/// critical-impact lock count and window.
pub struct AdvisorContext<'a> {
    pub summaries: &'a [SessionSummary],
    pub deadlocks: usize,
    pub critical_locks: usize,
    pub window: &'a AnalysisWindow,
    pub config: &'a EngineConfig,
}

pub trait Advisor: Send + Sync {
    fn id(&self) -> &'static str;
    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation>;
}

pub fn all_advisors() -> Vec<Box<dyn Advisor>> {
    vec![
        Box::new(TransactionPatternAdvisor),
        Box::new(DeadlockRetryAdvisor),
        Box::new(InterventionAdvisor),
        Box::new(QueryOptimizationAdvisor),
    ]
}

/// Runs the registry and computes the overall alert level.
///
/// An empty result collapses to the single "normal activity"
/// recommendation; the alert level is the worst severity emitted.
pub fn evaluate_all(ctx: &AdvisorContext) -> (Vec<Recommendation>, AlertLevel) {
    let mut recommendations: Vec<Recommendation> = Vec::new();
    for advisor in all_advisors() {
        recommendations.extend(advisor.evaluate(ctx));
    }

    if recommendations.is_empty() {
        recommendations.push(Recommendation {
            id: "normal_activity".to_string(),
            severity: AlertLevel::None,
            action: "normal activity".to_string(),
            detail: "No contention threshold tripped in this pass.".to_string(),
        });
    }

    recommendations.sort_by(|a, b| b.severity.cmp(&a.severity));
    let level = recommendations
        .iter()
        .map(|r| r.severity)
        .max()
        .unwrap_or(AlertLevel::None);
    (recommendations, level)
}

// ============================================================
// 1. TransactionPatternAdvisor
// ============================================================

pub struct TransactionPatternAdvisor;

impl Advisor for TransactionPatternAdvisor {
    fn id(&self) -> &'static str {
        "blocking_sessions"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        if ctx.summaries.len() <= ctx.config.blocking_sessions_threshold {
            return Vec::new();
        }

        let severity = if ctx
            .summaries
            .iter()
            .any(|s| s.severity >= ImpactSeverity::Critical)
        {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };

        vec![Recommendation {
            id: self.id().to_string(),
            severity,
            action: "review transaction patterns".to_string(),
            detail: format!(
                "{} sessions are blocking others. Long transactions holding \
                 strong locks are the usual cause; shorten them or lower the \
                 lock level they take.",
                ctx.summaries.len()
            ),
        }]
    }
}

// ============================================================
// 2. DeadlockRetryAdvisor
// ============================================================

pub struct DeadlockRetryAdvisor;

impl Advisor for DeadlockRetryAdvisor {
    fn id(&self) -> &'static str {
        "deadlock_retry"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        if ctx.deadlocks == 0 {
            return Vec::new();
        }

        vec![Recommendation {
            id: self.id().to_string(),
            severity: AlertLevel::Critical,
            action: "implement retry logic".to_string(),
            detail: format!(
                "{} deadlock cycle(s) observed. Clients should retry aborted \
                 transactions, and conflicting transactions should acquire \
                 resources in a consistent order.",
                ctx.deadlocks
            ),
        }]
    }
}

// ============================================================
// 3. InterventionAdvisor
// ============================================================

pub struct InterventionAdvisor;

impl Advisor for InterventionAdvisor {
    fn id(&self) -> &'static str {
        "critical_locks"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        if ctx.critical_locks <= ctx.config.critical_locks_threshold {
            return Vec::new();
        }

        vec![Recommendation {
            id: self.id().to_string(),
            severity: AlertLevel::Critical,
            action: "consider intervention".to_string(),
            detail: format!(
                "{} locks grade critical-impact. Review the flagged sessions; \
                 auto-kill-eligible ones are listed in the session summaries.",
                ctx.critical_locks
            ),
        }]
    }
}

// ============================================================
// 4. QueryOptimizationAdvisor
// ============================================================

pub struct QueryOptimizationAdvisor;

impl Advisor for QueryOptimizationAdvisor {
    fn id(&self) -> &'static str {
        "low_efficiency"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        if ctx.window.efficiency_score >= ctx.config.efficiency_floor {
            return Vec::new();
        }

        vec![Recommendation {
            id: self.id().to_string(),
            severity: AlertLevel::Warning,
            action: "optimize queries".to_string(),
            detail: format!(
                "Lock efficiency is {} (floor {}). Frequent blocking suggests \
                 queries hold locks longer than they need to.",
                ctx.window.efficiency_score, ctx.config.efficiency_floor
            ),
        }]
    }
}
