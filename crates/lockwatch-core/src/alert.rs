//! Alert events and sinks.

use serde::Serialize;
use tracing::{error, warn};

use crate::analysis::advisor::Recommendation;
use crate::storage::model::{DeadlockEvent, SessionSummary};

/// Overall alert level for one pass.
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    None,
    Warning,
    Critical,
}

/// Emitted when a pass grades Warning or Critical: the triggering findings
/// plus the full recommendation list, ready for downstream notification.
#[derive(Clone, Serialize, Debug)]
pub struct AlertEvent {
    /// Tenant label the pass ran under.
    pub tenant: String,
    pub level: AlertLevel,
    pub at: i64,
    /// Blocking sessions that crossed the High severity bar.
    pub triggering_summaries: Vec<SessionSummary>,
    /// Deadlocks newly detected in the pass.
    pub triggering_deadlocks: Vec<DeadlockEvent>,
    pub recommendations: Vec<Recommendation>,
}

/// Downstream notification seam.
pub trait AlertSink: Send {
    fn emit(&mut self, event: &AlertEvent);
}

/// Default sink: structured log lines, Critical at error level.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn emit(&mut self, event: &AlertEvent) {
        let actions: Vec<&str> = event
            .recommendations
            .iter()
            .map(|r| r.action.as_str())
            .collect();
        match event.level {
            AlertLevel::Critical => error!(
                tenant = %event.tenant,
                deadlocks = event.triggering_deadlocks.len(),
                blocking = event.triggering_summaries.len(),
                recommendations = ?actions,
                "critical contention alert"
            ),
            _ => warn!(
                tenant = %event.tenant,
                blocking = event.triggering_summaries.len(),
                recommendations = ?actions,
                "contention alert"
            ),
        }
    }
}

/// Test sink capturing emitted events behind a shared handle, so callers
/// can inspect what a boxed sink received.
#[derive(Debug, Default, Clone)]
pub struct VecAlertSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<AlertEvent>>>,
}

impl VecAlertSink {
    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().expect("sink lock").clone()
    }
}

impl AlertSink for VecAlertSink {
    fn emit(&mut self, event: &AlertEvent) {
        self.events.lock().expect("sink lock").push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_levels_are_ordered() {
        assert!(AlertLevel::None < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Critical);
    }
}
