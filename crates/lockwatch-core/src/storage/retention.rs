//! Retention manager: idempotent close-only horizon cleanup.

use tracing::info;

use crate::config::RetentionConfig;
use crate::storage::findings::{Closeable, FindingsStore};
use crate::storage::model::DeadlockStatus;

/// What one retention run changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionResult {
    pub locks_closed: usize,
    pub summaries_closed: usize,
    pub windows_closed: usize,
    pub deadlocks_expired: usize,
}

impl RetentionResult {
    pub fn total(&self) -> usize {
        self.locks_closed + self.summaries_closed + self.windows_closed + self.deadlocks_expired
    }
}

pub struct RetentionManager {
    config: RetentionConfig,
}

impl RetentionManager {
    pub fn new(config: RetentionConfig) -> Self {
        Self { config }
    }

    /// Closes every record recorded before the horizon.
    ///
    /// Close-only: nothing is physically deleted, so tenant-visible history
    /// inside the horizon stays auditable. Already-closed rows are skipped,
    /// which makes re-running against the same store a no-op. Deadlocks
    /// still open past the horizon move to their terminal Expired state.
    pub fn run(&self, store: &mut FindingsStore, now: i64) -> RetentionResult {
        let cutoff = self.config.cutoff(now);
        let mut result = RetentionResult::default();
        let history = store.history_mut();

        for row in &mut history.locks {
            if row.recorded_at < cutoff && row.close(now) {
                result.locks_closed += 1;
            }
        }
        for row in &mut history.summaries {
            if row.recorded_at < cutoff && row.close(now) {
                result.summaries_closed += 1;
            }
        }
        for row in &mut history.windows {
            if row.recorded_at < cutoff && row.close(now) {
                result.windows_closed += 1;
            }
        }
        for row in &mut history.deadlocks {
            if row.recorded_at < cutoff && row.value.is_open() {
                row.value.status = DeadlockStatus::Expired;
                row.close(now);
                result.deadlocks_expired += 1;
            }
        }

        if result.total() > 0 {
            info!(
                cutoff,
                locks = result.locks_closed,
                summaries = result.summaries_closed,
                windows = result.windows_closed,
                deadlocks_expired = result.deadlocks_expired,
                "retention pass closed stale records"
            );
        }
        result
    }
}
