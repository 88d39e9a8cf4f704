//! Engine configuration: severity ladder, alerting thresholds, retention.

use std::time::Duration;

/// Thresholds driving scoring, aggregation, deadlock handling and advice.
///
/// Defaults follow the documented policy in DESIGN.md; callers may override
/// any field before constructing the engine. All durations dealing with lock
/// age are in whole seconds because the resource manager reports epoch
/// timestamps at second granularity.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single sampling query. The pass is abandoned and
    /// reported as failed when the resource manager does not answer in time.
    pub sample_timeout: Duration,

    /// Severity ladder for blocking sessions: below this is Low.
    pub severity_medium_secs: i64,
    /// At or above this the session is High severity.
    pub severity_high_secs: i64,
    /// At or above this the session is Critical severity.
    pub severity_critical_secs: i64,

    /// A blocking session becomes auto-kill eligible after this many seconds,
    /// provided its severity is High or worse. Eligibility is advisory only.
    pub kill_threshold_secs: i64,

    /// More blocking sessions than this trips the transaction-pattern advice.
    pub blocking_sessions_threshold: usize,
    /// More critical-impact locks than this trips the intervention advice.
    pub critical_locks_threshold: usize,
    /// Efficiency below this trips the query-optimization advice.
    pub efficiency_floor: u8,

    /// Efficiency penalty per blocking event in the window.
    pub efficiency_penalty_per_event: f64,
    /// Efficiency delta treated as noise when classifying the trend.
    pub trend_noise_band: u8,

    pub retention: RetentionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_timeout: Duration::from_secs(5),
            severity_medium_secs: 60,
            severity_high_secs: 300,
            severity_critical_secs: 600,
            kill_threshold_secs: 600,
            blocking_sessions_threshold: 5,
            critical_locks_threshold: 10,
            efficiency_floor: 70,
            efficiency_penalty_per_event: 5.0,
            trend_noise_band: 3,
            retention: RetentionConfig::default(),
        }
    }
}

/// Retention horizon for persisted findings.
///
/// Records older than the horizon are closed (end-dated), never physically
/// deleted within the horizon.
#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    pub horizon_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { horizon_days: 30 }
    }
}

impl RetentionConfig {
    pub fn new(horizon_days: u32) -> Self {
        Self { horizon_days }
    }

    /// Horizon expressed in seconds.
    pub fn horizon_secs(&self) -> i64 {
        self.horizon_days as i64 * 86_400
    }

    /// The newest timestamp that is already stale at `now`.
    pub fn cutoff(&self, now: i64) -> i64 {
        now - self.horizon_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder_is_ordered() {
        let config = EngineConfig::default();
        assert!(config.severity_medium_secs < config.severity_high_secs);
        assert!(config.severity_high_secs < config.severity_critical_secs);
        assert!(config.kill_threshold_secs >= config.severity_high_secs);
    }

    #[test]
    fn retention_cutoff_subtracts_horizon() {
        let retention = RetentionConfig::new(30);
        let now = 1_700_000_000;
        assert_eq!(retention.cutoff(now), now - 30 * 86_400);
    }
}
