//! Engine health, published after every cycle

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of the engine's recent history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    /// Completion time of the last successful cycle
    pub last_success_at: Option<DateTime<Utc>>,
    /// Message of the most recent failure (kept after later successes)
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Successful cycles since start
    pub cycles_completed: u64,
    /// Events produced by the last successful cycle
    pub last_cycle_events: usize,
}

impl EngineStatus {
    /// True once a cycle has succeeded and none has failed since
    pub fn is_healthy(&self) -> bool {
        self.last_success_at.is_some() && self.consecutive_failures == 0
    }

    pub(crate) fn record_success(&mut self, at: DateTime<Utc>, events: usize) {
        self.last_success_at = Some(at);
        self.consecutive_failures = 0;
        self.cycles_completed += 1;
        self.last_cycle_events = events;
    }

    pub(crate) fn record_failure(&mut self, at: DateTime<Utc>, error: &crate::Error) {
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(at);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}
