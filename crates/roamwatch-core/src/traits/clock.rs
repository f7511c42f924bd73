// # Clock Trait
//
// Source of "now" for the engine and service. Production uses the system
// clock; tests inject a manual clock to make durations deterministic.

use chrono::{DateTime, Utc};

/// Wall-clock source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
