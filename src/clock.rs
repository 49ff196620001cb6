//! Wall-clock sources for the controller.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system's real-time clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that starts at a chosen instant and advances with tokio's clock.
///
/// Useful to rehearse a schedule in a dry run, and in tests with paused time,
/// where it follows every virtual sleep.
#[derive(Debug, Clone, Copy)]
pub struct ShiftedClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl ShiftedClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }
}

impl Clock for ShiftedClock {
    fn now(&self) -> DateTime<Utc> {
        TimeDelta::from_std(self.started.elapsed())
            .ok()
            .and_then(|elapsed| self.origin.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
