//! Wall-clock abstraction for time-dependent rules.
//!
//! Deadline locks, trash expiry and work-session durations all read "now"
//! through [`Clock`] so tests can pin time.

use crate::model::timestamp::EpochMs;
use std::cell::Cell;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock {
    /// Current time as Unix epoch milliseconds.
    fn now_ms(&self) -> EpochMs;
}

/// Reads the host system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMs {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
            // Host clock set before 1970.
            Err(err) => -i64::try_from(err.duration().as_millis()).unwrap_or(i64::MAX),
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<EpochMs>,
}

impl ManualClock {
    pub fn new(start_ms: EpochMs) -> Self {
        Self {
            now: Cell::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: EpochMs) {
        self.now.set(now_ms);
    }

    /// Moves time forward (or backward, for negative `delta_ms`).
    pub fn advance(&self, delta_ms: i64) {
        self.now.set(self.now.get() + delta_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMs {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> EpochMs {
        (**self).now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, ManualClock, SystemClock};

    #[test]
    fn manual_clock_moves_only_on_request() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.advance(-500);
        assert_eq!(clock.now_ms(), 750);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
