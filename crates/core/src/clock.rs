//! Time source consulted by the scheduler.

use time::{OffsetDateTime, Weekday};
use tracing::warn;

use crate::schedule::MilitaryTime;

pub trait Clock: Send + Sync {
    fn time(&self) -> MilitaryTime;
    fn day(&self) -> Weekday;
    fn set_time(&mut self, time: MilitaryTime);
    fn set_day(&mut self, day: Weekday);

    /// Called once per elapsed minute, before the tick handler runs.
    fn advance_minute(&mut self) {}
}

// ---------------------------------------------------------------------------
// Simulated clock
// ---------------------------------------------------------------------------

/// A settable clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct SimClock {
    time: MilitaryTime,
    day: Weekday,
}

impl SimClock {
    pub fn new(time: MilitaryTime, day: Weekday) -> Self {
        Self { time, day }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(MilitaryTime::MIDNIGHT, Weekday::Monday)
    }
}

impl Clock for SimClock {
    fn time(&self) -> MilitaryTime {
        self.time
    }

    fn day(&self) -> Weekday {
        self.day
    }

    fn set_time(&mut self, time: MilitaryTime) {
        self.time = time;
    }

    fn set_day(&mut self, day: Weekday) {
        self.day = day;
    }

    fn advance_minute(&mut self) {
        let (next, rolled) = self.time.next_minute();
        self.time = next;
        if rolled {
            self.day = self.day.next();
        }
    }
}

// ---------------------------------------------------------------------------
// Wall clock
// ---------------------------------------------------------------------------

/// Local wall-clock time (UTC when the local offset cannot be determined).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    fn now() -> OffsetDateTime {
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

impl Clock for SystemClock {
    fn time(&self) -> MilitaryTime {
        let now = Self::now();
        MilitaryTime::new(now.hour(), now.minute()).unwrap_or(MilitaryTime::MIDNIGHT)
    }

    fn day(&self) -> Weekday {
        Self::now().weekday()
    }

    fn set_time(&mut self, time: MilitaryTime) {
        warn!(%time, "system clock cannot be set; ignoring");
    }

    fn set_day(&mut self, day: Weekday) {
        warn!(%day, "system clock cannot be set; ignoring");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
