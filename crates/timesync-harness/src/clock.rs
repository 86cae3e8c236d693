#![forbid(unsafe_code)]

//! Virtual monotonic clock.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use timesync::TimeSource;
use web_time::Instant;

/// A shared, manually advanced clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    start: Instant,
    now: Rc<Cell<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        let start = Instant::now();
        Self {
            start,
            now: Rc::new(Cell::new(start)),
        }
    }

    /// Instant the clock started at.
    #[must_use]
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Instant `ms` after start.
    #[must_use]
    pub fn at_ms(&self, ms: u64) -> Instant {
        self.start + Duration::from_millis(ms)
    }

    /// Virtual milliseconds since start.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        let elapsed = self.now.get().saturating_duration_since(self.start);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Move to `to`. Never moves backwards.
    pub fn set(&self, to: Instant) {
        if to > self.now.get() {
            self.now.set(to);
        }
    }

    /// Snapshot factory returning [`ManualClock::elapsed_ms`].
    pub fn snapshot_factory(&self) -> impl FnMut(&u64) -> u64 + 'static {
        let clock = self.clone();
        move |_prev: &u64| clock.elapsed_ms()
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}
