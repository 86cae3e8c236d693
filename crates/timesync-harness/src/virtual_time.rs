#![forbid(unsafe_code)]

//! Virtual host loop.

use std::time::Duration;

use timesync::{TimeSync, TimeSyncConfig};
use web_time::Instant;

use crate::clock::ManualClock;

/// Engine over `clock`, with snapshots equal to virtual elapsed ms.
///
/// # Panics
///
/// Panics if `config` enables a file evidence sink that cannot be opened.
#[must_use]
pub fn virtual_engine(clock: &ManualClock, config: TimeSyncConfig) -> TimeSync<u64> {
    TimeSync::with_time_source(clock.elapsed_ms(), clock.snapshot_factory(), config, clock.clone())
        .expect("virtual engine evidence sink")
}

/// Fire every deadline up to and including `target`, moving `clock` to each
/// deadline first. Returns the virtual ms of each physical tick.
pub fn advance_to<S: Clone + PartialEq + 'static>(
    engine: &TimeSync<S>,
    clock: &ManualClock,
    target: Instant,
) -> Vec<u64> {
    let mut fired = Vec::new();
    while let Some(deadline) = engine.next_deadline() {
        if deadline > target {
            break;
        }
        clock.set(deadline);
        if engine.fire_due() {
            fired.push(clock.elapsed_ms());
        }
    }
    clock.set(target);
    fired
}

/// [`advance_to`] `by` past the clock's current time.
pub fn advance_by<S: Clone + PartialEq + 'static>(
    engine: &TimeSync<S>,
    clock: &ManualClock,
    by: Duration,
) -> Vec<u64> {
    let target = timesync::TimeSource::now(clock) + by;
    advance_to(engine, clock, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_each_deadline_in_order() {
        let clock = ManualClock::new();
        let engine = virtual_engine(&clock, TimeSyncConfig::default());
        let _sub = engine.subscribe_fn(100, |_| {}).unwrap();
        let fired = advance_by(&engine, &clock, Duration::from_millis(350));
        assert_eq!(fired, vec![100, 200, 300]);
        assert_eq!(clock.elapsed_ms(), 350);
        assert_eq!(engine.get_snapshot(), 300);
    }

    #[test]
    fn paused_engine_only_moves_clock() {
        let clock = ManualClock::new();
        let engine = virtual_engine(&clock, TimeSyncConfig::default());
        assert!(advance_by(&engine, &clock, Duration::from_secs(5)).is_empty());
        assert_eq!(clock.elapsed_ms(), 5000);
        assert_eq!(engine.get_snapshot(), 0);
    }
}
