#![forbid(unsafe_code)]

//! Blocking host loop for engines on the system clock.
//!
//! Hosts with their own event loop should fold [`TimeSync::poll_timeout`]
//! into their poll timeout and call [`TimeSync::fire_due`] on wake-up, the
//! same way a UI runtime folds in its tick rate. This module is for hosts
//! that have nothing else to wait on.

use std::time::Duration;

use tracing::trace;
use web_time::Instant;

use crate::engine::TimeSync;

/// Upper bound on a single sleep, so a paused engine that is resubscribed
/// from another callback is noticed promptly.
pub const MAX_SLEEP: Duration = Duration::from_millis(50);

/// Drive `engine` until `stop`. Returns the number of physical ticks fired.
pub fn run_until<S: Clone + PartialEq + 'static>(engine: &TimeSync<S>, stop: Instant) -> u64 {
    let mut fired = 0;
    loop {
        let now = Instant::now();
        if now >= stop {
            return fired;
        }
        let remaining = stop - now;
        let wait = engine
            .poll_timeout()
            .unwrap_or(MAX_SLEEP)
            .min(MAX_SLEEP)
            .min(remaining);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        if engine.fire_due() {
            fired += 1;
            trace!(fired, "driver fired tick");
        }
    }
}

/// Drive `engine` for `duration` from now.
pub fn run_for<S: Clone + PartialEq + 'static>(engine: &TimeSync<S>, duration: Duration) -> u64 {
    run_until(engine, Instant::now() + duration)
}
