#![forbid(unsafe_code)]

//! Time sources and snapshot factories.
//!
//! The engine reads two different clocks:
//!
//! - a **monotonic** [`TimeSource`], used only for scheduling (deadlines and
//!   catch-up arithmetic), and
//! - a **snapshot factory**, a strategy closure that derives the next
//!   snapshot from the previous one. For production this is usually
//!   [`wall_clock_millis`]; tests inject deterministic steppers.
//!
//! Keeping them separate lets a test pin the snapshot sequence while still
//! advancing virtual time, and keeps wall-clock jumps out of the scheduler.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use web_time::Instant;

/// Monotonic time for scheduling decisions.
pub trait TimeSource {
    /// Current monotonic instant.
    fn now(&self) -> Instant;
}

/// [`TimeSource`] backed by the platform monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Strategy that derives the next snapshot from the previous one.
///
/// Returning a value equal (by `PartialEq`) to the previous snapshot means
/// "nothing advanced"; the engine then skips the broadcast.
pub type SnapshotFactory<S> = Box<dyn FnMut(&S) -> S>;

/// Current wall-clock time truncated to whole milliseconds.
#[must_use]
pub fn system_time_millis() -> SystemTime {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let millis = u64::try_from(since_epoch.as_millis()).unwrap_or(u64::MAX);
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Factory producing wall-clock snapshots at millisecond resolution.
///
/// Two derivations inside the same millisecond compare equal, so a resync
/// that lands in the same millisecond as the last tick is a no-op.
#[must_use]
pub fn wall_clock_millis() -> SnapshotFactory<SystemTime> {
    Box::new(|_prev: &SystemTime| system_time_millis())
}
