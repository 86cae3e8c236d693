#![forbid(unsafe_code)]

//! Deterministic fixtures for testing time-sync engines.
//!
//! - [`ManualClock`]: a virtual monotonic clock that only moves when told to.
//!   It doubles as a snapshot factory reporting elapsed virtual
//!   milliseconds, so "no time passed" naturally yields an unchanged
//!   snapshot.
//! - [`advance_to`] / [`advance_by`]: a virtual host loop that fires every
//!   deadline up to a target, in order, with the clock set to each deadline.
//! - [`TickRecorder`]: tagged callbacks that log what they saw and when.

pub mod clock;
pub mod recorder;
pub mod virtual_time;

pub use clock::ManualClock;
pub use recorder::{Delivery, TickRecorder};
pub use virtual_time::{advance_by, advance_to, virtual_engine};
