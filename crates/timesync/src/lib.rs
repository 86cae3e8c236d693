#![forbid(unsafe_code)]

//! Coalesced time snapshots for many subscribers.
//!
//! A [`TimeSync`] engine keeps one shared snapshot of "now" and one physical
//! timer. Subscribers each ask for their own refresh cadence; the engine
//! ticks at the fastest one, gives every subscriber the same snapshot on
//! every tick, and re-plans the timer whenever the set of distinct cadences
//! changes, without losing phase when it slows down.
//!
//! - [`registry`]: reference-counted callbacks per distinct interval.
//! - [`reconcile`]: the governing interval and the one physical timer.
//! - [`broadcast`]: snapshot derivation and re-entrancy-safe fan-out.
//! - [`engine`]: the public [`TimeSync`] handle and [`Subscription`] guard.
//!
//! # Architecture
//!
//! Single-threaded: state lives in `Rc<RefCell<..>>` and callbacks run with
//! no borrow held, so they may subscribe and unsubscribe re-entrantly. The
//! engine never sleeps; the host waits on [`TimeSync::poll_timeout`] and
//! calls [`TimeSync::fire_due`], or uses [`driver::run_for`].

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod interval;
pub mod reconcile;
pub mod registry;
pub mod stats;

pub use broadcast::TickKind;
pub use clock::{SnapshotFactory, SystemTimeSource, TimeSource, system_time_millis, wall_clock_millis};
pub use config::TimeSyncConfig;
pub use engine::{Subscription, TimeSync, WeakTimeSync};
pub use error::{IntervalRejection, TimeSyncError};
pub use evidence::{EvidenceSink, EvidenceSinkConfig, EvidenceSinkDestination, ReconcileEvidence};
pub use interval::{IntoRefreshInterval, RefreshInterval};
pub use reconcile::{ReconcileAction, ReconcileCause};
pub use registry::UpdateCallback;
pub use stats::TimeSyncStats;

pub use web_time::Instant;
