#![forbid(unsafe_code)]

//! The time-sync engine handle.
//!
//! [`TimeSync<S>`] owns the latest snapshot, the subscription registry and
//! the single physical timer. Any number of subscribers ask for snapshots at
//! their own [`RefreshInterval`]; the engine runs one timer at the fastest
//! requested cadence and hands everybody the same snapshot on each tick.
//!
//! # Driving the timer
//!
//! The engine does not sleep or spawn. The host reads
//! [`TimeSync::poll_timeout`] (or [`TimeSync::next_deadline`]), waits, and
//! calls [`TimeSync::fire_due`]. [`crate::driver`] has a blocking loop for
//! hosts without an event loop of their own.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use timesync::{TimeSync, UpdateCallback};
//!
//! let engine = TimeSync::new(0u64, |prev: &u64| prev + 1);
//! let seen = Rc::new(Cell::new(0));
//! let sink = Rc::clone(&seen);
//! let on_update = UpdateCallback::new(move |snapshot: &u64| sink.set(*snapshot));
//!
//! let _sub = engine.subscribe(500, &on_update).unwrap();
//! // First registration at a new interval forces a resync.
//! assert_eq!(seen.get(), 1);
//! assert_eq!(engine.get_snapshot(), 1);
//! assert!(engine.subscribe(-5, &on_update).is_err());
//! ```

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::rc::{Rc, Weak};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use web_time::Instant;

use crate::broadcast::{Broadcaster, TickKind, run_tick};
use crate::clock::{SnapshotFactory, SystemTimeSource, TimeSource, system_time_millis, wall_clock_millis};
use crate::config::TimeSyncConfig;
use crate::error::TimeSyncError;
use crate::evidence::{EvidenceSink, ReconcileEvidence};
use crate::interval::{IntoRefreshInterval, RefreshInterval};
use crate::reconcile::{ReconcileAction, ReconcileCause, Reconciler};
use crate::registry::{Added, Registry, UpdateCallback};
use crate::stats::TimeSyncStats;

/// Shared interior of a [`TimeSync`].
pub(crate) struct EngineState<S> {
    pub(crate) broadcaster: Broadcaster<S>,
    pub(crate) registry: Registry<S>,
    pub(crate) reconciler: Reconciler,
    pub(crate) stats: TimeSyncStats,
    time: Box<dyn TimeSource>,
    resync_on_new_subscription: bool,
    evidence: Option<EvidenceSink>,
    evidence_seq: u64,
}

impl<S> EngineState<S> {
    pub(crate) fn now(&self) -> Instant {
        self.time.now()
    }

    /// Re-plan the timer after a tracker was created or pruned.
    fn reconcile(&mut self, cause: ReconcileCause) -> ReconcileAction {
        let now = self.now();
        let previous = self.reconciler.governing();
        let next = self.registry.governing();
        let action = self.reconciler.reconcile(next, now);
        match action {
            ReconcileAction::Unchanged => return action,
            ReconcileAction::Armed { .. } => self.stats.rearms += 1,
            ReconcileAction::CatchUp { .. } | ReconcileAction::TickNow { .. } => {
                self.stats.rearms += 1;
                self.stats.catch_ups += 1;
            }
            ReconcileAction::Paused => self.stats.pauses += 1,
            ReconcileAction::Disarmed => {}
        }
        debug!(
            cause = cause.as_str(),
            previous = ?previous,
            next = ?next,
            action = action.as_str(),
            "governing interval changed"
        );

        if let Some(sink) = &self.evidence {
            let record = ReconcileEvidence {
                seq: self.evidence_seq,
                cause,
                previous,
                next,
                action,
            };
            self.evidence_seq += 1;
            if let Err(err) = sink.write_jsonl(&record.to_jsonl()) {
                warn!(error = %err, "failed to write reconcile evidence");
            }
        }
        action
    }
}

/// A process-wide source of coalesced time snapshots.
///
/// Cloning a `TimeSync` creates another handle to the **same** engine.
/// Callbacks that need to re-enter the engine should capture a
/// [`WeakTimeSync`] to avoid a reference cycle.
///
/// # Invariants
///
/// 1. At most one physical timer is armed.
/// 2. Whenever subscribers exist, the timer period equals the minimum
///    requested finite interval.
/// 3. Each distinct callback is invoked at most once per tick, with the same
///    snapshot every other callback receives.
/// 4. [`TimeSync::get_snapshot`] always returns the latest snapshot, with or
///    without subscribers.
pub struct TimeSync<S> {
    inner: Rc<RefCell<EngineState<S>>>,
}

// Manual Clone: shares the same Rc.
impl<S> Clone for TimeSync<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for TimeSync<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(st) => f
                .debug_struct("TimeSync")
                .field("snapshot", st.broadcaster.snapshot())
                .field("governing", &st.reconciler.governing())
                .field("subscribers", &st.registry.subscriber_count())
                .finish(),
            Err(_) => f.debug_struct("TimeSync").finish_non_exhaustive(),
        }
    }
}

impl TimeSync<SystemTime> {
    /// Engine over wall-clock time at millisecond resolution.
    #[must_use]
    pub fn wall_clock() -> Self {
        Self::from_parts(
            system_time_millis(),
            wall_clock_millis(),
            &TimeSyncConfig::default(),
            Box::new(SystemTimeSource),
            None,
        )
    }
}

impl<S: Clone + PartialEq + 'static> TimeSync<S> {
    /// Create an engine with the default configuration.
    ///
    /// `factory` derives each new snapshot from the previous one; returning
    /// an equal value suppresses the broadcast.
    #[must_use]
    pub fn new(initial: S, factory: impl FnMut(&S) -> S + 'static) -> Self {
        Self::from_parts(
            initial,
            Box::new(factory),
            &TimeSyncConfig::default(),
            Box::new(SystemTimeSource),
            None,
        )
    }

    /// Create an engine with an explicit configuration.
    ///
    /// Fails only if an enabled evidence file cannot be opened.
    pub fn with_config(
        initial: S,
        factory: impl FnMut(&S) -> S + 'static,
        config: TimeSyncConfig,
    ) -> io::Result<Self> {
        Self::with_time_source(initial, factory, config, SystemTimeSource)
    }

    /// Create an engine reading monotonic time from `source`.
    pub fn with_time_source(
        initial: S,
        factory: impl FnMut(&S) -> S + 'static,
        config: TimeSyncConfig,
        source: impl TimeSource + 'static,
    ) -> io::Result<Self> {
        let evidence = EvidenceSink::from_config(&config.evidence)?;
        Ok(Self::from_parts(
            initial,
            Box::new(factory),
            &config,
            Box::new(source),
            evidence,
        ))
    }

    fn from_parts(
        initial: S,
        factory: SnapshotFactory<S>,
        config: &TimeSyncConfig,
        time: Box<dyn TimeSource>,
        evidence: Option<EvidenceSink>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(EngineState {
                broadcaster: Broadcaster::new(initial, factory),
                registry: Registry::new(),
                reconciler: Reconciler::new(),
                stats: TimeSyncStats::default(),
                time,
                resync_on_new_subscription: config.resync_on_new_subscription,
                evidence,
                evidence_seq: 0,
            })),
        }
    }

    /// Register `callback` at `interval`.
    ///
    /// Registering the same callback again at the same interval bumps a
    /// reference count; each returned [`Subscription`] releases one count.
    /// The first registration at a new interval forces a resync (when
    /// configured) and re-plans the timer.
    ///
    /// # Errors
    ///
    /// [`TimeSyncError::InvalidInterval`] if `interval` is not a positive
    /// whole number of milliseconds or the idle sentinel. Nothing is
    /// registered in that case.
    ///
    /// # Panics
    ///
    /// Propagates a panic from any callback during the forced resync. The
    /// new registration is rolled back while unwinding.
    pub fn subscribe(
        &self,
        interval: impl IntoRefreshInterval,
        callback: &UpdateCallback<S>,
    ) -> Result<Subscription, TimeSyncError> {
        let interval = interval.into_refresh_interval()?;

        let (opened_tracker, resync) = {
            let mut st = self.inner.borrow_mut();
            let opened = st.registry.add(interval, callback) == Added::NewTracker;
            if opened {
                st.reconcile(ReconcileCause::Subscribed);
            }
            (opened, st.resync_on_new_subscription)
        };

        let subscription = Subscription::new(Rc::downgrade(&self.inner), interval, callback);
        if opened_tracker && resync {
            run_tick(&self.inner, TickKind::Resync);
        }
        Ok(subscription)
    }

    /// Register a one-off closure. Equivalent to wrapping it in a fresh
    /// [`UpdateCallback`] and calling [`TimeSync::subscribe`].
    pub fn subscribe_fn(
        &self,
        interval: impl IntoRefreshInterval,
        callback: impl Fn(&S) + 'static,
    ) -> Result<Subscription, TimeSyncError> {
        self.subscribe(interval, &UpdateCallback::new(callback))
    }

    /// Latest snapshot. Pure read.
    #[must_use]
    pub fn get_snapshot(&self) -> S {
        self.inner.borrow().broadcaster.snapshot().clone()
    }

    /// Borrow the latest snapshot without cloning.
    ///
    /// # Panics
    ///
    /// `f` runs while the engine is borrowed. Reading the engine from `f`
    /// is fine; calling [`TimeSync::subscribe`], [`TimeSync::resync`],
    /// [`TimeSync::fire_due`] or releasing a [`Subscription`] from `f`
    /// panics. Use [`TimeSync::get_snapshot`] when `f` needs to do that.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(self.inner.borrow().broadcaster.snapshot())
    }

    /// Tick on demand: derive a snapshot and broadcast it if it changed.
    /// Does not move the timer's deadline.
    pub fn resync(&self) {
        run_tick(&self.inner, TickKind::Manual);
    }

    /// Fire the physical timer if its deadline has passed.
    ///
    /// Returns whether a tick was produced. A host that wakes up late gets
    /// one tick, not one per missed period.
    pub fn fire_due(&self) -> bool {
        let due = {
            let mut st = self.inner.borrow_mut();
            let now = st.now();
            st.reconciler.fire(now)
        };
        if due {
            run_tick(&self.inner, TickKind::Physical);
        }
        due
    }

    /// Deadline of the armed timer, `None` when nothing is armed.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.borrow().reconciler.next_deadline()
    }

    /// Time until the armed timer is due (zero if overdue), `None` when
    /// nothing is armed.
    #[must_use]
    pub fn poll_timeout(&self) -> Option<Duration> {
        let st = self.inner.borrow();
        let now = st.now();
        st.reconciler
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Minimum requested interval, `None` when paused.
    #[must_use]
    pub fn governing_interval(&self) -> Option<RefreshInterval> {
        self.inner.borrow().reconciler.governing()
    }

    /// Period of the armed timer.
    #[must_use]
    pub fn timer_period(&self) -> Option<Duration> {
        self.inner.borrow().reconciler.timer().map(|t| t.period)
    }

    /// Instant of the most recent tick that produced a new snapshot,
    /// physical or forced. Ticks skipped as unchanged are not counted.
    #[must_use]
    pub fn last_broadcast(&self) -> Option<Instant> {
        self.inner.borrow().reconciler.last_broadcast()
    }

    /// `true` when no subscriptions exist.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.borrow().registry.governing().is_none()
    }

    /// Number of distinct callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().registry.subscriber_count()
    }

    /// Number of live registrations, counting duplicates.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.inner.borrow().registry.registration_count()
    }

    /// Number of distinct active intervals.
    #[must_use]
    pub fn tracker_count(&self) -> usize {
        self.inner.borrow().registry.tracker_count()
    }

    /// Active intervals, fastest first.
    #[must_use]
    pub fn active_intervals(&self) -> Vec<RefreshInterval> {
        self.inner.borrow().registry.intervals()
    }

    /// How many times `callback` is registered at `interval`.
    #[must_use]
    pub fn registrations_of(&self, interval: RefreshInterval, callback: &UpdateCallback<S>) -> usize {
        self.inner.borrow().registry.count_of(interval, callback.key())
    }

    #[must_use]
    pub fn stats(&self) -> TimeSyncStats {
        self.inner.borrow().stats
    }

    /// The evidence sink, when one is configured.
    #[must_use]
    pub fn evidence_sink(&self) -> Option<EvidenceSink> {
        self.inner.borrow().evidence.clone()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakTimeSync<S> {
        WeakTimeSync {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

/// Non-owning handle to a [`TimeSync`].
pub struct WeakTimeSync<S> {
    inner: Weak<RefCell<EngineState<S>>>,
}

impl<S> Clone for WeakTimeSync<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for WeakTimeSync<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTimeSync").finish_non_exhaustive()
    }
}

impl<S> WeakTimeSync<S> {
    #[must_use]
    pub fn upgrade(&self) -> Option<TimeSync<S>> {
        self.inner.upgrade().map(|inner| TimeSync { inner })
    }
}

type Release = Box<dyn FnOnce(bool)>;

/// One registration of a callback at an interval.
///
/// Dropping the guard unsubscribes. [`Subscription::unsubscribe`] does the
/// same explicitly and is idempotent.
pub struct Subscription {
    interval: RefreshInterval,
    release: Option<Release>,
}

impl Subscription {
    fn new<S: Clone + PartialEq + 'static>(
        state: Weak<RefCell<EngineState<S>>>,
        interval: RefreshInterval,
        callback: &UpdateCallback<S>,
    ) -> Self {
        let key = callback.key();
        let release: Release = Box::new(move |allow_tick: bool| {
            let Some(state) = state.upgrade() else {
                return;
            };
            let (released, action) = {
                let mut st = state.borrow_mut();
                let removed = st.registry.remove(interval, key);
                let action = if removed.is_structural() {
                    st.reconcile(ReconcileCause::Unsubscribed)
                } else {
                    ReconcileAction::Unchanged
                };
                (removed.into_released(), action)
            };
            // The callback may own guards of its own; drop it unborrowed.
            drop(released);
            if allow_tick && matches!(action, ReconcileAction::TickNow { .. }) {
                run_tick(&state, TickKind::CatchUp);
            }
        });
        Self {
            interval,
            release: Some(release),
        }
    }

    /// Release this registration. Later calls do nothing.
    ///
    /// If the release slows the timer down while the engine is already past
    /// the new period, the catch-up tick runs here, synchronously.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release(true);
        }
    }

    /// Whether this guard still holds its registration.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    #[must_use]
    pub fn interval(&self) -> RefreshInterval {
        self.interval
    }

    /// Give up the guard without unsubscribing. The registration then lives
    /// as long as the engine.
    pub fn detach(mut self) {
        self.release = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            // Never run callbacks while already unwinding.
            release(!std::thread::panicking());
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("interval", &format_args!("{}", self.interval))
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
