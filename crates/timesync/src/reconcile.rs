#![forbid(unsafe_code)]

//! Interval reconciliation: one physical timer for many cadences.
//!
//! The [`Reconciler`] owns the single [`PhysicalTimer`] and the governing
//! interval it was armed for. It is told about structural registry changes
//! (a tracker created or pruned) and decides how to re-arm.
//!
//! # Decision table
//!
//! | Governing change          | Action                                      |
//! |---------------------------|---------------------------------------------|
//! | unchanged                 | nothing                                     |
//! | -> none                   | disarm, engine paused                       |
//! | -> idle                   | disarm, no cadence                          |
//! | faster (or from none/idle)| re-arm at `now + period`                    |
//! | slower, remainder > 0     | catch-up at `last_broadcast + period`       |
//! | slower, remainder <= 0    | tick now, re-arm at `now + period`          |
//!
//! "Slower" can only happen on removal and "faster" only on addition, since
//! the governing interval is a minimum.
//!
//! # Invariants
//!
//! 1. At most one timer is armed.
//! 2. After a catch-up the gap since the last broadcast never exceeds the
//!    new period.
//! 3. A late [`Reconciler::fire`] produces exactly one tick; missed periods
//!    are coalesced rather than replayed.
//!
//! Elapsed time is always a monotonic [`Instant`] delta from the last tick
//! that produced a new snapshot, never a wall-clock sub-second field. Ticks
//! whose snapshot was unchanged delivered nothing and do not count.

use std::time::Duration;

use web_time::Instant;

use crate::interval::RefreshInterval;

/// What triggered a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReconcileCause {
    /// A tracker was created by a subscription.
    Subscribed,
    /// A tracker was pruned by an unsubscription.
    Unsubscribed,
}

impl ReconcileCause {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

/// What the reconciler did to the physical timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Governing interval unchanged; timer untouched.
    Unchanged,
    /// Timer (re-)armed from now.
    Armed { period: Duration },
    /// Slow-down: one catch-up wait of `delay`, then steady `period`.
    CatchUp { period: Duration, delay: Duration },
    /// Slow-down while already behind: the caller must tick now. The timer
    /// is armed at `now + period`.
    TickNow { period: Duration },
    /// Only idle subscribers remain; no timer is armed.
    Disarmed,
    /// No subscribers remain; no timer is armed.
    Paused,
}

impl ReconcileAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Armed { .. } => "armed",
            Self::CatchUp { .. } => "catch_up",
            Self::TickNow { .. } => "tick_now",
            Self::Disarmed => "disarmed",
            Self::Paused => "paused",
        }
    }
}

/// The one physical repeating timer. Never exposed outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PhysicalTimer {
    pub(crate) period: Duration,
    pub(crate) next_fire: Instant,
    /// When the current steady phase began.
    pub(crate) armed_at: Instant,
}

#[derive(Debug)]
pub(crate) struct Reconciler {
    governing: Option<RefreshInterval>,
    timer: Option<PhysicalTimer>,
    /// Instant of the last tick that stored a new snapshot.
    last_broadcast: Option<Instant>,
}

impl Reconciler {
    pub(crate) fn new() -> Self {
        Self {
            governing: None,
            timer: None,
            last_broadcast: None,
        }
    }

    pub(crate) fn governing(&self) -> Option<RefreshInterval> {
        self.governing
    }

    pub(crate) fn timer(&self) -> Option<PhysicalTimer> {
        self.timer
    }

    pub(crate) fn last_broadcast(&self) -> Option<Instant> {
        self.last_broadcast
    }

    /// Bring the timer in line with `next`, the registry's new minimum.
    pub(crate) fn reconcile(&mut self, next: Option<RefreshInterval>, now: Instant) -> ReconcileAction {
        if next == self.governing {
            return ReconcileAction::Unchanged;
        }
        let previous = std::mem::replace(&mut self.governing, next);

        let Some(interval) = next else {
            self.timer = None;
            return ReconcileAction::Paused;
        };
        let Some(period) = interval.period() else {
            self.timer = None;
            return ReconcileAction::Disarmed;
        };

        let slower = previous.is_some_and(|prev| interval > prev);
        match (slower, self.timer) {
            (true, Some(timer)) => self.slow_down(period, timer.armed_at, now),
            _ => {
                self.arm(period, now);
                ReconcileAction::Armed { period }
            }
        }
    }

    fn slow_down(&mut self, period: Duration, armed_at: Instant, now: Instant) -> ReconcileAction {
        let anchor = self.last_broadcast.unwrap_or(armed_at);
        let elapsed = now.saturating_duration_since(anchor);
        if elapsed >= period {
            self.arm(period, now);
            return ReconcileAction::TickNow { period };
        }
        self.timer = Some(PhysicalTimer {
            period,
            next_fire: anchor + period,
            armed_at,
        });
        ReconcileAction::CatchUp {
            period,
            delay: period - elapsed,
        }
    }

    fn arm(&mut self, period: Duration, now: Instant) {
        self.timer = Some(PhysicalTimer {
            period,
            next_fire: now + period,
            armed_at: now,
        });
    }

    /// Note that a tick at `now` (physical or forced) stored a new snapshot.
    pub(crate) fn record_broadcast(&mut self, now: Instant) {
        self.last_broadcast = Some(now);
    }

    /// Fire the timer if it is due. Returns whether a tick is owed.
    pub(crate) fn fire(&mut self, now: Instant) -> bool {
        let Some(timer) = self.timer.as_mut() else {
            return false;
        };
        if now < timer.next_fire {
            return false;
        }
        let mut next = timer.next_fire + timer.period;
        if next <= now {
            // Host woke up late by more than a period; coalesce.
            next = now + timer.period;
        }
        timer.next_fire = next;
        true
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.next_fire)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU64;

    fn every(ms: u64) -> Option<RefreshInterval> {
        Some(RefreshInterval::Every(NonZeroU64::new(ms).unwrap()))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_subscription_arms() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        assert_eq!(
            r.reconcile(every(500), now),
            ReconcileAction::Armed { period: ms(500) }
        );
        assert_eq!(r.next_deadline(), Some(now + ms(500)));
        assert_eq!(r.reconcile(every(500), now), ReconcileAction::Unchanged);
    }

    #[test]
    fn faster_rearms_from_now() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        r.reconcile(every(1500), now);
        let later = now + ms(700);
        assert_eq!(
            r.reconcile(every(500), later),
            ReconcileAction::Armed { period: ms(500) }
        );
        assert_eq!(r.next_deadline(), Some(later + ms(500)));
    }

    #[test]
    fn slower_schedules_catch_up_for_remainder() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        r.reconcile(every(500), now);
        assert!(r.fire(now + ms(500)));
        r.record_broadcast(now + ms(500));
        r.reconcile(every(1500), now + ms(800));
        // 300ms elapsed since the last tick, 1200ms remain.
        assert_eq!(r.next_deadline(), Some(now + ms(2000)));

        let mut r = Reconciler::new();
        r.reconcile(every(500), now);
        r.fire(now + ms(500));
        r.record_broadcast(now + ms(500));
        assert_eq!(
            r.reconcile(every(1500), now + ms(800)),
            ReconcileAction::CatchUp {
                period: ms(1500),
                delay: ms(1200)
            }
        );
    }

    #[test]
    fn catch_up_then_steady() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        r.reconcile(every(500), now);
        r.fire(now + ms(500));
        r.record_broadcast(now + ms(500));
        r.reconcile(every(1500), now + ms(800));
        assert!(!r.fire(now + ms(1999)));
        assert!(r.fire(now + ms(2000)));
        assert_eq!(r.next_deadline(), Some(now + ms(3500)));
    }

    #[test]
    fn slower_while_behind_ticks_now() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        r.reconcile(every(100), now);
        r.record_broadcast(now);
        // Host never fired the 100ms timer; 250ms elapsed >= 200ms.
        assert_eq!(
            r.reconcile(every(200), now + ms(250)),
            ReconcileAction::TickNow { period: ms(200) }
        );
        assert_eq!(r.next_deadline(), Some(now + ms(450)));
    }

    #[test]
    fn slower_without_prior_tick_measures_from_arm() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        r.reconcile(every(100), now);
        assert_eq!(
            r.reconcile(every(300), now + ms(50)),
            ReconcileAction::CatchUp {
                period: ms(300),
                delay: ms(250)
            }
        );
        assert_eq!(r.next_deadline(), Some(now + ms(300)));
    }

    #[test]
    fn idle_disarms_and_none_pauses() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        r.reconcile(every(100), now);
        assert_eq!(
            r.reconcile(Some(RefreshInterval::Idle), now),
            ReconcileAction::Disarmed
        );
        assert_eq!(r.next_deadline(), None);
        assert!(!r.fire(now + ms(10_000)));
        assert_eq!(r.reconcile(None, now), ReconcileAction::Paused);
        assert_eq!(r.governing(), None);
    }

    #[test]
    fn idle_to_finite_arms_fresh() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        r.reconcile(Some(RefreshInterval::Idle), now);
        assert_eq!(
            r.reconcile(every(250), now + ms(10)),
            ReconcileAction::Armed { period: ms(250) }
        );
    }

    #[test]
    fn late_fire_coalesces() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        r.reconcile(every(100), now);
        assert!(r.fire(now + ms(1050)));
        assert_eq!(r.next_deadline(), Some(now + ms(1150)));
        assert!(!r.fire(now + ms(1050)));
    }

    #[test]
    fn on_time_fire_is_drift_free() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        r.reconcile(every(100), now);
        assert!(r.fire(now + ms(130)));
        assert_eq!(r.next_deadline(), Some(now + ms(200)));
        // Firing alone produces no snapshot.
        assert_eq!(r.last_broadcast(), None);
    }

    #[test]
    fn catch_up_anchors_on_last_broadcast_not_last_fire() {
        let now = Instant::now();
        let mut r = Reconciler::new();
        r.reconcile(every(100), now);
        for n in 1..=19 {
            assert!(r.fire(now + ms(n * 100)));
            // Coarse snapshots: only the tick at 1000ms changed anything.
            if n == 10 {
                r.record_broadcast(now + ms(1000));
            }
        }
        assert_eq!(
            r.reconcile(every(1500), now + ms(1950)),
            ReconcileAction::CatchUp {
                period: ms(1500),
                delay: ms(550)
            }
        );
        assert_eq!(r.next_deadline(), Some(now + ms(2500)));
    }
}
