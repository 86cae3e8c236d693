#![forbid(unsafe_code)]

//! Snapshot broadcasting.
//!
//! A tick derives the next snapshot from the factory and, if it changed,
//! fans it out to every distinct callback exactly once.
//!
//! # Re-entrancy
//!
//! Callbacks run with no engine borrow held, over a copy of the callback
//! list taken before the pass, so they may subscribe or unsubscribe freely.
//!
//! - A callback fully unsubscribed mid-pass is skipped for the rest of that
//!   pass, even if it is subscribed again before its turn.
//! - A callback subscribed mid-pass is not notified in that pass.
//! - A tick requested mid-pass (first-time subscribe resync, catch-up) is
//!   deferred and runs once after the pass, so nobody sees two snapshots out
//!   of order.
//!
//! # Failure Modes
//!
//! - **Panicking callback**: not caught. The panic unwinds to whoever
//!   triggered the tick; callbacks later in the pass are not notified. The
//!   snapshot is already stored and the pass marker is cleared by a drop
//!   guard, so the engine stays usable.
//! - **Re-entrant factory**: the factory runs under the engine borrow;
//!   calling back into the engine from it panics (RefCell borrow rules).

use std::cell::RefCell;

use tracing::{debug_span, trace};

use crate::clock::SnapshotFactory;
use crate::engine::EngineState;

/// Why a tick happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    /// The physical timer fired.
    Physical,
    /// First registration at a new interval.
    Resync,
    /// Slow-down found the engine already behind the new period.
    CatchUp,
    /// Explicit [`TimeSync::resync`](crate::TimeSync::resync).
    Manual,
}

impl TickKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::Resync => "resync",
            Self::CatchUp => "catch_up",
            Self::Manual => "manual",
        }
    }
}

/// Latest snapshot plus the factory that advances it.
pub(crate) struct Broadcaster<S> {
    snapshot: S,
    factory: SnapshotFactory<S>,
    in_pass: bool,
    pending: bool,
}

impl<S> Broadcaster<S> {
    pub(crate) fn new(initial: S, factory: SnapshotFactory<S>) -> Self {
        Self {
            snapshot: initial,
            factory,
            in_pass: false,
            pending: false,
        }
    }

    pub(crate) fn snapshot(&self) -> &S {
        &self.snapshot
    }
}

impl<S: Clone + PartialEq> Broadcaster<S> {
    /// Derive the next snapshot. `None` when it equals the current one.
    fn advance(&mut self) -> Option<S> {
        let next = (self.factory)(&self.snapshot);
        if next == self.snapshot {
            return None;
        }
        self.snapshot = next;
        Some(self.snapshot.clone())
    }
}

/// Clears the pass marker even when a callback unwinds.
struct PassGuard<'a, S> {
    state: &'a RefCell<EngineState<S>>,
}

impl<S> Drop for PassGuard<'_, S> {
    fn drop(&mut self) {
        if let Ok(mut st) = self.state.try_borrow_mut() {
            st.broadcaster.in_pass = false;
        }
    }
}

/// Produce one tick and deliver it, plus any ticks deferred meanwhile.
///
/// Must be called with no borrow of `state` held.
pub(crate) fn run_tick<S: Clone + PartialEq + 'static>(
    state: &RefCell<EngineState<S>>,
    kind: TickKind,
) {
    {
        let mut st = state.borrow_mut();
        if st.broadcaster.in_pass {
            st.broadcaster.pending = true;
            st.stats.deferred_ticks += 1;
            trace!(kind = kind.as_str(), "tick deferred until current pass ends");
            return;
        }
        st.broadcaster.pending = false;
        match kind {
            TickKind::Physical => st.stats.physical_ticks += 1,
            _ => st.stats.forced_ticks += 1,
        }
    }

    loop {
        let (snapshot, callbacks) = {
            let mut st = state.borrow_mut();
            let Some(snapshot) = st.broadcaster.advance() else {
                st.stats.skipped_unchanged += 1;
                trace!(kind = kind.as_str(), "snapshot unchanged, broadcast skipped");
                return;
            };
            // Catch-up is measured from the last snapshot actually produced.
            let now = st.now();
            st.reconciler.record_broadcast(now);
            st.stats.broadcasts += 1;
            st.broadcaster.in_pass = true;
            (snapshot, st.registry.callbacks())
        };

        {
            let _guard = PassGuard { state };
            let _span = debug_span!(
                "timesync_broadcast",
                kind = kind.as_str(),
                subscribers = callbacks.len()
            )
            .entered();
            for (seq, callback) in &callbacks {
                {
                    let mut st = state.borrow_mut();
                    if st.registry.seq_of(callback.key()) != Some(*seq) {
                        trace!("subscriber removed mid-pass, skipped");
                        continue;
                    }
                    st.stats.deliveries += 1;
                }
                callback.call(&snapshot);
            }
        }

        let again = std::mem::take(&mut state.borrow_mut().broadcaster.pending);
        if !again {
            return;
        }
        trace!("running deferred tick");
    }
}
