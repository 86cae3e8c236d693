#![forbid(unsafe_code)]

//! Subscription registry: reference-counted callbacks per distinct interval.
//!
//! # Layout
//!
//! - One [`Tracker`] per distinct active [`RefreshInterval`], kept sorted
//!   ascending, holding `callback -> count`. The governing interval is the
//!   first tracker's interval.
//! - One subscriber entry per distinct callback, ordered by first
//!   registration. This is the notification list; a callback registered at
//!   several intervals appears once.
//!
//! # Invariants
//!
//! 1. No tracker is ever empty once a mutation returns.
//! 2. A subscriber's `registrations` equals the sum of its counts across all
//!    trackers, and the entry exists iff that sum is non-zero.
//! 3. Trackers are strictly ascending by interval.
//!
//! The registry is pure bookkeeping. It never calls callbacks and never
//! touches the timer; structural changes are reported back to the engine.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::interval::RefreshInterval;

/// A subscriber callback with identity.
///
/// Two `UpdateCallback`s are the same callback iff they are clones of one
/// another. Register the same clone twice to hold two references to one
/// notification path.
pub struct UpdateCallback<S> {
    inner: Rc<dyn Fn(&S)>,
}

impl<S> UpdateCallback<S> {
    pub fn new(callback: impl Fn(&S) + 'static) -> Self {
        Self {
            inner: Rc::new(callback),
        }
    }

    /// Whether `self` and `other` share the same allocation.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.key() == other.key()
    }

    pub(crate) fn key(&self) -> CallbackKey {
        CallbackKey(Rc::as_ptr(&self.inner).cast::<()>() as usize)
    }

    pub(crate) fn call(&self, snapshot: &S) {
        (self.inner)(snapshot);
    }
}

// Manual Clone: shares the same Rc.
impl<S> Clone for UpdateCallback<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for UpdateCallback<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UpdateCallback").field(&self.key().0).finish()
    }
}

/// Identity of a registered callback (address of its shared allocation).
///
/// Stable for as long as the registry holds a clone of the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CallbackKey(usize);

#[derive(Debug)]
struct Tracker {
    interval: RefreshInterval,
    counts: HashMap<CallbackKey, usize>,
}

struct Subscriber<S> {
    /// Position in notification order.
    seq: u64,
    registrations: usize,
    callback: UpdateCallback<S>,
}

/// Outcome of [`Registry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Added {
    /// First registration at this interval: a tracker was created.
    NewTracker,
    /// The interval already had a tracker.
    Existing,
}

/// Outcome of [`Registry::remove`].
pub(crate) enum Removed<S> {
    /// Nothing registered for this `(interval, callback)` pair.
    NotFound,
    /// Count decremented; the interval set is unchanged.
    Decremented {
        /// The callback's last registration anywhere was dropped. The
        /// caller must drop this outside any engine borrow.
        released: Option<UpdateCallback<S>>,
    },
    /// The tracker emptied and was pruned.
    TrackerPruned {
        released: Option<UpdateCallback<S>>,
    },
}

impl<S> Removed<S> {
    pub(crate) fn is_structural(&self) -> bool {
        matches!(self, Self::TrackerPruned { .. })
    }

    pub(crate) fn into_released(self) -> Option<UpdateCallback<S>> {
        match self {
            Self::NotFound => None,
            Self::Decremented { released } | Self::TrackerPruned { released } => released,
        }
    }
}

pub(crate) struct Registry<S> {
    trackers: Vec<Tracker>,
    subscribers: HashMap<CallbackKey, Subscriber<S>>,
    order: BTreeMap<u64, CallbackKey>,
    next_seq: u64,
}

impl<S> Registry<S> {
    pub(crate) fn new() -> Self {
        Self {
            trackers: Vec::new(),
            subscribers: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Register `callback` at `interval`, incrementing its count.
    pub(crate) fn add(&mut self, interval: RefreshInterval, callback: &UpdateCallback<S>) -> Added {
        let key = callback.key();
        let added = match self.tracker_index(interval) {
            Ok(idx) => {
                *self.trackers[idx].counts.entry(key).or_insert(0) += 1;
                Added::Existing
            }
            Err(idx) => {
                let mut counts = HashMap::new();
                counts.insert(key, 1);
                self.trackers.insert(idx, Tracker { interval, counts });
                Added::NewTracker
            }
        };

        match self.subscribers.get_mut(&key) {
            Some(sub) => sub.registrations += 1,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.order.insert(seq, key);
                self.subscribers.insert(
                    key,
                    Subscriber {
                        seq,
                        registrations: 1,
                        callback: callback.clone(),
                    },
                );
            }
        }
        added
    }

    /// Drop one registration of `key` at `interval`.
    pub(crate) fn remove(&mut self, interval: RefreshInterval, key: CallbackKey) -> Removed<S> {
        let Ok(idx) = self.tracker_index(interval) else {
            return Removed::NotFound;
        };
        let tracker = &mut self.trackers[idx];
        let Some(count) = tracker.counts.get_mut(&key) else {
            return Removed::NotFound;
        };
        *count -= 1;
        if *count == 0 {
            tracker.counts.remove(&key);
        }
        let pruned = tracker.counts.is_empty();
        if pruned {
            self.trackers.remove(idx);
        }

        let released = self.release_one(key);
        if pruned {
            Removed::TrackerPruned { released }
        } else {
            Removed::Decremented { released }
        }
    }

    fn release_one(&mut self, key: CallbackKey) -> Option<UpdateCallback<S>> {
        let sub = self.subscribers.get_mut(&key)?;
        sub.registrations -= 1;
        if sub.registrations > 0 {
            return None;
        }
        let sub = self.subscribers.remove(&key)?;
        self.order.remove(&sub.seq);
        Some(sub.callback)
    }

    fn tracker_index(&self, interval: RefreshInterval) -> Result<usize, usize> {
        self.trackers
            .binary_search_by(|t| t.interval.cmp(&interval))
    }

    /// Minimum interval across trackers, `None` when nothing is registered.
    pub(crate) fn governing(&self) -> Option<RefreshInterval> {
        self.trackers.first().map(|t| t.interval)
    }

    /// Distinct callbacks in first-registration order, each with its
    /// subscriber sequence number, cloned so the caller can iterate while
    /// the registry is mutated.
    pub(crate) fn callbacks(&self) -> Vec<(u64, UpdateCallback<S>)> {
        self.order
            .iter()
            .filter_map(|(seq, key)| {
                self.subscribers
                    .get(key)
                    .map(|sub| (*seq, sub.callback.clone()))
            })
            .collect()
    }

    /// Sequence number of the live subscriber entry for `key`.
    ///
    /// A callback that is fully removed and registered again gets a new
    /// number, so a stale copy of the notification list can tell the two
    /// entries apart.
    pub(crate) fn seq_of(&self, key: CallbackKey) -> Option<u64> {
        self.subscribers.get(&key).map(|sub| sub.seq)
    }

    /// Number of distinct callbacks.
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of registrations across all intervals, counting duplicates.
    pub(crate) fn registration_count(&self) -> usize {
        self.subscribers.values().map(|s| s.registrations).sum()
    }

    pub(crate) fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    /// Active intervals, ascending.
    pub(crate) fn intervals(&self) -> Vec<RefreshInterval> {
        self.trackers.iter().map(|t| t.interval).collect()
    }

    /// Registration count of one `(interval, callback)` pair.
    pub(crate) fn count_of(&self, interval: RefreshInterval, key: CallbackKey) -> usize {
        self.tracker_index(interval)
            .ok()
            .and_then(|idx| self.trackers[idx].counts.get(&key).copied())
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
