#![forbid(unsafe_code)]

//! Tagged delivery log.

use std::cell::RefCell;
use std::rc::Rc;

use timesync::UpdateCallback;

use crate::clock::ManualClock;

/// One callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<S> {
    pub tag: &'static str,
    pub snapshot: S,
    /// Virtual milliseconds at delivery.
    pub at_ms: u64,
}

/// Shared log of deliveries across tagged callbacks.
#[derive(Debug, Clone)]
pub struct TickRecorder<S> {
    clock: ManualClock,
    log: Rc<RefCell<Vec<Delivery<S>>>>,
}

impl<S: Clone + 'static> TickRecorder<S> {
    #[must_use]
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// A new callback that logs under `tag`. Each call returns a distinct
    /// callback identity.
    #[must_use]
    pub fn callback(&self, tag: &'static str) -> UpdateCallback<S> {
        let clock = self.clock.clone();
        let log = Rc::clone(&self.log);
        UpdateCallback::new(move |snapshot: &S| {
            log.borrow_mut().push(Delivery {
                tag,
                snapshot: snapshot.clone(),
                at_ms: clock.elapsed_ms(),
            });
        })
    }

    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery<S>> {
        self.log.borrow().clone()
    }

    /// Delivery times for `tag`, in order.
    #[must_use]
    pub fn times(&self, tag: &str) -> Vec<u64> {
        self.log
            .borrow()
            .iter()
            .filter(|d| d.tag == tag)
            .map(|d| d.at_ms)
            .collect()
    }

    #[must_use]
    pub fn count(&self, tag: &str) -> usize {
        self.log.borrow().iter().filter(|d| d.tag == tag).count()
    }

    /// Largest gap between consecutive deliveries to `tag`, measured from
    /// `from_ms` to the first delivery and up to `until_ms` after the last.
    #[must_use]
    pub fn max_gap(&self, tag: &str, from_ms: u64, until_ms: u64) -> u64 {
        let mut prev = from_ms;
        let mut worst = 0;
        for t in self.times(tag) {
            worst = worst.max(t.saturating_sub(prev));
            prev = t;
        }
        worst.max(until_ms.saturating_sub(prev))
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_tag_snapshot_and_time() {
        let clock = ManualClock::new();
        let rec: TickRecorder<u64> = TickRecorder::new(&clock);
        let a = rec.callback("a");
        clock.advance_ms(10);
        let engine = timesync::TimeSync::new(0u64, |p: &u64| p + 1);
        let _sub = engine.subscribe(100, &a).unwrap();
        assert_eq!(
            rec.deliveries(),
            vec![Delivery {
                tag: "a",
                snapshot: 1,
                at_ms: 10
            }]
        );
        assert_eq!(rec.count("a"), 1);
        assert_eq!(rec.count("b"), 0);
    }

    #[test]
    fn max_gap_covers_edges() {
        let clock = ManualClock::new();
        let rec: TickRecorder<u64> = TickRecorder::new(&clock);
        rec.log.borrow_mut().extend([
            Delivery { tag: "a", snapshot: 0, at_ms: 100 },
            Delivery { tag: "a", snapshot: 0, at_ms: 400 },
        ]);
        assert_eq!(rec.max_gap("a", 0, 450), 300);
        assert_eq!(rec.max_gap("a", 0, 1000), 600);
        rec.clear();
        assert_eq!(rec.max_gap("a", 0, 50), 50);
    }
}
