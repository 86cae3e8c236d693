//! Property-based invariant tests for subscription churn.
//!
//! Random sequences of subscribe / unsubscribe / advance operations are
//! replayed against a virtual clock and checked after every step:
//!
//! 1. The governing interval is the minimum over live registrations.
//! 2. The armed timer period equals the governing interval (none when
//!    paused or idle-only).
//! 3. With resync on subscribe, the next deadline is never more than one
//!    governing period after the last broadcast.
//! 4. Physical ticks are strictly increasing in time (no double fire).
//! 5. Every callback sees strictly increasing snapshots (no duplicate or
//!    out-of-order delivery, at most one delivery per tick).
//! 6. Per-pair registration counts and distinct-subscriber counts match a
//!    reference model.

use std::time::Duration;

use proptest::prelude::*;
use timesync::{RefreshInterval, Subscription, TimeSyncConfig, TimeSource, UpdateCallback};
use timesync_harness::{ManualClock, TickRecorder, advance_by, virtual_engine};

const INTERVALS: [Option<u64>; 5] = [Some(100), Some(250), Some(500), Some(1500), None];
const TAGS: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Debug, Clone)]
enum Op {
    Subscribe { interval: usize, callback: usize },
    Unsubscribe { index: usize },
    Advance { ms: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..INTERVALS.len(), 0..TAGS.len())
            .prop_map(|(interval, callback)| Op::Subscribe { interval, callback }),
        2 => any::<usize>().prop_map(|index| Op::Unsubscribe { index }),
        3 => (1u64..=2000).prop_map(|ms| Op::Advance { ms }),
    ]
}

fn interval_at(idx: usize) -> RefreshInterval {
    match INTERVALS[idx] {
        Some(ms) => RefreshInterval::from_millis(ms).unwrap(),
        None => RefreshInterval::Idle,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn churn_preserves_schedule_invariants(
        ops in proptest::collection::vec(op_strategy(), 1..60),
        resync in any::<bool>(),
    ) {
        let clock = ManualClock::new();
        let engine = virtual_engine(
            &clock,
            TimeSyncConfig::default().with_resync_on_new_subscription(resync),
        );
        let rec: TickRecorder<u64> = TickRecorder::new(&clock);
        let callbacks: Vec<UpdateCallback<u64>> = TAGS.iter().map(|t| rec.callback(t)).collect();
        let mut live: Vec<(usize, RefreshInterval, Subscription)> = Vec::new();
        let mut physical: Vec<u64> = Vec::new();

        for op in ops {
            match op {
                Op::Subscribe { interval, callback } => {
                    let iv = interval_at(interval);
                    let sub = engine.subscribe(iv, &callbacks[callback]).unwrap();
                    live.push((callback, iv, sub));
                }
                Op::Unsubscribe { index } => {
                    if !live.is_empty() {
                        let (_, _, mut sub) = live.remove(index % live.len());
                        sub.unsubscribe();
                    }
                }
                Op::Advance { ms } => {
                    physical.extend(advance_by(&engine, &clock, Duration::from_millis(ms)));
                }
            }

            // 1. Governing interval is the model minimum.
            let model_min = live.iter().map(|(_, iv, _)| *iv).min();
            prop_assert_eq!(engine.governing_interval(), model_min);
            prop_assert_eq!(engine.is_paused(), live.is_empty());

            // 2. Timer period tracks the governing interval.
            prop_assert_eq!(engine.timer_period(), model_min.and_then(RefreshInterval::period));

            // 3. No gap longer than the governing period.
            if let (Some(period), Some(deadline)) = (engine.timer_period(), engine.next_deadline()) {
                prop_assert!(deadline > clock.now());
                if resync {
                    // Before the first new snapshot, the initial one counts.
                    let last = engine.last_broadcast().unwrap_or_else(|| clock.start());
                    prop_assert!(deadline <= last + period);
                }
            }

            // 6. Counts match the model.
            for (cb_idx, cb) in callbacks.iter().enumerate() {
                for iv_idx in 0..INTERVALS.len() {
                    let iv = interval_at(iv_idx);
                    let expected = live
                        .iter()
                        .filter(|(c, i, _)| *c == cb_idx && *i == iv)
                        .count();
                    prop_assert_eq!(engine.registrations_of(iv, cb), expected);
                }
            }
            let mut distinct: Vec<usize> = live.iter().map(|(c, _, _)| *c).collect();
            distinct.sort_unstable();
            distinct.dedup();
            prop_assert_eq!(engine.subscriber_count(), distinct.len());
        }

        // 4. Physical ticks strictly increase.
        prop_assert!(physical.windows(2).all(|w| w[0] < w[1]), "ticks: {:?}", physical);

        // 5. Per-callback snapshots strictly increase.
        for tag in TAGS {
            let seen: Vec<u64> = rec
                .deliveries()
                .into_iter()
                .filter(|d| d.tag == tag)
                .map(|d| d.snapshot)
                .collect();
            prop_assert!(seen.windows(2).all(|w| w[0] < w[1]), "{}: {:?}", tag, seen);
        }

        // Releasing everything pauses.
        drop(live);
        prop_assert!(engine.is_paused());
        prop_assert_eq!(engine.next_deadline(), None);
    }
}
