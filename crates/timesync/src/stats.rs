#![forbid(unsafe_code)]

//! Engine counters.

/// Cumulative counters for one engine.
///
/// A tick is either physical (timer fired) or forced (subscribe resync,
/// catch-up tick, or [`TimeSync::resync`](crate::TimeSync::resync)). Ticks
/// requested during a broadcast are counted in `deferred_ticks` and
/// coalesce into a single extra pass after it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeSyncStats {
    /// Timer deadlines that fired.
    pub physical_ticks: u64,
    /// Ticks produced outside the timer schedule.
    pub forced_ticks: u64,
    /// Ticks that stored and delivered a new snapshot.
    pub broadcasts: u64,
    /// Ticks whose factory returned an unchanged snapshot.
    pub skipped_unchanged: u64,
    /// Ticks requested during a broadcast and run after it.
    pub deferred_ticks: u64,
    /// Individual callback invocations.
    pub deliveries: u64,
    /// Timer re-arms (including the initial arm).
    pub rearms: u64,
    /// Slow-downs served with a catch-up deadline or immediate tick.
    pub catch_ups: u64,
    /// Transitions to the paused state.
    pub pauses: u64,
}

impl TimeSyncStats {
    /// Ticks that started a pass of their own.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.physical_ticks + self.forced_ticks
    }

    #[must_use]
    pub fn to_jsonl(&self) -> String {
        format!(
            r#"{{"event":"timesync_stats","physical_ticks":{},"forced_ticks":{},"broadcasts":{},"skipped_unchanged":{},"deferred_ticks":{},"deliveries":{},"rearms":{},"catch_ups":{},"pauses":{}}}"#,
            self.physical_ticks,
            self.forced_ticks,
            self.broadcasts,
            self.skipped_unchanged,
            self.deferred_ticks,
            self.deliveries,
            self.rearms,
            self.catch_ups,
            self.pauses,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_round_trips_through_serde_json() {
        let stats = TimeSyncStats {
            physical_ticks: 4,
            forced_ticks: 1,
            broadcasts: 5,
            deliveries: 10,
            ..TimeSyncStats::default()
        };
        let v: serde_json::Value = serde_json::from_str(&stats.to_jsonl()).unwrap();
        assert_eq!(v["event"], "timesync_stats");
        assert_eq!(v["broadcasts"], 5);
        assert_eq!(v["deliveries"], 10);
        assert_eq!(stats.ticks(), 5);
    }
}
