#![forbid(unsafe_code)]

//! Refresh intervals requested by subscribers.
//!
//! A [`RefreshInterval`] is either a positive whole number of milliseconds or
//! [`RefreshInterval::Idle`], the "no cadence of my own" sentinel. `Idle`
//! sorts after every finite interval, so the governing interval is always the
//! plain minimum over active trackers.
//!
//! Raw values arrive through [`IntoRefreshInterval`], which is where
//! validation happens. Rejection is synchronous and never touches engine
//! state.

use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;

use crate::error::{IntervalRejection, TimeSyncError};

/// How often a subscriber wants a fresh snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RefreshInterval {
    /// Refresh at least every `n` milliseconds.
    Every(NonZeroU64),
    /// No independent cadence; piggyback on the busiest subscriber.
    Idle,
}

impl RefreshInterval {
    /// Largest accepted finite interval (2^53 - 1 ms, the exact-integer range
    /// of an `f64`).
    pub const MAX_MILLIS: u64 = (1 << 53) - 1;

    /// Validate a millisecond count.
    pub fn from_millis(millis: u64) -> Result<Self, TimeSyncError> {
        if millis > Self::MAX_MILLIS {
            return Err(TimeSyncError::invalid_interval(
                millis,
                IntervalRejection::TooLarge,
            ));
        }
        NonZeroU64::new(millis)
            .map(Self::Every)
            .ok_or_else(|| TimeSyncError::invalid_interval(millis, IntervalRejection::NotPositive))
    }

    /// The period as a [`Duration`], or `None` for [`RefreshInterval::Idle`].
    #[must_use]
    pub fn period(self) -> Option<Duration> {
        match self {
            Self::Every(ms) => Some(Duration::from_millis(ms.get())),
            Self::Idle => None,
        }
    }

    /// Millisecond count, or `None` for [`RefreshInterval::Idle`].
    #[must_use]
    pub fn as_millis(self) -> Option<u64> {
        match self {
            Self::Every(ms) => Some(ms.get()),
            Self::Idle => None,
        }
    }

    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(ms) => write!(f, "{ms}ms"),
            Self::Idle => f.write_str("idle"),
        }
    }
}

/// Conversion of caller-supplied values into a validated [`RefreshInterval`].
pub trait IntoRefreshInterval {
    fn into_refresh_interval(self) -> Result<RefreshInterval, TimeSyncError>;
}

impl IntoRefreshInterval for RefreshInterval {
    fn into_refresh_interval(self) -> Result<RefreshInterval, TimeSyncError> {
        Ok(self)
    }
}

impl IntoRefreshInterval for u64 {
    fn into_refresh_interval(self) -> Result<RefreshInterval, TimeSyncError> {
        RefreshInterval::from_millis(self)
    }
}

impl IntoRefreshInterval for u32 {
    fn into_refresh_interval(self) -> Result<RefreshInterval, TimeSyncError> {
        RefreshInterval::from_millis(u64::from(self))
    }
}

impl IntoRefreshInterval for i64 {
    fn into_refresh_interval(self) -> Result<RefreshInterval, TimeSyncError> {
        match u64::try_from(self) {
            Ok(ms) => RefreshInterval::from_millis(ms),
            Err(_) => Err(TimeSyncError::invalid_interval(
                self,
                IntervalRejection::NotPositive,
            )),
        }
    }
}

impl IntoRefreshInterval for i32 {
    fn into_refresh_interval(self) -> Result<RefreshInterval, TimeSyncError> {
        i64::from(self).into_refresh_interval()
    }
}

impl IntoRefreshInterval for f64 {
    fn into_refresh_interval(self) -> Result<RefreshInterval, TimeSyncError> {
        if self == f64::INFINITY {
            return Ok(RefreshInterval::Idle);
        }
        let rejection = if self.is_nan() {
            IntervalRejection::NotANumber
        } else if self <= 0.0 {
            IntervalRejection::NotPositive
        } else if self.fract() != 0.0 {
            IntervalRejection::NotAnInteger
        } else if self > RefreshInterval::MAX_MILLIS as f64 {
            IntervalRejection::TooLarge
        } else {
            return RefreshInterval::from_millis(self as u64);
        };
        Err(TimeSyncError::invalid_interval(self, rejection))
    }
}

impl IntoRefreshInterval for Duration {
    /// Durations must be a whole, non-zero number of milliseconds.
    fn into_refresh_interval(self) -> Result<RefreshInterval, TimeSyncError> {
        if self.subsec_nanos() % 1_000_000 != 0 {
            return Err(TimeSyncError::invalid_interval(
                format_args!("{self:?}"),
                IntervalRejection::NotAnInteger,
            ));
        }
        let millis = u64::try_from(self.as_millis()).unwrap_or(u64::MAX);
        RefreshInterval::from_millis(millis)
    }
}
