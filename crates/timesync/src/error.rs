#![forbid(unsafe_code)]

//! Errors surfaced by the time-sync engine.

use std::fmt;

/// Why a refresh interval was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalRejection {
    /// Zero, negative, or negative infinity.
    NotPositive,
    /// Has a fractional millisecond component.
    NotAnInteger,
    /// NaN.
    NotANumber,
    /// Exceeds [`RefreshInterval::MAX_MILLIS`](crate::RefreshInterval::MAX_MILLIS).
    TooLarge,
}

impl IntervalRejection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotPositive => "must be positive",
            Self::NotAnInteger => "must be a whole number of milliseconds",
            Self::NotANumber => "must be a number",
            Self::TooLarge => "exceeds the largest supported interval",
        }
    }
}

/// Errors from time-sync operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSyncError {
    /// A subscription asked for an interval that is neither a positive
    /// integer nor the idle sentinel. No state was changed.
    InvalidInterval {
        value: String,
        reason: IntervalRejection,
    },
}

impl TimeSyncError {
    pub(crate) fn invalid_interval(value: impl fmt::Display, reason: IntervalRejection) -> Self {
        Self::InvalidInterval {
            value: value.to_string(),
            reason,
        }
    }
}

impl fmt::Display for TimeSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval { value, reason } => {
                write!(f, "invalid refresh interval {value}: {}", reason.as_str())
            }
        }
    }
}

impl std::error::Error for TimeSyncError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_value_and_reason() {
        let err = TimeSyncError::invalid_interval(-5, IntervalRejection::NotPositive);
        assert_eq!(err.to_string(), "invalid refresh interval -5: must be positive");
    }

    #[test]
    fn is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(TimeSyncError::invalid_interval(
            1.5,
            IntervalRejection::NotAnInteger,
        ));
        assert!(err.to_string().contains("whole number"));
    }
}
