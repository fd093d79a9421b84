//! Daily time windows.
//!
//! A window is a pair of times of day. Windows whose start is later than
//! their end wrap around midnight (e.g. 22:00-02:00).

use std::fmt;
use std::str::FromStr;

use chrono::NaiveTime;
use chrono::Timelike;
use thiserror::Error;

/// Time elapsed since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    /// Midnight.
    pub const MIDNIGHT: Self = Self(NaiveTime::MIN);

    /// Build a time of day from hours, minutes and seconds.
    ///
    /// Returns `None` when any component is out of range.
    pub fn from_hms(hour: u32, minute: u32, second: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, second).map(Self)
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(time: NaiveTime) -> Self {
        Self(time)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.second() == 0 {
            write!(f, "{}", self.0.format("%H:%M"))
        } else {
            write!(f, "{}", self.0.format("%H:%M:%S"))
        }
    }
}

/// Error returned when a time of day cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid time of day '{0}', expected HH:MM or HH:MM:SS")]
pub struct TimeParseError(String);

impl FromStr for TimeOfDay {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
            .map(Self)
            .map_err(|_| TimeParseError(s.to_string()))
    }
}

/// Daily recurring interval during which scheduled mode is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Window {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    /// Check whether `now` falls inside this window.
    pub fn contains(&self, now: TimeOfDay) -> bool {
        in_window(now, self.start, self.end)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Decide whether `now` lies within `[start, end]`, both ends inclusive.
///
/// When `start > end` the window spans midnight and `now` matches if it is
/// at or after `start`, or at or before `end`.
#[must_use]
pub fn in_window(now: TimeOfDay, start: TimeOfDay, end: TimeOfDay) -> bool {
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}
