//! Time-of-day snapshots and the minute clock used for accelerated runs.

use chrono::{Datelike, NaiveDateTime, TimeDelta, Timelike};

/// Minutes in one day; minute-of-day values are always `< MINUTES_PER_DAY`.
pub const MINUTES_PER_DAY: u32 = 1440;

/// Seasonal classification of a calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    /// Consumption outstrips generation; overnight charging is always 100 %.
    Winter,
    /// Heating loads vary; planning keeps a higher floor.
    Shoulder,
    Normal,
}

/// Immutable view of "now" handed to every planning and balancing call.
///
/// # Examples
///
/// ```
/// use palm::clock::{ClockSnapshot, Season};
///
/// let clock = ClockSnapshot::new(8 * 60 + 15, 11, &[1, 2, 11, 12], &[3, 4, 9, 10]);
/// assert_eq!(clock.season(), Season::Winter);
/// assert_eq!(clock.now_minutes, 495);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSnapshot {
    /// Minutes since local midnight.
    pub now_minutes: u32,
    /// Calendar month, 1-12.
    pub month: u32,
    pub is_winter: bool,
    pub is_shoulder: bool,
}

impl ClockSnapshot {
    /// Builds a snapshot, classifying `month` against the configured month sets.
    pub fn new(now_minutes: u32, month: u32, winter: &[u32], shoulder: &[u32]) -> Self {
        Self {
            now_minutes: now_minutes % MINUTES_PER_DAY,
            month,
            is_winter: winter.contains(&month),
            is_shoulder: shoulder.contains(&month),
        }
    }

    /// Builds a snapshot from a local date-time.
    pub fn at(at: NaiveDateTime, winter: &[u32], shoulder: &[u32]) -> Self {
        Self::new(at.hour() * 60 + at.minute(), at.month(), winter, shoulder)
    }

    /// Winter takes precedence if a month is listed in both sets.
    pub fn season(&self) -> Season {
        if self.is_winter {
            Season::Winter
        } else if self.is_shoulder {
            Season::Shoulder
        } else {
            Season::Normal
        }
    }

    pub fn is_midnight(&self) -> bool {
        self.now_minutes == 0
    }
}

/// Parses `HH:MM` (or `HH:MM:SS`, seconds ignored) into minutes after midnight.
pub fn parse_hhmm(s: &str) -> Option<u32> {
    let mut parts = s.trim().split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    if let Some(seconds) = parts.next() {
        seconds.parse::<u32>().ok().filter(|s| *s < 60)?;
    }
    if parts.next().is_some() || hours >= 24 || minutes >= 60 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Formats minutes after midnight as `HH:MM`, wrapping past midnight.
pub fn format_hhmm(minutes: u32) -> String {
    let m = minutes % MINUTES_PER_DAY;
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// A clock that advances one minute per tick for a fixed number of ticks.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use palm::clock::Clock;
///
/// let start = NaiveDate::from_ymd_opt(2024, 6, 1)
///     .and_then(|d| d.and_hms_opt(23, 59, 0))
///     .unwrap();
/// let mut clock = Clock::new(start, 2);
/// assert_eq!(clock.tick(), Some(start));
/// assert!(clock.tick().is_some());
/// assert_eq!(clock.tick(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Clock {
    /// Time returned by the next tick.
    current: NaiveDateTime,
    /// Ticks left before the clock completes.
    remaining: usize,
}

impl Clock {
    /// Creates a clock starting at `start` that yields `total` minutes.
    pub fn new(start: NaiveDateTime, total: usize) -> Self {
        Self {
            current: start,
            remaining: total,
        }
    }

    /// Returns the current minute and advances by one, or `None` once done.
    pub fn tick(&mut self) -> Option<NaiveDateTime> {
        if self.remaining == 0 {
            return None;
        }
        let now = self.current;
        self.current += TimeDelta::minutes(1);
        self.remaining -= 1;
        Some(now)
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}
