//! Live inverter readings and the short history kept of them.

use std::collections::VecDeque;

use chrono::{NaiveDateTime, Timelike};

/// Number of samples retained.
pub const HISTORY_LEN: usize = 5;
/// Minimum minutes between polls of the inverter.
pub const POLL_INTERVAL_MINUTES: u32 = 5;
/// A reading older than this many minutes is considered stale.
pub const STALE_AFTER_MINUTES: u32 = 7;

/// One inverter status reading.
///
/// Power flows use the inverter's signs: `grid_w` positive for import,
/// `battery_w` positive for discharge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub time: NaiveDateTime,
    pub soc_pct: f32,
    pub pv_w: f32,
    pub consumption_w: f32,
    pub grid_w: f32,
    pub battery_w: f32,
}

impl TelemetrySample {
    pub fn minute_of_day(&self) -> u32 {
        self.time.hour() * 60 + self.time.minute()
    }

    /// Consumption minus generation (W); positive means the house needs
    /// more than the panels supply.
    pub fn net_usage_w(&self) -> f32 {
        self.consumption_w - self.pv_w
    }
}

/// Fixed-capacity history of the most recent samples, newest first.
///
/// The first sample fills every slot so that comparisons between consecutive
/// samples are meaningful from the start.
#[derive(Debug, Clone)]
pub struct TelemetryHistory {
    samples: VecDeque<TelemetrySample>,
    poll_interval: u32,
}

impl Default for TelemetryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryHistory {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(HISTORY_LEN),
            poll_interval: POLL_INTERVAL_MINUTES,
        }
    }

    /// Sets the minimum gap between polls, never below
    /// [`POLL_INTERVAL_MINUTES`].
    pub fn with_poll_interval(mut self, minutes: u32) -> Self {
        self.poll_interval = minutes.max(POLL_INTERVAL_MINUTES);
        self
    }

    /// Records `sample`, overwriting the oldest entry once full.
    pub fn push(&mut self, sample: TelemetrySample) {
        if self.samples.is_empty() {
            self.samples.extend(std::iter::repeat_n(sample, HISTORY_LEN));
            return;
        }
        if self.samples.len() == HISTORY_LEN {
            self.samples.pop_back();
        }
        self.samples.push_front(sample);
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.front()
    }

    pub fn previous(&self) -> Option<&TelemetrySample> {
        self.samples.get(1)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter()
    }

    /// Whether the inverter should be polled at minute `now`.
    ///
    /// True with no history, once the poll interval has elapsed, or when the
    /// day has rolled over since the last reading.
    pub fn should_poll(&self, now: u32) -> bool {
        match self.latest() {
            None => true,
            Some(s) => {
                let read = s.minute_of_day();
                now > read + self.poll_interval || now < read
            }
        }
    }

    /// Whether the newest reading is too old to trust at minute `now`.
    pub fn is_stale(&self, now: u32) -> bool {
        self.latest()
            .is_some_and(|s| now > s.minute_of_day() + STALE_AFTER_MINUTES)
    }
}
