//! Daily schedule windows for controllable loads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{format_hhmm, parse_hhmm};
use crate::env::EnvironmentalSnapshot;

/// A schedule bound: a fixed time or a sun-relative keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeSpec {
    At(u32),
    Sunrise,
    Sunset,
    VirtualSunrise,
    VirtualSunset,
}

impl TimeSpec {
    /// Minute of day this bound currently refers to.
    pub fn resolve(&self, env: &EnvironmentalSnapshot) -> u32 {
        match self {
            TimeSpec::At(m) => *m,
            TimeSpec::Sunrise => env.sunrise,
            TimeSpec::Sunset => env.sunset,
            TimeSpec::VirtualSunrise => env.virtual_sunrise,
            TimeSpec::VirtualSunset => env.virtual_sunset,
        }
    }
}

impl TryFrom<String> for TimeSpec {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim() {
            "Sunrise" => Ok(TimeSpec::Sunrise),
            "Sunset" => Ok(TimeSpec::Sunset),
            "VSunrise" => Ok(TimeSpec::VirtualSunrise),
            "VSunset" => Ok(TimeSpec::VirtualSunset),
            other => parse_hhmm(other)
                .map(TimeSpec::At)
                .ok_or_else(|| format!("expected HH:MM or a sun keyword, got \"{other}\"")),
        }
    }
}

impl From<TimeSpec> for String {
    fn from(value: TimeSpec) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSpec::At(m) => f.write_str(&format_hhmm(*m)),
            TimeSpec::Sunrise => f.write_str("Sunrise"),
            TimeSpec::Sunset => f.write_str("Sunset"),
            TimeSpec::VirtualSunrise => f.write_str("VSunrise"),
            TimeSpec::VirtualSunset => f.write_str("VSunset"),
        }
    }
}

/// Concrete schedule bounds in minutes after midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub early_start: u32,
    pub late_start: u32,
    pub finish: u32,
}

impl ResolvedWindow {
    pub fn resolve(
        early_start: &TimeSpec,
        late_start: &TimeSpec,
        finish: &TimeSpec,
        env: &EnvironmentalSnapshot,
    ) -> Self {
        Self {
            early_start: early_start.resolve(env),
            late_start: late_start.resolve(env),
            finish: finish.resolve(env),
        }
    }

    /// Whether `now` lies in `[early_start, finish)`, wrapping past midnight
    /// when the finish precedes the start.
    ///
    /// # Examples
    ///
    /// ```
    /// use palm::loads::schedule::ResolvedWindow;
    ///
    /// let overnight = ResolvedWindow { early_start: 22 * 60, late_start: 23 * 60, finish: 60 };
    /// assert!(overnight.contains(23 * 60));
    /// assert!(overnight.contains(30));
    /// assert!(!overnight.contains(12 * 60));
    /// ```
    pub fn contains(&self, now: u32) -> bool {
        if self.finish >= self.early_start {
            self.early_start <= now && now < self.finish
        } else {
            self.early_start <= now || now < self.finish
        }
    }
}
