//! Per-minute schedule flags derived from the charge window and the clock.

use crate::clock::{ClockSnapshot, MINUTES_PER_DAY};

/// Minutes before charge start at which the forecast is refreshed.
const FORECAST_LEAD_START: u32 = 5;
/// Minutes before charge end at which the forecast is refreshed again.
const FORECAST_LEAD_END: u32 = 65;
/// Minutes before charge start at which the target is computed.
const SOC_LEAD_START: u32 = 2;
/// Minutes before charge end at which the target is recomputed.
const SOC_LEAD_END: u32 = 60;
/// CO₂ and weather refresh cadence, in loops.
const ENVIRONMENT_REFRESH_LOOPS: u32 = 15;

/// Off-peak charging window and afternoon boost times (minutes after
/// midnight). A `None` disables whatever depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChargeWindow {
    pub start: Option<u32>,
    pub end: Option<u32>,
    /// Later end used in winter to keep the battery full for the morning peak.
    pub end_winter: Option<u32>,
    pub boost_start: Option<u32>,
    pub boost_finish: Option<u32>,
}

/// What should happen during the current minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Events {
    pub off_peak: bool,
    pub update_forecast: bool,
    pub update_soc: bool,
    pub pm_boost_start: bool,
    pub pm_boost_end: bool,
    pub update_environment: bool,
}

impl Events {
    /// Derives this minute's flags.
    ///
    /// # Arguments
    ///
    /// * `clock` - Current time and season
    /// * `window` - Configured charge window
    /// * `loop_counter` - Loops since midnight (or start), starting at 1
    /// * `immediate` - Fetch the forecast on loop 1 and plan on loop 2
    ///   instead of waiting for the charge window (test and once modes)
    pub fn evaluate(
        clock: &ClockSnapshot,
        window: &ChargeWindow,
        loop_counter: u32,
        immediate: bool,
    ) -> Self {
        let now = clock.now_minutes;
        let before = |t: u32, lead: u32| (t + MINUTES_PER_DAY - lead) % MINUTES_PER_DAY;
        let mut events = Events {
            update_forecast: immediate && loop_counter == 1,
            update_soc: immediate && loop_counter == 2,
            update_environment: loop_counter % ENVIRONMENT_REFRESH_LOOPS
                == ENVIRONMENT_REFRESH_LOOPS - 1,
            ..Events::default()
        };

        if let (Some(start), Some(end)) = (window.start, window.end) {
            events.off_peak = (start < now && now < end)
                || (now > start && start > end)
                || (start > end && end > now);
            events.update_forecast |=
                now == before(start, FORECAST_LEAD_START) || now == before(end, FORECAST_LEAD_END);
            events.update_soc |=
                now == before(start, SOC_LEAD_START) || now == before(end, SOC_LEAD_END);
        }

        if clock.is_winter || clock.is_shoulder {
            events.pm_boost_start = window.boost_start.is_some_and(|t| now == t);
            events.pm_boost_end = window.boost_finish.is_some_and(|t| now == t);
        }
        events
    }
}
