//! Controllable loads and the per-minute priority state machine.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::schedule::{ResolvedWindow, TimeSpec};
use crate::clock::ClockSnapshot;
use crate::env::EnvironmentalSnapshot;
use crate::soc::BatteryParameters;

/// A load switched off fewer than this many minutes ago may not restart.
pub const MIN_OFF_MINUTES: i32 = 5;

/// Static description of one switched load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    pub name: String,
    /// Identifier understood by the switch driver.
    pub device_id: String,
    pub early_start: TimeSpec,
    pub late_start: TimeSpec,
    pub finish: TimeSpec,
    /// Minimum contiguous run, minutes.
    pub min_on_minutes: i32,
    pub min_daily_minutes: u32,
    pub max_daily_minutes: u32,
    /// CO₂ intensity ceiling, g/kWh.
    pub max_co2: f32,
    /// Ambient temperature ceiling, °C.
    pub max_temp_c: f32,
    pub power_w: f32,
    /// Subtracted from the expected draw once running.
    #[serde(default)]
    pub hysteresis_w: f32,
    /// Load stays off while battery SoC is below this percentage.
    #[serde(default)]
    pub min_battery_soc: f32,
}

/// Priority class of a load. Lower values are more eager.
///
/// `0` must stay on, `1..=89` normal, `90..=98` low, `99` must stay off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    pub const FORCED_ON: Priority = Priority(0);
    pub const FORCED_OFF: Priority = Priority(99);
    /// Added to the base priority once the daily minimum has been met.
    pub const SATISFIED_OFFSET: u8 = 50;
    /// Highest priority value the admit and shed passes visit.
    pub const MAX_SCHEDULABLE: u8 = 98;

    /// Clamps `value` into `0..=99`.
    pub fn new(value: u32) -> Self {
        Priority(value.min(99) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Loads running in this band may be released to make room for more
    /// eager ones.
    pub fn is_discretionary(self) -> bool {
        (Self::SATISFIED_OFFSET + 1..=Self::MAX_SCHEDULABLE).contains(&self.0)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the priority decision depends on, for one load at one minute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityFactors {
    pub valid_time: bool,
    pub late_start_active: bool,
    pub just_on: bool,
    /// Minutes since the last switch: positive while on, negative while off.
    pub on_timer: i32,
    pub environment_blocked: bool,
    pub daily_max_reached: bool,
    pub battery_too_low: bool,
    pub daily_min_exceeded: bool,
}

impl PriorityFactors {
    /// Maps the factors to a priority, first match wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use palm::loads::{Priority, PriorityFactors};
    ///
    /// let overdue = PriorityFactors {
    ///     valid_time: true,
    ///     late_start_active: true,
    ///     just_on: false,
    ///     on_timer: -30,
    ///     environment_blocked: true,
    ///     daily_max_reached: false,
    ///     battery_too_low: false,
    ///     daily_min_exceeded: false,
    /// };
    /// assert_eq!(overdue.decide(3), Priority::FORCED_ON);
    /// ```
    pub fn decide(&self, base_priority: u8) -> Priority {
        let recently_off = -MIN_OFF_MINUTES < self.on_timer && self.on_timer < 0;
        if self.valid_time && (self.late_start_active || self.just_on) {
            Priority::FORCED_ON
        } else if !self.valid_time || recently_off {
            Priority::FORCED_OFF
        } else if self.environment_blocked || self.daily_max_reached || self.battery_too_low {
            Priority::FORCED_OFF
        } else if self.daily_min_exceeded {
            Priority::new(u32::from(base_priority) + u32::from(Priority::SATISFIED_OFFSET))
        } else {
            Priority::new(u32::from(base_priority))
        }
    }
}

/// Runtime state of one controllable load.
#[derive(Debug, Clone)]
pub struct Load {
    config: LoadConfig,
    base_priority: u8,
    window: ResolvedWindow,
    on: bool,
    was_on: bool,
    /// Minutes on so far today.
    minutes_on_today: u32,
    on_timer: i32,
    priority: Priority,
    priority_changed: bool,
    est_power_w: f32,
}

impl Load {
    /// Creates a load at position `index` in the configured priority order.
    ///
    /// The load starts off and counts as having been off long enough to be
    /// switched on straight away.
    pub fn new(index: usize, config: LoadConfig, env: &EnvironmentalSnapshot) -> Self {
        let window =
            ResolvedWindow::resolve(&config.early_start, &config.late_start, &config.finish, env);
        let est_power_w = config.power_w;
        Self {
            base_priority: Priority::new(index as u32 + 1).value(),
            window,
            on: false,
            was_on: false,
            minutes_on_today: 0,
            on_timer: -MIN_OFF_MINUTES,
            priority: Priority::FORCED_OFF,
            priority_changed: false,
            est_power_w,
            config,
        }
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn priority_changed(&self) -> bool {
        self.priority_changed
    }

    pub fn minutes_on_today(&self) -> u32 {
        self.minutes_on_today
    }

    pub fn on_timer(&self) -> i32 {
        self.on_timer
    }

    pub fn window(&self) -> ResolvedWindow {
        self.window
    }

    /// Expected draw (W) while on.
    pub fn est_power_w(&self) -> f32 {
        self.est_power_w
    }

    /// Re-resolves sun-relative schedule bounds.
    pub fn resolve_schedule(&mut self, env: &EnvironmentalSnapshot) {
        self.window = ResolvedWindow::resolve(
            &self.config.early_start,
            &self.config.late_start,
            &self.config.finish,
            env,
        );
    }

    /// Advances the per-minute counters and recomputes the priority.
    ///
    /// Must run once per minute for every load before any balancing.
    pub fn refresh_priority(
        &mut self,
        clock: &ClockSnapshot,
        env: &EnvironmentalSnapshot,
        battery: &BatteryParameters,
        sun_times_changed: bool,
    ) {
        if sun_times_changed {
            self.resolve_schedule(env);
        }

        self.was_on = self.on;
        if clock.is_midnight() {
            self.minutes_on_today = 0;
        }
        if self.on {
            self.on_timer += 1;
            self.minutes_on_today += 1;
        } else {
            self.on_timer -= 1;
        }

        let factors = self.factors(clock.now_minutes, env, battery);
        let old = self.priority;
        self.priority = factors.decide(self.base_priority);
        self.priority_changed = self.priority != old;
    }

    /// Evaluates the decision inputs at minute `now` without changing state.
    pub fn factors(
        &self,
        now: u32,
        env: &EnvironmentalSnapshot,
        battery: &BatteryParameters,
    ) -> PriorityFactors {
        let c = &self.config;
        PriorityFactors {
            valid_time: self.window.contains(now),
            late_start_active: self.window.late_start < now
                && self.minutes_on_today < c.min_daily_minutes,
            just_on: self.on && self.on_timer < c.min_on_minutes,
            on_timer: self.on_timer,
            environment_blocked: env.co2_intensity > c.max_co2 || env.temperature_c > c.max_temp_c,
            daily_max_reached: self.minutes_on_today >= c.max_daily_minutes,
            battery_too_low: battery.soc_pct < c.min_battery_soc,
            daily_min_exceeded: self.minutes_on_today > c.min_daily_minutes,
        }
    }

    /// Switches the load and returns the change in net usage (W).
    ///
    /// Ignored (returns 0) if the load already switched this minute or is
    /// already in the requested state.
    pub fn toggle(&mut self, turn_on: bool) -> f32 {
        if self.on != self.was_on || self.on == turn_on {
            return 0.0;
        }
        self.on = turn_on;
        self.on_timer = 0;
        if turn_on {
            self.est_power_w = self.config.power_w - self.config.hysteresis_w;
            self.minutes_on_today += 1;
            info!(
                device = %self.config.device_id,
                label = %self.config.name,
                eti = self.minutes_on_today,
                "device ON"
            );
            self.est_power_w
        } else {
            self.est_power_w = self.config.power_w;
            info!(
                device = %self.config.device_id,
                label = %self.config.name,
                eti = self.minutes_on_today,
                "device OFF"
            );
            -self.est_power_w
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvSettings;

    fn config() -> LoadConfig {
        LoadConfig {
            name: "Towel Rails".into(),
            device_id: "182182".into(),
            early_start: TimeSpec::At(600),
            late_start: TimeSpec::At(840),
            finish: TimeSpec::At(960),
            min_on_minutes: 5,
            min_daily_minutes: 30,
            max_daily_minutes: 60,
            max_co2: 200.0,
            max_temp_c: 20.0,
            power_w: 800.0,
            hysteresis_w: 250.0,
            min_battery_soc: 0.0,
        }
    }

    fn clock(now: u32) -> ClockSnapshot {
        ClockSnapshot::new(now, 6, &[], &[])
    }

    fn env() -> EnvironmentalSnapshot {
        EnvironmentalSnapshot::new(&EnvSettings::default())
    }

    fn battery() -> BatteryParameters {
        BatteryParameters::new(10.0, 1.0, 3.0, 4.0, 99.0)
    }

    fn factors() -> PriorityFactors {
        PriorityFactors {
            valid_time: true,
            late_start_active: false,
            just_on: false,
            on_timer: -10,
            environment_blocked: false,
            daily_max_reached: false,
            battery_too_low: false,
            daily_min_exceeded: false,
        }
    }

    #[test]
    fn decision_order() {
        assert_eq!(factors().decide(3), Priority::new(3));
        let satisfied = PriorityFactors { daily_min_exceeded: true, ..factors() };
        assert_eq!(satisfied.decide(3), Priority::new(53));
        let blocked = PriorityFactors { environment_blocked: true, ..factors() };
        assert_eq!(blocked.decide(3), Priority::FORCED_OFF);
        let outside = PriorityFactors { valid_time: false, late_start_active: true, ..factors() };
        assert_eq!(outside.decide(3), Priority::FORCED_OFF);
        let starting = PriorityFactors { just_on: true, daily_max_reached: true, ..factors() };
        assert_eq!(starting.decide(3), Priority::FORCED_ON);
    }

    #[test]
    fn late_start_overrides_environment_ceilings() {
        let f = PriorityFactors {
            late_start_active: true,
            environment_blocked: true,
            battery_too_low: true,
            ..factors()
        };
        assert_eq!(f.decide(7), Priority::FORCED_ON);
    }

    #[test]
    fn recently_off_is_blocked() {
        for on_timer in -4..0 {
            let f = PriorityFactors { on_timer, ..factors() };
            assert_eq!(f.decide(1), Priority::FORCED_OFF, "on_timer {on_timer}");
        }
        let f = PriorityFactors { on_timer: -5, ..factors() };
        assert_eq!(f.decide(1), Priority::new(1));
    }

    #[test]
    fn priority_values_are_clamped() {
        assert_eq!(Priority::new(150).value(), 99);
        assert!(Priority::new(60).is_discretionary());
        assert!(!Priority::new(50).is_discretionary());
        assert!(!Priority::FORCED_OFF.is_discretionary());
    }

    #[test]
    fn refresh_counts_time_and_flags_changes() {
        let mut load = Load::new(0, config(), &env());
        load.refresh_priority(&clock(700), &env(), &battery(), false);
        assert_eq!(load.priority(), Priority::new(1));
        assert!(load.priority_changed());

        assert_eq!(load.toggle(true), 550.0);
        assert_eq!(load.minutes_on_today(), 1);
        load.refresh_priority(&clock(701), &env(), &battery(), false);
        assert_eq!(load.minutes_on_today(), 2);
        assert_eq!(load.on_timer(), 1);
        assert_eq!(load.priority(), Priority::FORCED_ON, "still inside minimum on-time");
    }

    #[test]
    fn toggle_once_per_minute() {
        let mut load = Load::new(0, config(), &env());
        load.refresh_priority(&clock(700), &env(), &battery(), false);
        assert_eq!(load.toggle(true), 550.0);
        assert_eq!(load.toggle(false), 0.0);
        assert_eq!(load.toggle(true), 0.0);
        assert!(load.is_on());
    }

    #[test]
    fn toggle_off_reports_full_power() {
        let mut load = Load::new(0, config(), &env());
        load.refresh_priority(&clock(700), &env(), &battery(), false);
        load.toggle(true);
        load.refresh_priority(&clock(701), &env(), &battery(), false);
        assert_eq!(load.toggle(false), -800.0);
        assert_eq!(load.on_timer(), 0);
    }

    #[test]
    fn midnight_resets_daily_minutes() {
        let mut cfg = config();
        cfg.early_start = TimeSpec::At(1380);
        cfg.finish = TimeSpec::At(120);
        let mut load = Load::new(0, cfg, &env());
        load.refresh_priority(&clock(1439), &env(), &battery(), false);
        load.toggle(true);
        load.refresh_priority(&clock(0), &env(), &battery(), false);
        assert_eq!(load.minutes_on_today(), 1);
    }

    #[test]
    fn sun_change_reresolves_window() {
        let mut cfg = config();
        cfg.early_start = TimeSpec::VirtualSunset;
        cfg.late_start = TimeSpec::VirtualSunset;
        cfg.finish = TimeSpec::At(1380);
        let mut e = env();
        let mut load = Load::new(0, cfg, &e);
        assert_eq!(load.window().early_start, 1290);
        e.virtual_sunset = 1150;
        load.refresh_priority(&clock(1200), &e, &battery(), true);
        assert_eq!(load.window().early_start, 1150);
        assert_eq!(load.priority(), Priority::FORCED_ON, "late start passed with no runtime");
    }

    #[test]
    fn low_battery_blocks_load() {
        let mut cfg = config();
        cfg.min_battery_soc = 50.0;
        let mut load = Load::new(0, cfg, &env());
        load.refresh_priority(&clock(700), &env(), &battery().with_soc(40.0), false);
        assert_eq!(load.priority(), Priority::FORCED_OFF);
    }
}
