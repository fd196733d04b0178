//! TOML-based controller configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::clock::{MINUTES_PER_DAY, parse_hhmm};
use crate::env::EnvSettings;
use crate::events::ChargeWindow;
use crate::forecast::{MAX_CONFIDENCE, MIN_CONFIDENCE};
use crate::history::LoadProfile;
use crate::loads::{LoadBalancer, LoadConfig, TimeSpec};
use crate::soc::{BatteryParameters, PlannerSettings};
use crate::soc::battery::MIN_RESERVE_PCT;
use crate::telemetry::POLL_INTERVAL_MINUTES;

/// Loads beyond this count would push a satisfied priority out of the
/// normal band.
pub const MAX_LOADS: usize = 39;

/// Top-level configuration parsed from TOML.
///
/// All fields have defaults matching the baseline preset. Load from TOML
/// with [`PalmConfig::from_toml_file`] or use [`PalmConfig::baseline`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PalmConfig {
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub season: SeasonConfig,
    #[serde(default)]
    pub charge: ChargeConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Simulated site used by `--simulate`.
    #[serde(default)]
    pub site: SiteConfig,
    /// Controllable loads, most eager first.
    #[serde(default = "default_loads")]
    pub loads: Vec<LoadConfig>,
}

/// Forecast blending parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForecastConfig {
    /// Confidence weight, 10 (pessimistic) to 90 (optimistic).
    pub confidence_weight: u32,
    /// Slot length in minutes (30 or 60).
    pub slot_minutes: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            confidence_weight: 35,
            slot_minutes: 30,
        }
    }
}

/// Battery parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    /// Nominal capacity (kWh).
    pub capacity_kwh: f32,
    /// Usable fraction of the nominal capacity (0.0–1.0].
    pub utilisation: f32,
    /// Reserve kept for power cuts (%), at least 4.
    pub reserve_pct: f32,
    /// Inverter charge/discharge rate (kW).
    pub charge_rate_kw: f32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 10.4,
            utilisation: 0.85,
            reserve_pct: 4.0,
            charge_rate_kw: 3.0,
        }
    }
}

/// Month classification and SoC floors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeasonConfig {
    pub winter_months: Vec<u32>,
    pub shoulder_months: Vec<u32>,
    /// Floor outside shoulder months (%).
    pub min_soc_target: i32,
    /// Floor in shoulder months, also the afternoon boost target (%).
    pub shoulder_soc_target: i32,
}

impl Default for SeasonConfig {
    fn default() -> Self {
        Self {
            winter_months: vec![1, 2, 11, 12],
            shoulder_months: vec![3, 4, 9, 10],
            min_soc_target: 20,
            shoulder_soc_target: 60,
        }
    }
}

/// Off-peak window and afternoon boost times as `HH:MM`. An empty or
/// missing value disables the corresponding register write or event.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChargeConfig {
    pub start: Option<String>,
    pub end: Option<String>,
    pub end_winter: Option<String>,
    pub boost_start: Option<String>,
    pub boost_finish: Option<String>,
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self {
            start: Some("00:37".to_string()),
            end: Some("04:30".to_string()),
            end_winter: Some("06:30".to_string()),
            boost_start: Some("13:03".to_string()),
            boost_finish: Some("16:44".to_string()),
        }
    }
}

/// Load history weighting.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    /// Weight of each prior day, yesterday first.
    pub weights: Vec<f32>,
    /// Per-slot consumption (kWh) used until history is available.
    pub default_profile: Vec<f32>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            weights: vec![1.0, 1.0, 1.0],
            default_profile: vec![
                0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.2,
                0.2, 0.2, 0.2, 0.3, 0.2, 0.2, 0.1, 0.3, 0.3, 0.2, 0.3, 0.8, 0.6, 0.3, 0.3, 0.2,
                0.2, 0.2, 0.2, 0.6, 0.6, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1,
            ],
        }
    }
}

/// Nominal sun times (`HH:MM`) and environmental thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub sunrise: String,
    pub sunset: String,
    pub virtual_sunrise: String,
    pub virtual_sunset: String,
    /// PV power (W) marking the edge of daylight generation.
    pub pv_threshold_w: f32,
    /// CO₂ intensity (g/kWh) above which a rising trend counts as high.
    pub co2_threshold: f32,
    pub co2_boost_multiplier: f32,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            sunrise: "06:00".to_string(),
            sunset: "21:30".to_string(),
            virtual_sunrise: "09:00".to_string(),
            virtual_sunset: "21:30".to_string(),
            pv_threshold_w: 30.0,
            co2_threshold: 250.0,
            co2_boost_multiplier: 1.3,
        }
    }
}

/// Battery SoC thresholds for the load balancer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BalancerConfig {
    /// Discretionary loads are admitted only above this SoC (%).
    pub admit_soc_pct: f32,
    /// Discretionary loads are shed below this SoC (%).
    pub shed_soc_pct: f32,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            admit_soc_pct: crate::loads::balancer::DEFAULT_ADMIT_SOC_PCT,
            shed_soc_pct: crate::loads::balancer::DEFAULT_SHED_SOC_PCT,
        }
    }
}

/// Collaborator timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Timeout applied to every collaborator call (s).
    pub request_timeout_secs: u64,
    /// Minimum gap between telemetry polls (min).
    pub telemetry_poll_minutes: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            telemetry_poll_minutes: POLL_INTERVAL_MINUTES,
        }
    }
}

/// Simulated site parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Master random seed.
    pub seed: u64,
    /// Peak PV generation (kW).
    pub pv_kw_peak: f32,
    /// Generation start and end (`HH:MM`).
    pub pv_start: String,
    pub pv_end: String,
    /// PV noise standard deviation as a fraction of output.
    pub pv_noise_std: f32,
    /// Baseline household consumption (kW).
    pub base_kw: f32,
    /// Sinusoidal amplitude (kW).
    pub amp_kw: f32,
    /// Phase offset (radians).
    pub phase_rad: f32,
    /// Consumption noise standard deviation (kW).
    pub load_noise_std: f32,
    /// Battery SoC at the start of a run (%).
    pub initial_soc_pct: f32,
    /// Ambient temperature (°C).
    pub temperature_c: f32,
    /// Mean grid carbon intensity (g/kWh).
    pub co2_mean: f32,
    /// EV plugged in between these times (`HH:MM`), if set.
    pub ev_start: Option<String>,
    pub ev_end: Option<String>,
    pub ev_power_w: f32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            pv_kw_peak: 4.5,
            pv_start: "05:30".to_string(),
            pv_end: "20:30".to_string(),
            pv_noise_std: 0.05,
            base_kw: 0.4,
            amp_kw: 0.25,
            phase_rad: 4.2,
            load_noise_std: 0.05,
            initial_soc_pct: 50.0,
            temperature_c: 18.0,
            co2_mean: 180.0,
            ev_start: None,
            ev_end: None,
            ev_power_w: 7000.0,
        }
    }
}

#[expect(clippy::too_many_arguments)]
fn load(
    name: &str,
    device_id: &str,
    window: (TimeSpec, TimeSpec, TimeSpec),
    min_on_minutes: i32,
    daily_minutes: (u32, u32),
    ceilings: (f32, f32),
    power_w: f32,
    hysteresis_w: f32,
) -> LoadConfig {
    LoadConfig {
        name: name.to_string(),
        device_id: device_id.to_string(),
        early_start: window.0,
        late_start: window.1,
        finish: window.2,
        min_on_minutes,
        min_daily_minutes: daily_minutes.0,
        max_daily_minutes: daily_minutes.1,
        max_co2: ceilings.0,
        max_temp_c: ceilings.1,
        power_w,
        hysteresis_w,
        min_battery_soc: 0.0,
    }
}

fn default_loads() -> Vec<LoadConfig> {
    use TimeSpec::{At, VirtualSunset};
    let hm = |h: u32, m: u32| At(h * 60 + m);
    vec![
        load(
            "Lights - Hall",
            "176890",
            (VirtualSunset, VirtualSunset, hm(22, 0)),
            10,
            (480, 480),
            (500.0, 50.0),
            10.0,
            0.0,
        ),
        load(
            "Lights - Standard Lamp",
            "176922",
            (VirtualSunset, VirtualSunset, hm(22, 45)),
            10,
            (480, 480),
            (500.0, 50.0),
            60.0,
            0.0,
        ),
        load(
            "Towel Rails",
            "182182",
            (hm(10, 0), hm(14, 0), hm(16, 0)),
            5,
            (0, 60),
            (200.0, 20.0),
            800.0,
            250.0,
        ),
        load(
            "Battery Charger",
            "249595",
            (hm(9, 0), hm(15, 0), hm(16, 0)),
            5,
            (15, 120),
            (300.0, 25.0),
            40.0,
            50.0,
        ),
    ]
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"forecast.confidence_weight"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

fn hhmm(value: &Option<String>) -> Option<u32> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(parse_hhmm)
}

impl PalmConfig {
    /// Returns the baseline preset: summer site, settings as shipped.
    pub fn baseline() -> Self {
        Self {
            forecast: ForecastConfig::default(),
            battery: BatteryConfig::default(),
            season: SeasonConfig::default(),
            charge: ChargeConfig::default(),
            history: HistoryConfig::default(),
            environment: EnvironmentConfig::default(),
            balancer: BalancerConfig::default(),
            runtime: RuntimeConfig::default(),
            site: SiteConfig::default(),
            loads: default_loads(),
        }
    }

    /// Returns the shoulder preset: weaker PV, cooler, more cautious blend.
    pub fn shoulder() -> Self {
        Self {
            forecast: ForecastConfig {
                confidence_weight: 25,
                ..ForecastConfig::default()
            },
            site: SiteConfig {
                pv_kw_peak: 2.8,
                pv_start: "06:45".to_string(),
                pv_end: "18:30".to_string(),
                base_kw: 0.5,
                temperature_c: 12.0,
                co2_mean: 220.0,
                ..SiteConfig::default()
            },
            ..Self::baseline()
        }
    }

    /// Returns the winter preset: little PV, EV charging in the evening.
    pub fn winter() -> Self {
        Self {
            environment: EnvironmentConfig {
                sunrise: "07:45".to_string(),
                sunset: "16:15".to_string(),
                virtual_sunrise: "09:30".to_string(),
                virtual_sunset: "16:15".to_string(),
                ..EnvironmentConfig::default()
            },
            site: SiteConfig {
                pv_kw_peak: 1.2,
                pv_start: "08:00".to_string(),
                pv_end: "16:00".to_string(),
                base_kw: 0.7,
                amp_kw: 0.35,
                initial_soc_pct: 30.0,
                temperature_c: 4.0,
                co2_mean: 260.0,
                ev_start: Some("17:30".to_string()),
                ev_end: Some("19:00".to_string()),
                ..SiteConfig::default()
            },
            ..Self::baseline()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "shoulder", "winter"];

    /// Loads configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "shoulder" => Ok(Self::shoulder()),
            "winter" => Ok(Self::winter()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Off-peak window and boost times.
    pub fn charge_window(&self) -> ChargeWindow {
        let c = &self.charge;
        ChargeWindow {
            start: hhmm(&c.start),
            end: hhmm(&c.end),
            end_winter: hhmm(&c.end_winter),
            boost_start: hhmm(&c.boost_start),
            boost_finish: hhmm(&c.boost_finish),
        }
    }

    pub fn planner_settings(&self) -> PlannerSettings {
        let end = self.charge_window().end.unwrap_or(0);
        PlannerSettings {
            confidence_weight: self.forecast.confidence_weight,
            min_soc_target: self.season.min_soc_target,
            shoulder_soc_target: self.season.shoulder_soc_target,
            charge_end_slot: (end / self.forecast.slot_minutes.max(1)) as usize,
        }
    }

    /// Battery parameters at the given state of charge.
    pub fn battery_at(&self, soc_pct: f32) -> BatteryParameters {
        let b = &self.battery;
        BatteryParameters::new(
            b.capacity_kwh,
            b.utilisation,
            b.charge_rate_kw,
            b.reserve_pct,
            soc_pct,
        )
    }

    pub fn env_settings(&self) -> EnvSettings {
        let e = &self.environment;
        let defaults = EnvSettings::default();
        let time = |s: &String, fallback: u32| parse_hhmm(s).unwrap_or(fallback);
        EnvSettings {
            sunrise: time(&e.sunrise, defaults.sunrise),
            sunset: time(&e.sunset, defaults.sunset),
            virtual_sunrise: time(&e.virtual_sunrise, defaults.virtual_sunrise),
            virtual_sunset: time(&e.virtual_sunset, defaults.virtual_sunset),
            pv_threshold_w: e.pv_threshold_w,
            co2_threshold: e.co2_threshold,
            co2_boost_multiplier: e.co2_boost_multiplier,
        }
    }

    pub fn balancer(&self) -> LoadBalancer {
        LoadBalancer::new(self.balancer.admit_soc_pct, self.balancer.shed_soc_pct)
    }

    /// Load profile used before any history has been fetched.
    pub fn default_profile(&self) -> LoadProfile {
        LoadProfile::from_slots(
            self.forecast.slot_minutes,
            self.history.default_profile.clone(),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.request_timeout_secs)
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ConfigError {
                field: field.to_string(),
                message,
            });
        };

        let f = &self.forecast;
        if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&f.confidence_weight) {
            push(
                "forecast.confidence_weight",
                format!("must be in [{MIN_CONFIDENCE}, {MAX_CONFIDENCE}]"),
            );
        }
        if f.slot_minutes != 30 && f.slot_minutes != 60 {
            push("forecast.slot_minutes", "must be 30 or 60".into());
        }

        let b = &self.battery;
        if b.capacity_kwh <= 0.0 {
            push("battery.capacity_kwh", "must be > 0".into());
        }
        if !(b.utilisation > 0.0 && b.utilisation <= 1.0) {
            push("battery.utilisation", "must be in (0.0, 1.0]".into());
        }
        if !(MIN_RESERVE_PCT..=100.0).contains(&b.reserve_pct) {
            push("battery.reserve_pct", format!("must be in [{MIN_RESERVE_PCT}, 100]"));
        }
        if b.charge_rate_kw <= 0.0 {
            push("battery.charge_rate_kw", "must be > 0".into());
        }

        let s = &self.season;
        for (field, months) in [
            ("season.winter_months", &s.winter_months),
            ("season.shoulder_months", &s.shoulder_months),
        ] {
            if months.iter().any(|m| !(1..=12).contains(m)) {
                push(field, "months must be in [1, 12]".into());
            }
        }
        if s.winter_months.iter().any(|m| s.shoulder_months.contains(m)) {
            push("season.shoulder_months", "must not overlap season.winter_months".into());
        }
        for (field, pct) in [
            ("season.min_soc_target", s.min_soc_target),
            ("season.shoulder_soc_target", s.shoulder_soc_target),
        ] {
            if !(0..=100).contains(&pct) {
                push(field, "must be in [0, 100]".into());
            }
        }

        let c = &self.charge;
        for (field, value) in [
            ("charge.start", &c.start),
            ("charge.end", &c.end),
            ("charge.end_winter", &c.end_winter),
            ("charge.boost_start", &c.boost_start),
            ("charge.boost_finish", &c.boost_finish),
        ] {
            let set = value.as_deref().is_some_and(|v| !v.trim().is_empty());
            if set && hhmm(value).is_none() {
                push(field, "must be HH:MM".into());
            }
        }

        let h = &self.history;
        if h.weights.iter().any(|w| *w < 0.0) {
            push("history.weights", "must be non-negative".into());
        }
        if f.slot_minutes > 0
            && MINUTES_PER_DAY % f.slot_minutes == 0
            && h.default_profile.len() != (MINUTES_PER_DAY / f.slot_minutes) as usize
        {
            push(
                "history.default_profile",
                format!("must have one value per {}-minute slot", f.slot_minutes),
            );
        }

        let e = &self.environment;
        for (field, value) in [
            ("environment.sunrise", &e.sunrise),
            ("environment.sunset", &e.sunset),
            ("environment.virtual_sunrise", &e.virtual_sunrise),
            ("environment.virtual_sunset", &e.virtual_sunset),
        ] {
            if parse_hhmm(value).is_none() {
                push(field, "must be HH:MM".into());
            }
        }

        let bal = &self.balancer;
        if bal.shed_soc_pct > bal.admit_soc_pct {
            push("balancer.shed_soc_pct", "must be <= balancer.admit_soc_pct".into());
        }

        if self.runtime.request_timeout_secs == 0 {
            push("runtime.request_timeout_secs", "must be > 0".into());
        }
        if self.runtime.telemetry_poll_minutes < POLL_INTERVAL_MINUTES {
            push(
                "runtime.telemetry_poll_minutes",
                format!("must be >= {POLL_INTERVAL_MINUTES}"),
            );
        }

        let site = &self.site;
        match (parse_hhmm(&site.pv_start), parse_hhmm(&site.pv_end)) {
            (Some(start), Some(end)) if start < end => {}
            _ => push("site.pv_start", "must be HH:MM before site.pv_end".into()),
        }
        if !(0.0..=100.0).contains(&site.initial_soc_pct) {
            push("site.initial_soc_pct", "must be in [0, 100]".into());
        }

        if self.loads.len() > MAX_LOADS {
            push("loads", format!("at most {MAX_LOADS} loads are supported"));
        }
        for (i, l) in self.loads.iter().enumerate() {
            if l.device_id.trim().is_empty() {
                push(&format!("loads[{i}].device_id"), "must not be empty".into());
            }
            if l.power_w <= 0.0 {
                push(&format!("loads[{i}].power_w"), "must be > 0".into());
            }
            if l.min_daily_minutes > l.max_daily_minutes {
                push(
                    &format!("loads[{i}].min_daily_minutes"),
                    "must be <= max_daily_minutes".into(),
                );
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_preset_valid() {
        let cfg = PalmConfig::baseline();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "baseline should be valid: {errors:?}");
    }

    #[test]
    fn from_preset_unknown() {
        let err = PalmConfig::from_preset("nonexistent");
        assert!(err.is_err());
        assert!(err.err().is_some_and(|e| e.message.contains("unknown preset")));
    }

    #[test]
    fn all_presets_are_valid() {
        for name in PalmConfig::PRESETS {
            let cfg = PalmConfig::from_preset(name);
            assert!(cfg.is_ok(), "preset \"{name}\" should load");
            let errors = cfg.as_ref().map(|c| c.validate()).unwrap_or_default();
            assert!(errors.is_empty(), "preset \"{name}\" should be valid: {errors:?}");
        }
    }

    #[test]
    fn charge_window_converts_times() {
        let w = PalmConfig::baseline().charge_window();
        assert_eq!(w.start, Some(37));
        assert_eq!(w.end, Some(270));
        assert_eq!(w.end_winter, Some(390));
        assert_eq!(w.boost_start, Some(13 * 60 + 3));
    }

    #[test]
    fn empty_time_disables_window_entry() {
        let mut cfg = PalmConfig::baseline();
        cfg.charge.end_winter = Some(String::new());
        cfg.charge.boost_start = None;
        assert!(cfg.validate().is_empty());
        let w = cfg.charge_window();
        assert_eq!(w.end_winter, None);
        assert_eq!(w.boost_start, None);
    }

    #[test]
    fn planner_uses_charge_end_slot() {
        let p = PalmConfig::baseline().planner_settings();
        // 04:30 in 30-minute slots
        assert_eq!(p.charge_end_slot, 9);
        assert_eq!(p.confidence_weight, 35);
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[forecast]
confidence_weight = 50
slot_minutes = 60

[battery]
capacity_kwh = 9.5
utilisation = 0.9
reserve_pct = 5
charge_rate_kw = 2.6

[season]
winter_months = [12, 1]
shoulder_months = [2, 3]
min_soc_target = 15
shoulder_soc_target = 50

[charge]
start = "23:30"
end = "05:30"

[history]
weights = [4, 2, 1]
default_profile = [0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3,
                   0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3, 0.3]

[[loads]]
name = "Immersion"
device_id = "imm-1"
early_start = "VSunrise"
late_start = "14:00"
finish = "Sunset"
min_on_minutes = 10
min_daily_minutes = 30
max_daily_minutes = 180
max_co2 = 250
max_temp_c = 30
power_w = 3000
hysteresis_w = 200
"#;
        let cfg = PalmConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.ok();
        assert_eq!(cfg.as_ref().map(|c| c.forecast.slot_minutes), Some(60));
        assert_eq!(cfg.as_ref().map(|c| c.loads.len()), Some(1));
        assert_eq!(
            cfg.as_ref().map(|c| c.loads[0].early_start),
            Some(TimeSpec::VirtualSunrise)
        );
        let errors = cfg.map(|c| c.validate()).unwrap_or_default();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[forecast]
confidence_weight = 35
bogus_field = true
"#;
        assert!(PalmConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn invalid_load_time_is_rejected_on_parse() {
        let toml = r#"
[[loads]]
name = "Pump"
device_id = "p1"
early_start = "noon"
late_start = "14:00"
finish = "16:00"
min_on_minutes = 5
min_daily_minutes = 0
max_daily_minutes = 60
max_co2 = 300
max_temp_c = 30
power_w = 500
"#;
        assert!(PalmConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[forecast]
confidence_weight = 60
"#;
        let cfg = PalmConfig::from_toml_str(toml).ok();
        assert_eq!(cfg.as_ref().map(|c| c.forecast.confidence_weight), Some(60));
        assert_eq!(cfg.as_ref().map(|c| c.forecast.slot_minutes), Some(30));
        assert_eq!(cfg.as_ref().map(|c| c.loads.len()), Some(4));
    }

    #[test]
    fn validation_catches_out_of_range_values() {
        let mut cfg = PalmConfig::baseline();
        cfg.forecast.confidence_weight = 95;
        cfg.battery.reserve_pct = 2.0;
        cfg.season.winter_months.push(13);
        cfg.history.weights = vec![1.0, -1.0];
        cfg.charge.start = Some("25:00".to_string());
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        for f in [
            "forecast.confidence_weight",
            "battery.reserve_pct",
            "season.winter_months",
            "history.weights",
            "charge.start",
        ] {
            assert!(fields.iter().any(|x| x == f), "missing {f} in {fields:?}");
        }
    }

    #[test]
    fn validation_limits_load_count() {
        let mut cfg = PalmConfig::baseline();
        let extra = cfg.loads[0].clone();
        cfg.loads = vec![extra; MAX_LOADS + 1];
        assert!(cfg.validate().iter().any(|e| e.field == "loads"));
    }

    #[test]
    fn winter_preset_plugs_in_an_ev() {
        let w = PalmConfig::winter();
        assert!(w.site.ev_start.is_some());
        assert!(w.site.pv_kw_peak < PalmConfig::baseline().site.pv_kw_peak);
    }
}
