//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use palm::clock::ClockSnapshot;
use palm::config::PalmConfig;
use palm::engine::{Engine, EngineOptions};
use palm::env::{EnvSettings, EnvironmentalSnapshot};
use palm::forecast::GenerationForecast;
use palm::history::LoadProfile;
use palm::loads::{LoadConfig, TimeSpec};
use palm::site::SimulatedSite;
use palm::soc::{BatteryParameters, PlannerSettings};

pub const WINTER: [u32; 4] = [1, 2, 11, 12];
pub const SHOULDER: [u32; 4] = [3, 4, 9, 10];

/// Local date-time on the given day of 2024.
pub fn at(month: u32, day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, month, day)
        .and_then(|d| d.and_hms_opt(h, m, 0))
        .expect("valid date-time")
}

/// Clock snapshot `minute` minutes after midnight in `month`.
pub fn clock(month: u32, minute: u32) -> ClockSnapshot {
    ClockSnapshot::new(minute, month, &WINTER, &SHOULDER)
}

/// 10 kWh fully usable battery, 3 kW rate, 4% reserve.
pub fn battery(soc_pct: f32) -> BatteryParameters {
    BatteryParameters::new(10.0, 1.0, 3.0, 4.0, soc_pct)
}

/// Weight 35, floor 20 (60 in shoulder months), charging ends at slot 10.
pub fn planner_settings() -> PlannerSettings {
    PlannerSettings {
        confidence_weight: 35,
        min_soc_target: 20,
        shoulder_soc_target: 60,
        charge_end_slot: 10,
    }
}

/// Two-day half-hourly forecast with generation spread evenly over
/// 06:00-18:00.
///
/// Pessimistic is 60% and optimistic 130% of the median.
pub fn daytime_forecast(day1_median_kwh: f32, day2_median_kwh: f32) -> GenerationForecast {
    let mut median = vec![0.0; 96];
    for slot in 12..36 {
        median[slot] = day1_median_kwh / 24.0;
        median[48 + slot] = day2_median_kwh / 24.0;
    }
    let pessimistic = median.iter().map(|v| v * 0.6).collect();
    let optimistic = median.iter().map(|v| v * 1.3).collect();
    GenerationForecast::new(30, pessimistic, median, optimistic).expect("valid forecast")
}

/// Flat 0.3 kWh per half-hour consumption.
pub fn flat_profile() -> LoadProfile {
    LoadProfile::flat(30, 0.3)
}

pub fn environment() -> EnvironmentalSnapshot {
    EnvironmentalSnapshot::new(&EnvSettings::default())
}

/// 800 W heater allowed 10:00-16:00, forced from 14:00 until it has run
/// 30 minutes.
pub fn heater() -> LoadConfig {
    LoadConfig {
        name: "Heater".into(),
        device_id: "heater-1".into(),
        early_start: TimeSpec::At(600),
        late_start: TimeSpec::At(840),
        finish: TimeSpec::At(960),
        min_on_minutes: 5,
        min_daily_minutes: 30,
        max_daily_minutes: 600,
        max_co2: 200.0,
        max_temp_c: 20.0,
        power_w: 800.0,
        hysteresis_w: 0.0,
        min_battery_soc: 0.0,
    }
}

/// Engine wired to a fresh simulated site.
pub fn engine_with_site(config: &PalmConfig, options: EngineOptions) -> (Engine, Arc<SimulatedSite>) {
    let site = Arc::new(SimulatedSite::new(config));
    let engine = Engine::new(config, site.collaborators(), options);
    (engine, site)
}
