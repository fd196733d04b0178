//! A deterministic simulated household implementing every collaborator.
//!
//! Used by `--simulate` and the integration tests. Time only moves when
//! [`SimulatedSite::advance_to`] is called; each elapsed minute runs the PV,
//! consumption and battery models once.

pub mod baseload;
pub mod solar;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use rand::{Rng, rngs::StdRng};
use tracing::{debug, warn};

use crate::clock::{MINUTES_PER_DAY, parse_hhmm};
use crate::collab::{
    Collaborators, EnvironmentProvider, ForecastProvider, InverterLink, LoadHistoryProvider,
    SwitchDriver, TelemetryProvider,
};
use crate::config::PalmConfig;
use crate::error::CollaboratorError;
use crate::forecast::GenerationForecast;
use crate::history::LoadProfile;
use crate::inverter::{FULL_POWER_W, Register, RegisterValue, RegisterWrite};
use crate::soc::battery::MIN_RESERVE_PCT;
use crate::telemetry::TelemetrySample;
use baseload::BaseLoad;
use solar::SolarArray;

/// Forecast percentiles as fractions of clear-sky output.
const PESSIMISTIC_SCALE: f32 = 0.5;
const MEDIAN_SCALE: f32 = 0.85;
const OPTIMISTIC_SCALE: f32 = 1.05;
/// Days covered by the simulated forecast.
const FORECAST_DAYS: usize = 2;
/// Points in the simulated half-hourly CO₂ forecast.
const CO2_POINTS: usize = 12;

/// Samples zero-mean Gaussian noise using the Box-Muller transform.
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f32) -> f32 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f32 = rng.random::<f32>().clamp(1e-6, 1.0);
    let u2: f32 = rng.random::<f32>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos();
    z0 * std_dev
}

fn minute_of(t: NaiveDateTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Whether `minute` lies in `[start, end)`, wrapping past midnight.
fn within(start: u32, end: u32, minute: u32) -> bool {
    if start <= end {
        start <= minute && minute < end
    } else {
        minute >= start || minute < end
    }
}

/// A switch call received by the site.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchEvent {
    pub time: Option<NaiveDateTime>,
    pub device_id: String,
    pub on: bool,
}

#[derive(Debug, Clone, Copy)]
struct EvSession {
    start: u32,
    end: u32,
    power_w: f32,
}

#[derive(Debug)]
struct SiteState {
    now: Option<NaiveDateTime>,
    solar: SolarArray,
    base: BaseLoad,
    soc_kwh: f32,
    ev_w: f32,
    registers: HashMap<Register, RegisterValue>,
    switches: HashMap<String, bool>,
    sample: Option<TelemetrySample>,
    switch_log: Vec<SwitchEvent>,
    write_log: Vec<RegisterWrite>,
}

/// Simulated PV, household load, battery, switches and inverter.
#[derive(Debug)]
pub struct SimulatedSite {
    state: Mutex<SiteState>,
    capacity_kwh: f32,
    rate_kw: f32,
    slot_minutes: u32,
    load_power_w: HashMap<String, f32>,
    ev: Option<EvSession>,
    temperature_c: f32,
    co2_mean: f32,
    forecast_available: AtomicBool,
}

impl SimulatedSite {
    /// Builds the site described by `config.site`, with the configured
    /// battery and loads.
    ///
    /// # Panics
    ///
    /// Panics if the PV window is not a valid `HH:MM` range; run
    /// [`PalmConfig::validate`] first.
    pub fn new(config: &PalmConfig) -> Self {
        let s = &config.site;
        let pv_start = parse_hhmm(&s.pv_start).unwrap_or(0);
        let pv_end = parse_hhmm(&s.pv_end).unwrap_or(0);
        let capacity_kwh = config.battery.capacity_kwh * config.battery.utilisation;
        let window = config.charge_window();

        let mut registers = HashMap::from([
            (Register::ChargePower, RegisterValue::Watts(FULL_POWER_W)),
            (Register::DischargePower, RegisterValue::Watts(FULL_POWER_W)),
            (Register::AcChargeUpperPct, RegisterValue::Percent(100)),
        ]);
        if let Some(start) = window.start {
            registers.insert(Register::AcChargeStart, RegisterValue::Time(start));
        }
        if let Some(end) = window.end {
            registers.insert(Register::AcChargeEnd, RegisterValue::Time(end));
        }

        let ev = match (
            s.ev_start.as_deref().and_then(parse_hhmm),
            s.ev_end.as_deref().and_then(parse_hhmm),
        ) {
            (Some(start), Some(end)) => Some(EvSession {
                start,
                end,
                power_w: s.ev_power_w,
            }),
            _ => None,
        };

        Self {
            state: Mutex::new(SiteState {
                now: None,
                solar: SolarArray::new(s.pv_kw_peak, pv_start, pv_end, s.pv_noise_std, s.seed),
                base: BaseLoad::new(
                    s.base_kw,
                    s.amp_kw,
                    s.phase_rad,
                    s.load_noise_std,
                    s.seed.wrapping_add(1),
                ),
                soc_kwh: capacity_kwh * s.initial_soc_pct.clamp(0.0, 100.0) / 100.0,
                ev_w: 0.0,
                registers,
                switches: HashMap::new(),
                sample: None,
                switch_log: Vec::new(),
                write_log: Vec::new(),
            }),
            capacity_kwh,
            rate_kw: config.battery.charge_rate_kw,
            slot_minutes: config.forecast.slot_minutes,
            load_power_w: config
                .loads
                .iter()
                .map(|l| (l.device_id.clone(), l.power_w))
                .collect(),
            ev,
            temperature_c: s.temperature_c,
            co2_mean: s.co2_mean,
            forecast_available: AtomicBool::new(true),
        }
    }

    /// Wraps the site as the full collaborator set.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            forecast: self.clone(),
            history: self.clone(),
            telemetry: self.clone(),
            environment: self.clone(),
            switches: self.clone(),
            inverter: self.clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SiteState>, CollaboratorError> {
        self.state
            .lock()
            .map_err(|_| CollaboratorError::Transport("site state poisoned".into()))
    }

    /// Makes the forecast service fail (or recover).
    pub fn set_forecast_available(&self, available: bool) {
        self.forecast_available.store(available, Ordering::Relaxed);
    }

    /// Runs the models for every minute up to and including `now`.
    pub fn advance_to(&self, now: NaiveDateTime) {
        let Ok(mut st) = self.lock() else {
            warn!("simulated site unavailable");
            return;
        };
        let mut t = st.now.map_or(now, |last| last + TimeDelta::minutes(1));
        while t <= now {
            self.step(&mut st, t);
            t += TimeDelta::minutes(1);
        }
        st.now = Some(now);
    }

    fn step(&self, st: &mut SiteState, t: NaiveDateTime) {
        let minute = minute_of(t);
        let watts = |st: &SiteState, r: Register| match st.registers.get(&r) {
            Some(RegisterValue::Watts(w)) => *w as f32 / 1000.0,
            _ => 0.0,
        };
        let time = |st: &SiteState, r: Register| match st.registers.get(&r) {
            Some(RegisterValue::Time(m)) => Some(*m),
            _ => None,
        };

        let pv_kw = st.solar.power_kw(minute);
        let switched_kw = st
            .switches
            .iter()
            .filter(|(_, on)| **on)
            .filter_map(|(id, _)| self.load_power_w.get(id))
            .sum::<f32>()
            / 1000.0;
        st.ev_w = self
            .ev
            .filter(|ev| within(ev.start, ev.end, minute))
            .map_or(0.0, |ev| ev.power_w);
        let consumption_kw = st.base.demand_kw(minute) + switched_kw + st.ev_w / 1000.0;

        let charge_kw = watts(st, Register::ChargePower).min(self.rate_kw);
        let discharge_kw = watts(st, Register::DischargePower).min(self.rate_kw);
        let upper_kwh = match st.registers.get(&Register::AcChargeUpperPct) {
            Some(RegisterValue::Percent(p)) => self.capacity_kwh * f32::from(*p) / 100.0,
            _ => self.capacity_kwh,
        };
        let floor_kwh = self.capacity_kwh * MIN_RESERVE_PCT / 100.0;
        let grid_charging = match (
            time(st, Register::AcChargeStart),
            time(st, Register::AcChargeEnd),
        ) {
            (Some(start), Some(end)) => within(start, end, minute) && st.soc_kwh < upper_kwh,
            _ => false,
        };

        let battery_kw = if grid_charging {
            charge_kw.min((upper_kwh - st.soc_kwh) * 60.0)
        } else {
            let surplus = pv_kw - consumption_kw;
            if surplus >= 0.0 {
                surplus
                    .min(charge_kw)
                    .min((self.capacity_kwh - st.soc_kwh).max(0.0) * 60.0)
            } else {
                -(-surplus)
                    .min(discharge_kw)
                    .min((st.soc_kwh - floor_kwh).max(0.0) * 60.0)
            }
        };
        st.soc_kwh = (st.soc_kwh + battery_kw / 60.0).clamp(0.0, self.capacity_kwh);

        let sample = TelemetrySample {
            time: t,
            soc_pct: if self.capacity_kwh > 0.0 {
                st.soc_kwh / self.capacity_kwh * 100.0
            } else {
                0.0
            },
            pv_w: pv_kw * 1000.0,
            consumption_w: consumption_kw * 1000.0,
            grid_w: (consumption_kw - pv_kw + battery_kw) * 1000.0,
            battery_w: battery_kw * 1000.0,
        };
        st.sample = Some(sample);
    }

    /// Switch calls received so far.
    pub fn switch_log(&self) -> Vec<SwitchEvent> {
        self.lock().map(|st| st.switch_log.clone()).unwrap_or_default()
    }

    /// Register writes received so far.
    pub fn register_writes(&self) -> Vec<RegisterWrite> {
        self.lock().map(|st| st.write_log.clone()).unwrap_or_default()
    }

    pub fn register(&self, register: Register) -> Option<RegisterValue> {
        self.lock().ok()?.registers.get(&register).copied()
    }

    pub fn is_switched_on(&self, device_id: &str) -> bool {
        self.lock()
            .is_ok_and(|st| st.switches.get(device_id).copied().unwrap_or(false))
    }

    pub fn soc_pct(&self) -> Option<f32> {
        self.lock().ok()?.sample.map(|s| s.soc_pct)
    }
}

#[async_trait]
impl ForecastProvider for SimulatedSite {
    async fn fetch_forecast(
        &self,
        planning_day: NaiveDate,
    ) -> Result<GenerationForecast, CollaboratorError> {
        if !self.forecast_available.load(Ordering::Relaxed) {
            return Err(CollaboratorError::Transport(
                "forecast service unavailable".into(),
            ));
        }
        let st = self.lock()?;
        let slot = self.slot_minutes.max(1);
        let clear: Vec<f32> = (0..FORECAST_DAYS as u32 * MINUTES_PER_DAY / slot)
            .map(|i| {
                let from = i * slot;
                (from..from + slot).map(|m| st.solar.clear_sky_kw(m)).sum::<f32>() / 60.0
            })
            .collect();
        drop(st);
        debug!(%planning_day, slots = clear.len(), "simulated forecast");

        let scaled = |k: f32| clear.iter().map(|v| v * k).collect::<Vec<f32>>();
        GenerationForecast::new(
            slot,
            scaled(PESSIMISTIC_SCALE),
            scaled(MEDIAN_SCALE),
            scaled(OPTIMISTIC_SCALE),
        )
        .map_err(|e| CollaboratorError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl LoadHistoryProvider for SimulatedSite {
    async fn day_profile(
        &self,
        days_ago: usize,
        slot_minutes: u32,
    ) -> Result<LoadProfile, CollaboratorError> {
        let st = self.lock()?;
        let slot = slot_minutes.max(1);
        // older days drift slightly so weighting is observable
        let drift = 1.0 + 0.02 * days_ago as f32;
        let values = (0..MINUTES_PER_DAY / slot)
            .map(|i| {
                let from = i * slot;
                (from..from + slot).map(|m| st.base.mean_kw(m)).sum::<f32>() / 60.0 * drift
            })
            .collect();
        Ok(LoadProfile::from_slots(slot, values))
    }
}

#[async_trait]
impl TelemetryProvider for SimulatedSite {
    async fn latest(&self) -> Result<TelemetrySample, CollaboratorError> {
        self.lock()?
            .sample
            .ok_or_else(|| CollaboratorError::Transport("no reading yet".into()))
    }

    async fn ev_power_w(&self) -> Result<Option<f32>, CollaboratorError> {
        if self.ev.is_none() {
            return Ok(None);
        }
        Ok(Some(self.lock()?.ev_w))
    }
}

#[async_trait]
impl EnvironmentProvider for SimulatedSite {
    async fn co2_forecast(&self) -> Result<Vec<f32>, CollaboratorError> {
        let now = self.lock()?.now.map_or(0, minute_of);
        Ok((0..CO2_POINTS as u32)
            .map(|i| {
                let pos = ((now + 30 * i) % MINUTES_PER_DAY) as f32 / MINUTES_PER_DAY as f32;
                self.co2_mean * (1.0 - 0.2 * (2.0 * std::f32::consts::PI * pos).sin())
            })
            .collect())
    }

    async fn temperature_c(&self) -> Result<f32, CollaboratorError> {
        Ok(self.temperature_c)
    }
}

#[async_trait]
impl SwitchDriver for SimulatedSite {
    async fn set_switch(&self, device_id: &str, on: bool) -> Result<(), CollaboratorError> {
        let mut st = self.lock()?;
        if !self.load_power_w.contains_key(device_id) {
            return Err(CollaboratorError::Rejected {
                device: device_id.to_string(),
            });
        }
        st.switches.insert(device_id.to_string(), on);
        let time = st.now;
        st.switch_log.push(SwitchEvent {
            time,
            device_id: device_id.to_string(),
            on,
        });
        Ok(())
    }
}

#[async_trait]
impl InverterLink for SimulatedSite {
    async fn write_register(&self, write: &RegisterWrite) -> Result<(), CollaboratorError> {
        let mut st = self.lock()?;
        st.registers.insert(write.register, write.value);
        st.write_log.push(*write);
        Ok(())
    }

    async fn read_register(&self, register: Register) -> Result<RegisterValue, CollaboratorError> {
        self.lock()?
            .registers
            .get(&register)
            .copied()
            .ok_or_else(|| CollaboratorError::Malformed(format!("register {} unset", register.id())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .expect("valid time")
    }

    fn site() -> Arc<SimulatedSite> {
        Arc::new(SimulatedSite::new(&PalmConfig::baseline()))
    }

    #[test]
    fn wrap_aware_window() {
        assert!(within(1380, 60, 10));
        assert!(within(1380, 60, 1400));
        assert!(!within(1380, 60, 600));
        assert!(within(37, 270, 37));
        assert!(!within(37, 270, 270));
    }

    #[tokio::test]
    async fn no_telemetry_before_time_moves() {
        assert!(site().latest().await.is_err());
    }

    #[tokio::test]
    async fn battery_charges_from_grid_in_window() {
        let site = site();
        site.advance_to(at(1, 0));
        let before = site.soc_pct().unwrap_or(0.0);
        site.advance_to(at(2, 0));
        let after = site.soc_pct().unwrap_or(0.0);
        assert!(after > before, "{before} -> {after}");
    }

    #[tokio::test]
    async fn midday_surplus_is_exported_or_stored() {
        let site = site();
        site.advance_to(at(13, 0));
        let s = site.latest().await.expect("sample");
        assert!(s.pv_w > s.consumption_w);
        assert!(s.grid_w < s.consumption_w);
    }

    #[tokio::test]
    async fn switches_only_known_devices() {
        let site = site();
        site.advance_to(at(12, 0));
        assert!(site.set_switch("182182", true).await.is_ok());
        assert!(site.is_switched_on("182182"));
        assert!(matches!(
            site.set_switch("nope", true).await,
            Err(CollaboratorError::Rejected { .. })
        ));
        assert_eq!(site.switch_log().len(), 1);
    }

    #[tokio::test]
    async fn registers_read_back_what_was_written() {
        let site = site();
        let w = RegisterWrite {
            register: Register::AcChargeUpperPct,
            value: RegisterValue::Percent(42),
        };
        site.write_register(&w).await.expect("write");
        assert_eq!(
            site.read_register(Register::AcChargeUpperPct).await.ok(),
            Some(RegisterValue::Percent(42))
        );
        assert_eq!(site.register_writes(), vec![w]);
    }

    #[tokio::test]
    async fn forecast_covers_two_days_and_can_fail() {
        let site = site();
        let day = at(0, 0).date();
        let f = site.fetch_forecast(day).await.expect("forecast");
        assert_eq!(f.days(), 2);
        assert!(f.is_usable());
        site.set_forecast_available(false);
        assert!(site.fetch_forecast(day).await.is_err());
    }
}
