//! Environmental conditions that gate discretionary loads.

use tracing::{info, warn};

use crate::clock::format_hhmm;
use crate::telemetry::TelemetrySample;

/// Afternoon cut-off after which a PV drop counts as sunset (15:00).
const SUNSET_SEARCH_FROM: u32 = 900;
/// Number of near-term and far-term CO₂ forecast points averaged.
const CO2_WINDOW: usize = 5;
/// Offset of the far-term window into the CO₂ forecast.
const CO2_FAR_OFFSET: usize = 6;

/// Nominal sun times and thresholds, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvSettings {
    pub sunrise: u32,
    pub sunset: u32,
    pub virtual_sunrise: u32,
    pub virtual_sunset: u32,
    /// PV power (W) regarded as the edge of daylight generation.
    pub pv_threshold_w: f32,
    /// CO₂ intensity (g/kWh) above which a rising trend counts as high.
    pub co2_threshold: f32,
    /// Far/near ratio that counts as high regardless of the threshold.
    pub co2_boost_multiplier: f32,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            sunrise: 6 * 60,
            sunset: 21 * 60 + 30,
            virtual_sunrise: 9 * 60,
            virtual_sunset: 21 * 60 + 30,
            pv_threshold_w: 30.0,
            co2_threshold: 250.0,
            co2_boost_multiplier: 1.3,
        }
    }
}

/// Current CO₂, temperature and sun times, as seen by load priorities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentalSnapshot {
    pub co2_intensity: f32,
    /// Grid intensity is forecast to rise markedly over the next few hours.
    pub co2_high: bool,
    pub temperature_c: f32,
    pub sunrise: u32,
    pub sunset: u32,
    pub virtual_sunrise: u32,
    pub virtual_sunset: u32,
}

impl EnvironmentalSnapshot {
    pub fn new(settings: &EnvSettings) -> Self {
        Self {
            co2_intensity: 200.0,
            co2_high: false,
            temperature_c: 15.0,
            sunrise: settings.sunrise,
            sunset: settings.sunset,
            virtual_sunrise: settings.virtual_sunrise,
            virtual_sunset: settings.virtual_sunset,
        }
    }

    /// Restores nominal sun times; called at local midnight.
    pub fn reset_sun_times(&mut self, settings: &EnvSettings) {
        self.sunrise = settings.sunrise;
        self.sunset = settings.sunset;
        self.virtual_sunrise = settings.virtual_sunrise;
        self.virtual_sunset = settings.virtual_sunset;
    }

    /// Applies a half-hourly CO₂ intensity forecast starting now.
    ///
    /// Needs eleven points; with fewer the current intensity is still taken
    /// but the trend flag keeps its previous value.
    pub fn update_co2(&mut self, forecast: &[f32], settings: &EnvSettings) {
        let Some(first) = forecast.first() else {
            warn!("CO2 intensity forecast empty");
            return;
        };
        self.co2_intensity = *first;

        if forecast.len() < CO2_FAR_OFFSET + CO2_WINDOW {
            warn!(points = forecast.len(), "CO2 forecast too short to derive a trend");
            return;
        }
        let mean = |from: usize| -> f32 {
            (forecast[from..from + CO2_WINDOW].iter().sum::<f32>() / CO2_WINDOW as f32).round()
        };
        let near = mean(0);
        let far = mean(CO2_FAR_OFFSET);
        self.co2_high = far > settings.co2_boost_multiplier * near
            || (far > settings.co2_threshold && far > near);
    }

    pub fn update_temperature(&mut self, temperature_c: f32) {
        self.temperature_c = (temperature_c * 10.0).round() / 10.0;
    }

    /// Moves the virtual sunrise or sunset when PV power crosses the
    /// threshold between two consecutive telemetry samples.
    ///
    /// Returns `true` if either virtual time changed.
    pub fn track_sun(
        &mut self,
        now: u32,
        previous: &TelemetrySample,
        latest: &TelemetrySample,
        loop_counter: u32,
        settings: &EnvSettings,
    ) -> bool {
        let th = settings.pv_threshold_w;
        if now < self.virtual_sunrise {
            if previous.pv_w < th && th < latest.pv_w {
                self.virtual_sunrise = latest.minute_of_day();
                info!(
                    vsr = %format_hhmm(self.virtual_sunrise),
                    vss = %format_hhmm(self.virtual_sunset),
                    "virtual sunrise detected"
                );
                return true;
            }
        } else if now > SUNSET_SEARCH_FROM {
            if latest.pv_w < th && (th < previous.pv_w || loop_counter < 10) {
                self.virtual_sunset = latest.minute_of_day();
                info!(
                    vsr = %format_hhmm(self.virtual_sunrise),
                    vss = %format_hhmm(self.virtual_sunset),
                    "virtual sunset detected"
                );
                return true;
            } else if latest.pv_w > 2.0 * th && 2.0 * th > previous.pv_w {
                self.virtual_sunset = self.sunset;
                info!(
                    vss = %format_hhmm(self.virtual_sunset),
                    "generation resumed, virtual sunset reverted"
                );
                return true;
            }
        }
        false
    }
}
