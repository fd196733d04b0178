use rand::{SeedableRng, rngs::StdRng};

use super::gaussian_noise;
use crate::clock::MINUTES_PER_DAY;

/// A PV array with a half-sine output curve between two times of day.
#[derive(Debug, Clone)]
pub struct SolarArray {
    /// Output at solar noon under a clear sky (kW).
    pub kw_peak: f32,
    /// First minute of generation (inclusive).
    pub start: u32,
    /// Last minute of generation (exclusive).
    pub end: u32,
    /// Standard deviation of the noise as a fraction of output.
    pub noise_std: f32,
    rng: StdRng,
}

impl SolarArray {
    /// Creates an array generating between `start` and `end` minutes.
    ///
    /// # Arguments
    ///
    /// * `kw_peak` - Clear-sky peak output in kilowatts
    /// * `start` - Minute of day generation begins
    /// * `end` - Minute of day generation stops
    /// * `noise_std` - Relative noise (e.g., 0.05 for +/-5% variation)
    /// * `seed` - Random seed for reproducible noise
    ///
    /// # Panics
    ///
    /// Panics if `start >= end` or `end` is past midnight.
    pub fn new(kw_peak: f32, start: u32, end: u32, noise_std: f32, seed: u64) -> Self {
        assert!(start < end && end <= MINUTES_PER_DAY);
        Self {
            kw_peak: kw_peak.max(0.0),
            start,
            end,
            noise_std: noise_std.max(0.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn daylight_frac(&self, minute: u32) -> f32 {
        if minute < self.start || minute >= self.end {
            return 0.0;
        }
        let pos = (minute - self.start) as f32 / (self.end - self.start) as f32;
        (std::f32::consts::PI * pos).sin()
    }

    /// Noise-free output at `minute`, used for forecasts.
    pub fn clear_sky_kw(&self, minute: u32) -> f32 {
        self.kw_peak * self.daylight_frac(minute % MINUTES_PER_DAY)
    }

    /// Output at `minute` with weather noise applied.
    pub fn power_kw(&mut self, minute: u32) -> f32 {
        let clear = self.clear_sky_kw(minute);
        if clear <= 0.0 {
            return 0.0;
        }
        let noise_mult = 1.0 + gaussian_noise(&mut self.rng, self.noise_std);
        (clear * noise_mult).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dark_outside_generation_window() {
        let mut pv = SolarArray::new(4.0, 360, 1200, 0.05, 7);
        assert_eq!(pv.power_kw(100), 0.0);
        assert_eq!(pv.power_kw(1200), 0.0);
        assert_eq!(pv.clear_sky_kw(359), 0.0);
    }

    #[test]
    fn clear_sky_peaks_midway() {
        let pv = SolarArray::new(4.0, 360, 1200, 0.0, 7);
        assert!((pv.clear_sky_kw(780) - 4.0).abs() < 1e-3);
        assert!(pv.clear_sky_kw(500) < pv.clear_sky_kw(700));
    }

    #[test]
    fn same_seed_same_output() {
        let mut a = SolarArray::new(4.0, 360, 1200, 0.1, 11);
        let mut b = SolarArray::new(4.0, 360, 1200, 0.1, 11);
        for m in 400..420 {
            assert_eq!(a.power_kw(m), b.power_kw(m));
        }
    }

    #[test]
    fn negative_inputs_are_clamped() {
        let pv = SolarArray::new(-1.0, 360, 1200, -0.5, 7);
        assert_eq!(pv.kw_peak, 0.0);
        assert_eq!(pv.noise_std, 0.0);
    }

    #[test]
    #[should_panic]
    fn end_before_start_panics() {
        SolarArray::new(4.0, 1200, 360, 0.05, 7);
    }
}
