use rand::{SeedableRng, rngs::StdRng};

use super::gaussian_noise;
use crate::clock::MINUTES_PER_DAY;

/// Household consumption following a daily sinusoid plus noise.
///
/// # Examples
///
/// ```
/// use palm::site::baseload::BaseLoad;
///
/// let mut load = BaseLoad::new(0.4, 0.2, 0.0, 0.0, 42);
/// assert!((load.demand_kw(0) - 0.4).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct BaseLoad {
    /// Mean consumption (kW).
    pub base_kw: f32,
    /// Amplitude of the daily variation (kW).
    pub amp_kw: f32,
    /// Phase offset (radians).
    pub phase_rad: f32,
    /// Standard deviation of the noise (kW).
    pub noise_std: f32,
    rng: StdRng,
}

impl BaseLoad {
    pub fn new(base_kw: f32, amp_kw: f32, phase_rad: f32, noise_std: f32, seed: u64) -> Self {
        Self {
            base_kw,
            amp_kw,
            phase_rad,
            noise_std,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Noise-free demand at `minute`, never negative.
    pub fn mean_kw(&self, minute: u32) -> f32 {
        let day_pos = (minute % MINUTES_PER_DAY) as f32 / MINUTES_PER_DAY as f32;
        let angle = 2.0 * std::f32::consts::PI * day_pos + self.phase_rad;
        (self.base_kw + self.amp_kw * angle.sin()).max(0.0)
    }

    /// Demand at `minute` including noise, never negative.
    pub fn demand_kw(&mut self, minute: u32) -> f32 {
        let noise = gaussian_noise(&mut self.rng, self.noise_std);
        (self.mean_kw(minute) + noise).max(0.0)
    }
}
