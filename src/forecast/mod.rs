//! Probabilistic PV generation forecasts and their blending into a single curve.

pub mod solcast;

use tracing::debug;

use crate::clock::MINUTES_PER_DAY;
use crate::error::ForecastError;

/// Lowest accepted confidence weight (pessimistic extreme).
pub const MIN_CONFIDENCE: u32 = 10;
/// Highest accepted confidence weight (optimistic extreme).
pub const MAX_CONFIDENCE: u32 = 90;
/// Number of days for which daily aggregates are kept.
pub const DAILY_TOTAL_DAYS: usize = 7;

/// Forecast energy for one day, per percentile (kWh).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyTotals {
    pub pessimistic: f32,
    pub median: f32,
    pub optimistic: f32,
}

/// Three parallel per-slot energy series (kWh per slot) starting at local
/// midnight of the planning day, plus daily aggregates.
///
/// Immutable once built; a new forecast replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationForecast {
    slot_minutes: u32,
    pessimistic: Vec<f32>,
    median: Vec<f32>,
    optimistic: Vec<f32>,
    daily: Vec<DailyTotals>,
}

impl GenerationForecast {
    /// Builds a forecast from same-length percentile series.
    ///
    /// Daily aggregates are summed from the slots; use
    /// [`GenerationForecast::with_daily_totals`] when the provider reports a
    /// longer horizon than the slot series covers.
    ///
    /// # Errors
    ///
    /// Returns `ForecastError` if the series lengths differ or `slot_minutes`
    /// does not evenly divide a day.
    pub fn new(
        slot_minutes: u32,
        pessimistic: Vec<f32>,
        median: Vec<f32>,
        optimistic: Vec<f32>,
    ) -> Result<Self, ForecastError> {
        if slot_minutes == 0 || MINUTES_PER_DAY % slot_minutes != 0 {
            return Err(ForecastError::BadSlotLength(slot_minutes));
        }
        if pessimistic.len() != median.len() || median.len() != optimistic.len() {
            return Err(ForecastError::LengthMismatch {
                pessimistic: pessimistic.len(),
                median: median.len(),
                optimistic: optimistic.len(),
            });
        }

        let spd = (MINUTES_PER_DAY / slot_minutes) as usize;
        let day_sum = |series: &[f32], day: usize| -> f32 {
            series.iter().skip(day * spd).take(spd).sum()
        };
        let days = median.len().div_ceil(spd).min(DAILY_TOTAL_DAYS);
        let daily = (0..days)
            .map(|d| DailyTotals {
                pessimistic: day_sum(&pessimistic, d),
                median: day_sum(&median, d),
                optimistic: day_sum(&optimistic, d),
            })
            .collect();

        Ok(Self {
            slot_minutes,
            pessimistic,
            median,
            optimistic,
            daily,
        })
    }

    /// Replaces the daily aggregates (at most [`DAILY_TOTAL_DAYS`] are kept).
    pub fn with_daily_totals(mut self, mut daily: Vec<DailyTotals>) -> Self {
        daily.truncate(DAILY_TOTAL_DAYS);
        self.daily = daily;
        self
    }

    pub fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }

    pub fn slots_per_day(&self) -> usize {
        (MINUTES_PER_DAY / self.slot_minutes) as usize
    }

    /// Number of complete days covered by the slot series.
    pub fn days(&self) -> usize {
        self.median.len() / self.slots_per_day()
    }

    pub fn pessimistic(&self) -> &[f32] {
        &self.pessimistic
    }

    pub fn median(&self) -> &[f32] {
        &self.median
    }

    pub fn optimistic(&self) -> &[f32] {
        &self.optimistic
    }

    pub fn daily_totals(&self) -> &[DailyTotals] {
        &self.daily
    }

    /// A forecast whose first-day median total is exactly zero is treated as
    /// missing: the provider failed or returned a truncated payload.
    pub fn is_usable(&self) -> bool {
        self.daily.first().is_some_and(|d| d.median != 0.0)
    }
}

/// Blend weights derived from a confidence weight.
///
/// A triangular approximation of a normal distribution centred on 50:
/// 10 selects the pessimistic series alone, 50 the median alone and 90 the
/// optimistic series alone.
///
/// # Examples
///
/// ```
/// use palm::forecast::BlendWeights;
///
/// let w = BlendWeights::from_confidence(35);
/// assert_eq!((w.lo, w.mid, w.hi), (15.0, 25.0, 0.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendWeights {
    pub lo: f32,
    pub mid: f32,
    pub hi: f32,
}

impl BlendWeights {
    /// Derives weights from `confidence`, clamped to `[10, 90]`.
    pub fn from_confidence(confidence: u32) -> Self {
        let w = confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
        let lo = 50_u32.saturating_sub(w);
        let mid = if w > 50 { 90 - w } else { w - 10 };
        let hi = w.saturating_sub(50);
        Self {
            lo: lo as f32,
            mid: mid as f32,
            hi: hi as f32,
        }
    }

    pub fn total(&self) -> f32 {
        self.lo + self.mid + self.hi
    }

    /// Weighted average of one slot; falls back to `mid_value` when every
    /// weight is zero.
    pub fn blend(&self, lo_value: f32, mid_value: f32, hi_value: f32) -> f32 {
        let total = self.total();
        if total <= 0.0 {
            return mid_value;
        }
        (lo_value * self.lo + mid_value * self.mid + hi_value * self.hi) / total
    }
}

/// Turns a three-percentile forecast into one weighted generation curve.
#[derive(Debug, Clone, Copy)]
pub struct ForecastCombiner {
    weights: BlendWeights,
}

impl ForecastCombiner {
    pub fn new(confidence: u32) -> Self {
        Self {
            weights: BlendWeights::from_confidence(confidence),
        }
    }

    pub fn weights(&self) -> BlendWeights {
        self.weights
    }

    /// Combines every slot of `forecast` into one series of the same length.
    pub fn combine(&self, forecast: &GenerationForecast) -> Vec<f32> {
        let w = self.weights;
        debug!(lo = w.lo, mid = w.mid, hi = w.hi, "forecast blend weights");
        forecast
            .pessimistic()
            .iter()
            .zip(forecast.median())
            .zip(forecast.optimistic())
            .map(|((lo, mid), hi)| w.blend(*lo, *mid, *hi))
            .collect()
    }
}
