//! Decoding of Solcast-style rooftop forecast payloads.
//!
//! The provider reports average power (kW) per period for the 10th, 50th and
//! 90th percentiles. Periods are re-binned into energy per planning slot
//! aligned to local midnight; several payloads (one per roof plane) add up.

use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::{DAILY_TOTAL_DAYS, DailyTotals, GenerationForecast};
use crate::error::ForecastError;

/// Top-level provider response.
#[derive(Debug, Clone, Deserialize)]
pub struct SolcastPayload {
    pub forecasts: Vec<SolcastPeriod>,
}

/// One forecast period.
#[derive(Debug, Clone, Deserialize)]
pub struct SolcastPeriod {
    pub period_end: DateTime<Utc>,
    /// ISO-8601 duration such as `PT30M`.
    pub period: String,
    pub pv_estimate: f32,
    pub pv_estimate10: f32,
    pub pv_estimate90: f32,
}

impl SolcastPayload {
    /// Parses a payload from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `ForecastError::Json` on malformed input.
    pub fn from_json_str(s: &str) -> Result<Self, ForecastError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Reads and parses a payload from a file.
    ///
    /// # Errors
    ///
    /// Returns `ForecastError` if the file is unreadable or malformed.
    pub fn from_json_file(path: &Path) -> Result<Self, ForecastError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Parses the `PT<n>M` / `PT<n>H` durations the provider emits.
pub fn period_minutes(period: &str) -> Result<i64, ForecastError> {
    let bad = || ForecastError::BadPeriod(period.to_string());
    let body = period.strip_prefix("PT").ok_or_else(bad)?;
    let (digits, scale) = if let Some(m) = body.strip_suffix('M') {
        (m, 1)
    } else if let Some(h) = body.strip_suffix('H') {
        (h, 60)
    } else {
        return Err(bad());
    };
    let n: i64 = digits.parse().map_err(|_| bad())?;
    if n <= 0 {
        return Err(bad());
    }
    Ok(n * scale)
}

/// Re-bins one or more payloads into a [`GenerationForecast`].
///
/// Slots start at `local_midnight` (expressed in UTC), or one day later when
/// the first reported period starts after midday, since today's generation is
/// then mostly over. `slot_days` days of slots are kept; daily aggregates cover
/// up to a week.
///
/// # Errors
///
/// Returns `ForecastError` if no payload holds any periods, a period string is
/// unsupported, or `slot_minutes` does not divide a day.
pub fn to_forecast(
    payloads: &[SolcastPayload],
    local_midnight: DateTime<Utc>,
    slot_minutes: u32,
    slot_days: usize,
) -> Result<GenerationForecast, ForecastError> {
    let first_start = payloads
        .iter()
        .filter_map(|p| p.forecasts.first())
        .map(|p| period_minutes(&p.period).map(|m| p.period_end - TimeDelta::minutes(m)))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .min()
        .ok_or(ForecastError::Empty)?;

    let mut day_start = local_midnight;
    if first_start - local_midnight > TimeDelta::hours(12) {
        info!("forecast starts in the afternoon; planning from tomorrow");
        day_start += TimeDelta::days(1);
    }

    // Validated before binning; a zero here would divide below.
    let empty = GenerationForecast::new(slot_minutes, Vec::new(), Vec::new(), Vec::new())?;
    let spd = empty.slots_per_day();
    let slot_len = i64::from(slot_minutes);
    let slot_count = spd * DAILY_TOTAL_DAYS;
    let horizon = slot_len * slot_count as i64;

    let mut lo = vec![0.0_f32; slot_count];
    let mut mid = vec![0.0_f32; slot_count];
    let mut hi = vec![0.0_f32; slot_count];

    for payload in payloads {
        for p in &payload.forecasts {
            let length = period_minutes(&p.period)?;
            let end = (p.period_end - day_start).num_minutes();
            let mut m = (end - length).max(0);
            while m < end && m < horizon {
                let slot = m / slot_len;
                let seg_end = ((slot + 1) * slot_len).min(end);
                let hours = (seg_end - m) as f32 / 60.0;
                let idx = slot as usize;
                lo[idx] += p.pv_estimate10 * hours;
                mid[idx] += p.pv_estimate * hours;
                hi[idx] += p.pv_estimate90 * hours;
                m = seg_end;
            }
        }
    }

    let daily: Vec<DailyTotals> = (0..DAILY_TOTAL_DAYS)
        .map(|d| {
            let range = d * spd..(d + 1) * spd;
            DailyTotals {
                pessimistic: lo[range.clone()].iter().sum(),
                median: mid[range.clone()].iter().sum(),
                optimistic: hi[range].iter().sum(),
            }
        })
        .collect();
    debug!(?daily, "forecast daily totals");

    let keep = spd * slot_days.min(DAILY_TOTAL_DAYS);
    lo.truncate(keep);
    mid.truncate(keep);
    hi.truncate(keep);

    Ok(GenerationForecast::new(slot_minutes, lo, mid, hi)?.with_daily_totals(daily))
}
