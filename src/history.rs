//! Historical consumption profiles used as the load input to SoC planning.

use std::io::Read;
use std::path::Path;

use tracing::{error, warn};

use crate::clock::MINUTES_PER_DAY;
use crate::error::Result;

/// Expected consumption per slot (kWh) for one day, starting at local midnight.
///
/// Lookups past the end of the day wrap, so the same profile serves both
/// simulated days.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadProfile {
    slot_minutes: u32,
    values: Vec<f32>,
}

impl LoadProfile {
    /// A profile with the same consumption in every slot.
    pub fn flat(slot_minutes: u32, kwh_per_slot: f32) -> Self {
        let spd = slots_per_day(slot_minutes);
        Self {
            slot_minutes,
            values: vec![kwh_per_slot.max(0.0); spd],
        }
    }

    /// Builds a profile from per-slot values, padding with zeros or truncating
    /// to exactly one day.
    pub fn from_slots(slot_minutes: u32, mut values: Vec<f32>) -> Self {
        let spd = slots_per_day(slot_minutes);
        if values.len() != spd {
            warn!(got = values.len(), expected = spd, "load profile resized to one day");
            values.resize(spd, 0.0);
        }
        Self {
            slot_minutes,
            values,
        }
    }

    /// Converts cumulative meter readings taken at slot boundaries into
    /// per-slot energy.
    ///
    /// `readings[i]` is the meter total at the start of slot `i`; a full day
    /// therefore needs one reading more than there are slots. Negative
    /// differences (meter resets) count as zero.
    pub fn from_cumulative(slot_minutes: u32, readings: &[f32]) -> Self {
        let deltas = readings
            .windows(2)
            .map(|w| (w[1] - w[0]).max(0.0))
            .collect();
        Self::from_slots(slot_minutes, deltas)
    }

    /// Weighted average of several days' profiles.
    ///
    /// `days[i]` pairs with `weights[i]`. Days with a zero weight are ignored
    /// and `None` entries (days whose history could not be fetched) are
    /// skipped with a warning. If no usable weight remains the error is
    /// logged and every available day counts with weight 1. Values are
    /// rounded to 0.1 kWh.
    pub fn weighted_average(
        slot_minutes: u32,
        days: &[Option<LoadProfile>],
        weights: &[f32],
    ) -> Self {
        let spd = slots_per_day(slot_minutes);
        let mut sum = vec![0.0_f32; spd];
        let mut total_weight = 0.0_f32;

        for (i, (day, weight)) in days.iter().zip(weights).enumerate() {
            if *weight <= 0.0 {
                continue;
            }
            let Some(day) = day else {
                warn!(days_ago = i + 1, "no load history for day, skipping");
                continue;
            };
            for (acc, value) in sum.iter_mut().zip(day.values.iter()) {
                *acc += value * weight;
            }
            total_weight += weight;
        }

        if total_weight <= 0.0 {
            error!("load history weights sum to zero, using weight 1 for each day");
            for day in days.iter().flatten() {
                for (acc, value) in sum.iter_mut().zip(day.values.iter()) {
                    *acc += value;
                }
                total_weight += 1.0;
            }
        }

        let divisor = total_weight.max(1.0);
        let values = sum
            .into_iter()
            .map(|v| ((v / divisor) * 10.0).round() / 10.0)
            .collect();
        Self {
            slot_minutes,
            values,
        }
    }

    /// Reads prior-day profiles from CSV: one row per day, most recent first,
    /// one column per slot, no header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value is not numeric.
    pub fn read_csv_days(slot_minutes: u32, path: &Path) -> Result<Vec<LoadProfile>> {
        let file = std::fs::File::open(path)?;
        Self::parse_csv_days(slot_minutes, file)
    }

    /// Same as [`LoadProfile::read_csv_days`], from any reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid CSV of numbers.
    pub fn parse_csv_days(slot_minutes: u32, reader: impl Read) -> Result<Vec<LoadProfile>> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut days = Vec::new();
        for record in rdr.deserialize::<Vec<f32>>() {
            days.push(Self::from_slots(slot_minutes, record?));
        }
        Ok(days)
    }

    pub fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }

    /// Consumption for `slot`, wrapping into the following day.
    pub fn get(&self, slot: usize) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values[slot % self.values.len()]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn total(&self) -> f32 {
        self.values.iter().sum()
    }
}

fn slots_per_day(slot_minutes: u32) -> usize {
    (MINUTES_PER_DAY / slot_minutes.max(1)) as usize
}
