//! Projection of the stored-energy curve over the next days.

use tracing::debug;

use super::battery::BatteryParameters;
use crate::clock::format_hhmm;
use crate::history::LoadProfile;

/// Number of days the planner looks ahead.
pub const SIMULATED_DAYS: usize = 2;

/// Extremes of one simulated day, as percentages of usable capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayExtremes {
    pub max_pct: i32,
    pub min_pct: i32,
    /// Slot at which the maximum is first reached.
    pub max_slot: usize,
    /// Slot holding the deepest point before the maximum.
    pub min_slot: usize,
}

/// Per-slot projected stored energy (kWh) for each simulated day.
///
/// Values are relative to the reserve seed and are deliberately unbounded:
/// a negative value is an energy deficit the overnight charge must cover and
/// a value above capacity is surplus the battery cannot hold.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTrajectory {
    pub slot_minutes: u32,
    pub days: Vec<Vec<f32>>,
    pub extremes: Vec<DayExtremes>,
}

impl SimulatedTrajectory {
    pub fn day1(&self) -> Option<&DayExtremes> {
        self.extremes.first()
    }

    pub fn day2(&self) -> Option<&DayExtremes> {
        self.extremes.get(1)
    }
}

/// Index and value of the minimum of `values[..=from]`, scanning backward
/// from `from`.
///
/// Walking backward from the day's maximum finds the deepest dip that still
/// precedes it; a forward search stopping at the first local minimum would
/// miss a later, deeper one. Ties resolve to the point nearest `from`.
///
/// # Examples
///
/// ```
/// use palm::soc::trajectory::backward_minimum;
///
/// let slots = [50.0, 50.0, 30.0, 60.0, 40.0, 90.0];
/// assert_eq!(backward_minimum(&slots, 5), Some((2, 30.0)));
/// ```
pub fn backward_minimum(values: &[f32], from: usize) -> Option<(usize, f32)> {
    let from = from.min(values.len().checked_sub(1)?);
    let mut best = (from, values[from]);
    for i in (0..from).rev() {
        if values[i] < best.1 {
            best = (i, values[i]);
        }
    }
    Some(best)
}

/// Simulates stored energy slot by slot from a blended generation forecast
/// and an expected consumption profile.
#[derive(Debug, Clone, Copy)]
pub struct BatteryTrajectorySimulator {
    battery: BatteryParameters,
    /// Last slot of the overnight charging window.
    charge_end_slot: usize,
}

impl BatteryTrajectorySimulator {
    pub fn new(battery: BatteryParameters, charge_end_slot: usize) -> Self {
        Self {
            battery,
            charge_end_slot,
        }
    }

    /// Runs the simulation for up to [`SIMULATED_DAYS`] days.
    ///
    /// Each day starts from the reserve energy and holds it through the
    /// charging window, where consumption is covered by the grid. Later slots
    /// move by `generation - load`, limited to one slot's worth of charge
    /// rate in either direction.
    ///
    /// # Arguments
    ///
    /// * `generation` - Blended per-slot generation (kWh), day 1 then day 2
    /// * `load` - Expected per-slot consumption (kWh); wraps into day 2
    /// * `slot_minutes` - Slot length shared by both series
    pub fn simulate(
        &self,
        generation: &[f32],
        load: &LoadProfile,
        slot_minutes: u32,
    ) -> SimulatedTrajectory {
        let spd = (crate::clock::MINUTES_PER_DAY / slot_minutes.max(1)) as usize;
        let seed = self.battery.reserve_kwh();
        let rate = self.battery.rate_per_slot(slot_minutes);
        let days_available = (generation.len() / spd.max(1)).min(SIMULATED_DAYS);

        let mut days = Vec::with_capacity(days_available);
        let mut extremes = Vec::with_capacity(days_available);

        for day in 0..days_available {
            let gen_day = &generation[day * spd..(day + 1) * spd];
            let mut charge = Vec::with_capacity(spd);
            charge.push(seed);
            for i in 1..spd {
                let next = if i <= self.charge_end_slot {
                    seed
                } else {
                    let delta = (gen_day[i] - load.get(i)).clamp(-rate, rate);
                    charge[i - 1] + delta
                };
                charge.push(next);
            }

            let day_extremes = self.extremes(&charge);
            debug!(
                day = day + 1,
                max_pct = day_extremes.max_pct,
                max_at = %format_hhmm(day_extremes.max_slot as u32 * slot_minutes),
                min_pct = day_extremes.min_pct,
                min_at = %format_hhmm(day_extremes.min_slot as u32 * slot_minutes),
                "simulated day"
            );
            extremes.push(day_extremes);
            days.push(charge);
        }

        SimulatedTrajectory {
            slot_minutes,
            days,
            extremes,
        }
    }

    fn extremes(&self, charge: &[f32]) -> DayExtremes {
        let after_window = (self.charge_end_slot + 1).min(charge.len().saturating_sub(1));
        let mut max_slot = after_window;
        for i in after_window..charge.len() {
            if charge[i] > charge[max_slot] {
                max_slot = i;
            }
        }
        let (min_slot, min_kwh) = backward_minimum(charge, max_slot).unwrap_or((0, 0.0));
        DayExtremes {
            max_pct: self.battery.to_pct(charge.get(max_slot).copied().unwrap_or(0.0)),
            min_pct: self.battery.to_pct(min_kwh),
            max_slot,
            min_slot,
        }
    }
}
