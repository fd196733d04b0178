//! Selection of the overnight charge target from a simulated trajectory.

use std::fmt;

use tracing::{error, info};

use super::battery::BatteryParameters;
use super::trajectory::{BatteryTrajectorySimulator, DayExtremes, SimulatedTrajectory};
use crate::clock::{ClockSnapshot, Season};
use crate::forecast::{ForecastCombiner, GenerationForecast};
use crate::history::LoadProfile;

/// Why a target has the value it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSource {
    /// Winter month: always charge fully, no simulation.
    WinterOverride,
    /// Forecast absent or unusable: assume the worst and charge fully.
    MissingForecast,
    /// Derived from the simulated trajectory.
    ForecastDerived,
    /// Set by an event such as the afternoon boost.
    Manual,
    /// Nothing planned yet since startup.
    Startup,
}

impl fmt::Display for TargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetSource::WinterOverride => "winter override",
            TargetSource::MissingForecast => "missing forecast",
            TargetSource::ForecastDerived => "forecast",
            TargetSource::Manual => "manual",
            TargetSource::Startup => "startup",
        };
        f.write_str(s)
    }
}

/// Overnight charge target, percent of usable capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSoc {
    pct: u8,
    pub source: TargetSource,
}

impl TargetSoc {
    /// Builds a target, clamping `pct` to 0..=100.
    pub fn new(pct: i32, source: TargetSource) -> Self {
        Self {
            pct: pct.clamp(0, 100) as u8,
            source,
        }
    }

    pub fn full(source: TargetSource) -> Self {
        Self::new(100, source)
    }

    pub fn pct(&self) -> u8 {
        self.pct
    }
}

impl fmt::Display for TargetSoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}% ({})", self.pct, self.source)
    }
}

/// Combines per-day extremes into a single target.
#[derive(Debug, Clone, Copy)]
pub struct TargetSocSelector {
    floor_pct: i32,
}

impl TargetSocSelector {
    pub fn new(floor_pct: i32) -> Self {
        Self {
            floor_pct: floor_pct.clamp(0, 100),
        }
    }

    /// Picks the target from day-1 extremes, corrected by day 2.
    ///
    /// When day 2 overflows the battery but day 1 does not, half of the day-2
    /// overshoot is credited to day 1's maximum.
    pub fn select(&self, day1: &DayExtremes, day2: Option<&DayExtremes>) -> TargetSoc {
        let mut effective_max = day1.max_pct;
        if let Some(d2) = day2
            && d2.max_pct > 100
            && day1.max_pct <= 100
        {
            effective_max = day1.max_pct + (d2.max_pct - 100) / 2;
            info!(
                day1_max = day1.max_pct,
                day2_max = d2.max_pct,
                effective_max,
                "overmorrow correction applied"
            );
        }

        let pct = (100 - effective_max)
            .max(self.floor_pct - day1.min_pct)
            .max(self.floor_pct);
        TargetSoc::new(pct, TargetSource::ForecastDerived)
    }
}

/// Static inputs for a planning run.
#[derive(Debug, Clone, Copy)]
pub struct PlannerSettings {
    pub confidence_weight: u32,
    /// Floor outside shoulder months.
    pub min_soc_target: i32,
    /// Floor in shoulder months.
    pub shoulder_soc_target: i32,
    pub charge_end_slot: usize,
}

/// Result of one planning run.
#[derive(Debug, Clone)]
pub struct SocPlan {
    pub target: TargetSoc,
    /// Whether the caller should write the target to the inverter.
    pub commit: bool,
    pub confidence_weight: u32,
    /// `None` when simulation was skipped.
    pub trajectory: Option<SimulatedTrajectory>,
}

/// Runs forecast blending, simulation and selection end to end.
#[derive(Debug, Clone, Copy)]
pub struct SocPlanner {
    settings: PlannerSettings,
}

impl SocPlanner {
    pub fn new(settings: PlannerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Floor for the month in `clock`.
    pub fn floor_pct(&self, clock: &ClockSnapshot) -> i32 {
        match clock.season() {
            Season::Shoulder => self.settings.shoulder_soc_target,
            Season::Winter | Season::Normal => self.settings.min_soc_target,
        }
    }

    /// Plans with the configured confidence weight.
    pub fn plan(
        &self,
        clock: &ClockSnapshot,
        forecast: Option<&GenerationForecast>,
        load: &LoadProfile,
        battery: &BatteryParameters,
        commit: bool,
    ) -> SocPlan {
        self.plan_with_weight(
            self.settings.confidence_weight,
            clock,
            forecast,
            load,
            battery,
            commit,
        )
    }

    /// Plans with an explicit confidence weight.
    ///
    /// Committed plans in winter return 100 % without simulating. Non-commit
    /// plans always simulate so their trajectories can be compared.
    pub fn plan_with_weight(
        &self,
        confidence_weight: u32,
        clock: &ClockSnapshot,
        forecast: Option<&GenerationForecast>,
        load: &LoadProfile,
        battery: &BatteryParameters,
        commit: bool,
    ) -> SocPlan {
        let skipped = |target| SocPlan {
            target,
            commit,
            confidence_weight,
            trajectory: None,
        };

        if commit && clock.is_winter {
            info!("winter month, charging to 100%");
            return skipped(TargetSoc::full(TargetSource::WinterOverride));
        }

        let Some(forecast) = forecast.filter(|f| f.is_usable()) else {
            error!("no usable generation forecast, charging to 100%");
            return skipped(TargetSoc::full(TargetSource::MissingForecast));
        };

        let generation = ForecastCombiner::new(confidence_weight).combine(forecast);
        let simulator = BatteryTrajectorySimulator::new(*battery, self.settings.charge_end_slot);
        let trajectory = simulator.simulate(&generation, load, forecast.slot_minutes());

        let target = match trajectory.day1() {
            Some(day1) => TargetSocSelector::new(self.floor_pct(clock))
                .select(day1, trajectory.day2()),
            None => TargetSoc::full(TargetSource::MissingForecast),
        };

        info!(
            confidence_weight,
            commit,
            target_soc = %target,
            "SoC plan"
        );

        SocPlan {
            target,
            commit,
            confidence_weight,
            trajectory: Some(trajectory),
        }
    }
}
