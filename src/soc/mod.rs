//! Overnight charge planning: trajectory simulation and target selection.

pub mod battery;
pub mod chart;
pub mod target;
pub mod trajectory;

pub use battery::BatteryParameters;
pub use chart::SocChart;
pub use target::{PlannerSettings, SocPlan, SocPlanner, TargetSoc, TargetSocSelector, TargetSource};
pub use trajectory::{BatteryTrajectorySimulator, DayExtremes, SimulatedTrajectory};
