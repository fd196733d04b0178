//! PV Active Load Manager: overnight battery charge planning from solar
//! forecasts, and minute-by-minute switching of household loads against
//! live PV surplus.

pub mod clock;
pub mod collab;
pub mod config;
pub mod engine;
pub mod env;
pub mod error;
pub mod ev;
pub mod events;
pub mod forecast;
pub mod history;
pub mod inverter;
/// File-backed collaborators and CSV export.
pub mod io;
pub mod loads;
pub mod runner;
/// Simulated household used by simulate mode and tests.
pub mod site;
pub mod soc;
pub mod telemetry;
