//! Controllable loads: schedules, per-minute priorities and balancing.

pub mod balancer;
pub mod load;
pub mod schedule;

pub use balancer::{BalanceOutcome, LoadBalancer, SwitchCommand};
pub use load::{Load, LoadConfig, Priority, PriorityFactors};
pub use schedule::{ResolvedWindow, TimeSpec};
