//! Detection of EV charging from a metered charger circuit.

use tracing::{info, warn};

use crate::clock::ClockSnapshot;
use crate::events::Events;
use crate::inverter::InverterCommand;

/// Charger draw (W) above which the car counts as charging.
pub const EV_ACTIVE_THRESHOLD_W: f32 = 500.0;
/// Length of a metering period, minutes.
const METERING_PERIOD: u32 = 30;
/// Charging stop is acted on only this many minutes into a metering period.
const METERING_GRACE: u32 = 3;

/// Debounced EV charging state.
#[derive(Debug, Clone, Default)]
pub struct EvMonitor {
    power_w: f32,
    active_now: bool,
    active_last: bool,
    confirmed: bool,
}

impl EvMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a charger power reading; returns `true` once charging has been
    /// seen on two consecutive readings.
    pub fn record(&mut self, power_w: f32) -> bool {
        self.power_w = power_w;
        self.active_last = self.active_now;
        self.active_now = power_w > EV_ACTIVE_THRESHOLD_W;
        if self.active_now && !self.active_last {
            warn!(power_w, "EV charging detected");
        }
        self.is_charging()
    }

    pub fn is_charging(&self) -> bool {
        self.active_now && self.active_last
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn power_w(&self) -> f32 {
        self.power_w
    }

    /// Decides how the battery should respond to the current EV state.
    ///
    /// Nothing happens inside the off-peak window. A newly confirmed charge
    /// fills the battery from the grid in winter and shoulder months and
    /// otherwise stops the battery discharging into the car. When charging
    /// ends, normal operation resumes at the start of the next metering
    /// period.
    pub fn respond(
        &mut self,
        clock: &ClockSnapshot,
        events: &Events,
        target_pct: u8,
    ) -> Option<InverterCommand> {
        if events.off_peak {
            return None;
        }
        let charging = self.is_charging();
        if charging && !self.confirmed {
            self.confirmed = true;
            if clock.is_winter || clock.is_shoulder {
                info!("EV charging: enabling battery boost");
                return Some(InverterCommand::ChargeNow);
            }
            info!("EV charging: pausing battery discharge");
            return Some(InverterCommand::PauseDischarge);
        }
        if !charging && self.confirmed && clock.now_minutes % METERING_PERIOD < METERING_GRACE {
            info!("EV charging inactive, resuming battery");
            self.confirmed = false;
            return Some(InverterCommand::Resume { to_pct: target_pct });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(now: u32, month: u32) -> ClockSnapshot {
        ClockSnapshot::new(now, month, &[12], &[4])
    }

    #[test]
    fn needs_two_readings_above_threshold() {
        let mut ev = EvMonitor::new();
        assert!(!ev.record(7000.0));
        assert!(ev.record(7000.0));
        assert!(!ev.record(400.0));
    }

    #[test]
    fn summer_charge_pauses_discharge_then_resumes() {
        let mut ev = EvMonitor::new();
        let events = Events::default();
        ev.record(7000.0);
        ev.record(7000.0);
        assert_eq!(
            ev.respond(&clock(1000, 7), &events, 40),
            Some(InverterCommand::PauseDischarge)
        );
        assert_eq!(ev.respond(&clock(1001, 7), &events, 40), None);

        ev.record(0.0);
        assert_eq!(ev.respond(&clock(1005, 7), &events, 40), None, "mid metering period");
        assert_eq!(
            ev.respond(&clock(1020, 7), &events, 40),
            Some(InverterCommand::Resume { to_pct: 40 })
        );
        assert!(!ev.is_confirmed());
    }

    #[test]
    fn winter_charge_fills_battery() {
        let mut ev = EvMonitor::new();
        ev.record(7000.0);
        ev.record(7000.0);
        assert_eq!(
            ev.respond(&clock(1000, 12), &Events::default(), 100),
            Some(InverterCommand::ChargeNow)
        );
    }

    #[test]
    fn off_peak_is_ignored() {
        let mut ev = EvMonitor::new();
        ev.record(7000.0);
        ev.record(7000.0);
        let events = Events {
            off_peak: true,
            ..Events::default()
        };
        assert_eq!(ev.respond(&clock(100, 7), &events, 40), None);
        assert!(!ev.is_confirmed());
    }
}
