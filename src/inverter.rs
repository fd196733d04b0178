//! Inverter operating modes and the register writes that implement them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::format_hhmm;
use crate::collab::{InverterLink, with_timeout};
use crate::error::CollaboratorError;
use crate::events::ChargeWindow;
use crate::soc::{TargetSoc, TargetSource};

/// Charge and discharge power restored on resume, watts.
pub const FULL_POWER_W: u32 = 3000;
/// Window used to charge immediately: effectively the whole day.
const CHARGE_NOW_START: u32 = 1;
const CHARGE_NOW_END: u32 = 23 * 60 + 59;

/// Holding registers the controller writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    AcChargeStart,
    AcChargeEnd,
    ChargePower,
    DischargePower,
    AcChargeUpperPct,
}

impl Register {
    pub fn id(self) -> u16 {
        match self {
            Register::AcChargeStart => 64,
            Register::AcChargeEnd => 65,
            Register::ChargePower => 72,
            Register::DischargePower => 73,
            Register::AcChargeUpperPct => 77,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::AcChargeStart => "AC Charge 1 Start Time",
            Register::AcChargeEnd => "AC Charge 1 End Time",
            Register::ChargePower => "Battery Charge Power",
            Register::DischargePower => "Battery Discharge Power",
            Register::AcChargeUpperPct => "AC Charge Upper % Limit",
        }
    }
}

/// Typed register payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    Percent(u8),
    /// Minutes after midnight.
    Time(u32),
    Watts(u32),
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Percent(p) => write!(f, "{p}"),
            RegisterValue::Time(m) => f.write_str(&format_hhmm(*m)),
            RegisterValue::Watts(w) => write!(f, "{w}"),
        }
    }
}

/// One register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub register: Register,
    pub value: RegisterValue,
}

impl RegisterWrite {
    fn new(register: Register, value: RegisterValue) -> Self {
        Self { register, value }
    }
}

/// Operating modes the controller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InverterCommand {
    /// Charge to `to_pct` during the normal off-peak window.
    SetSoc { to_pct: u8 },
    /// Charge fully, holding on to the later winter end time.
    SetSocWinter,
    /// Charge fully straight away.
    ChargeNow,
    /// Charge to `to_pct` straight away.
    ChargeNowSoc { to_pct: u8 },
    Pause,
    PauseCharge,
    PauseDischarge,
    /// Restore charge/discharge power and the normal overnight target.
    Resume { to_pct: u8 },
}

impl InverterCommand {
    /// Command that applies a planned target.
    pub fn for_target(target: &TargetSoc) -> Self {
        match target.source {
            TargetSource::WinterOverride => InverterCommand::SetSocWinter,
            _ => InverterCommand::SetSoc {
                to_pct: target.pct(),
            },
        }
    }

    /// Expands the command into register writes. Window times that are not
    /// configured are left untouched.
    pub fn writes(&self, window: &ChargeWindow) -> Vec<RegisterWrite> {
        use RegisterValue::{Percent, Time, Watts};

        let overnight = |pct: u8, end: Option<u32>| {
            let mut w = vec![RegisterWrite::new(Register::AcChargeUpperPct, Percent(pct))];
            if let Some(start) = window.start {
                w.push(RegisterWrite::new(Register::AcChargeStart, Time(start)));
            }
            if let Some(end) = end {
                w.push(RegisterWrite::new(Register::AcChargeEnd, Time(end)));
            }
            w
        };
        let immediate = |pct: u8| {
            vec![
                RegisterWrite::new(Register::AcChargeUpperPct, Percent(pct)),
                RegisterWrite::new(Register::AcChargeStart, Time(CHARGE_NOW_START)),
                RegisterWrite::new(Register::AcChargeEnd, Time(CHARGE_NOW_END)),
            ]
        };

        match *self {
            InverterCommand::SetSoc { to_pct } => overnight(to_pct.min(100), window.end),
            InverterCommand::SetSocWinter => overnight(100, window.end_winter),
            InverterCommand::ChargeNow => immediate(100),
            InverterCommand::ChargeNowSoc { to_pct } => immediate(to_pct.min(100)),
            InverterCommand::Pause => vec![
                RegisterWrite::new(Register::ChargePower, Watts(0)),
                RegisterWrite::new(Register::DischargePower, Watts(0)),
            ],
            InverterCommand::PauseCharge => {
                vec![RegisterWrite::new(Register::ChargePower, Watts(0))]
            }
            InverterCommand::PauseDischarge => {
                vec![RegisterWrite::new(Register::DischargePower, Watts(0))]
            }
            InverterCommand::Resume { to_pct } => {
                let mut w = vec![
                    RegisterWrite::new(Register::ChargePower, Watts(FULL_POWER_W)),
                    RegisterWrite::new(Register::DischargePower, Watts(FULL_POWER_W)),
                ];
                w.extend(overnight(to_pct.min(100), window.end));
                w
            }
        }
    }
}

impl fmt::Display for InverterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InverterCommand::SetSoc { to_pct } => write!(f, "set_soc {to_pct}%"),
            InverterCommand::SetSocWinter => f.write_str("set_soc_winter"),
            InverterCommand::ChargeNow => f.write_str("charge_now"),
            InverterCommand::ChargeNowSoc { to_pct } => write!(f, "charge_now_soc {to_pct}%"),
            InverterCommand::Pause => f.write_str("pause"),
            InverterCommand::PauseCharge => f.write_str("pause_charge"),
            InverterCommand::PauseDischarge => f.write_str("pause_discharge"),
            InverterCommand::Resume { to_pct } => write!(f, "resume {to_pct}%"),
        }
    }
}

/// Applies commands through an [`InverterLink`], verifying each write.
#[derive(Clone)]
pub struct InverterController {
    link: Arc<dyn InverterLink>,
    window: ChargeWindow,
    timeout: Duration,
    dry_run: bool,
}

impl InverterController {
    pub fn new(
        link: Arc<dyn InverterLink>,
        window: ChargeWindow,
        timeout: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            link,
            window,
            timeout,
            dry_run,
        }
    }

    /// Writes every register of `command`, then reads each back.
    ///
    /// In dry-run mode the writes are only logged. A read-back mismatch is
    /// logged, not treated as failure.
    ///
    /// # Errors
    ///
    /// Returns the first write failure; later writes are not attempted.
    pub async fn apply(&self, command: InverterCommand) -> Result<usize, CollaboratorError> {
        let writes = command.writes(&self.window);
        info!(%command, writes = writes.len(), dry_run = self.dry_run, "inverter command");
        if self.dry_run {
            for w in &writes {
                info!(
                    register = w.register.id(),
                    label = w.register.name(),
                    value = %w.value,
                    "dry run"
                );
            }
            return Ok(0);
        }

        for w in &writes {
            with_timeout(self.timeout, self.link.write_register(w)).await?;
        }
        for w in &writes {
            match with_timeout(self.timeout, self.link.read_register(w.register)).await {
                Ok(value) if value == w.value => {}
                Ok(value) => warn!(
                    register = w.register.id(),
                    expected = %w.value,
                    read = %value,
                    "register read-back mismatch"
                ),
                Err(e) => warn!(register = w.register.id(), error = %e, "register read-back failed"),
            }
        }
        Ok(writes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    fn window() -> ChargeWindow {
        ChargeWindow {
            start: Some(37),
            end: Some(270),
            end_winter: Some(390),
            boost_start: None,
            boost_finish: None,
        }
    }

    fn ids(writes: &[RegisterWrite]) -> Vec<(u16, String)> {
        writes
            .iter()
            .map(|w| (w.register.id(), w.value.to_string()))
            .collect()
    }

    #[test]
    fn set_soc_writes_target_and_window() {
        let w = InverterCommand::SetSoc { to_pct: 45 }.writes(&window());
        assert_eq!(
            ids(&w),
            vec![(77, String::from("45")), (64, String::from("00:37")), (65, String::from("04:30"))]
        );
    }

    #[test]
    fn winter_uses_late_end() {
        let w = InverterCommand::SetSocWinter.writes(&window());
        assert_eq!(ids(&w)[2], (65, String::from("06:30")));
        assert_eq!(ids(&w)[0], (77, String::from("100")));
    }

    #[test]
    fn unset_window_times_are_skipped() {
        let w = InverterCommand::SetSoc { to_pct: 45 }.writes(&ChargeWindow::default());
        assert_eq!(ids(&w), vec![(77, String::from("45"))]);
    }

    #[test]
    fn charge_now_covers_the_whole_day() {
        let w = InverterCommand::ChargeNowSoc { to_pct: 60 }.writes(&window());
        assert_eq!(
            ids(&w),
            vec![(77, String::from("60")), (64, String::from("00:01")), (65, String::from("23:59"))]
        );
    }

    #[test]
    fn pause_variants() {
        assert_eq!(ids(&InverterCommand::Pause.writes(&window())).len(), 2);
        assert_eq!(ids(&InverterCommand::PauseCharge.writes(&window())), vec![(72, String::from("0"))]);
        assert_eq!(ids(&InverterCommand::PauseDischarge.writes(&window())), vec![(73, String::from("0"))]);
    }

    #[test]
    fn resume_restores_power_then_target() {
        let w = InverterCommand::Resume { to_pct: 30 }.writes(&window());
        assert_eq!(ids(&w)[..3], [(72, String::from("3000")), (73, String::from("3000")), (77, String::from("30"))]);
    }

    #[test]
    fn target_maps_to_command() {
        let winter = TargetSoc::full(TargetSource::WinterOverride);
        assert_eq!(InverterCommand::for_target(&winter), InverterCommand::SetSocWinter);
        let planned = TargetSoc::new(35, TargetSource::ForecastDerived);
        assert_eq!(
            InverterCommand::for_target(&planned),
            InverterCommand::SetSoc { to_pct: 35 }
        );
    }

    #[derive(Default)]
    struct StuckRegister {
        written: Mutex<HashMap<u16, RegisterValue>>,
    }

    #[async_trait]
    impl InverterLink for StuckRegister {
        async fn write_register(&self, write: &RegisterWrite) -> Result<(), CollaboratorError> {
            if let Ok(mut w) = self.written.lock() {
                w.insert(write.register.id(), write.value);
            }
            Ok(())
        }

        async fn read_register(&self, register: Register) -> Result<RegisterValue, CollaboratorError> {
            if register == Register::AcChargeUpperPct {
                return Ok(RegisterValue::Percent(100));
            }
            self.written
                .lock()
                .ok()
                .and_then(|w| w.get(&register.id()).copied())
                .ok_or_else(|| CollaboratorError::Malformed("unset".into()))
        }
    }

    #[tokio::test]
    async fn apply_writes_and_tolerates_mismatch() {
        let link = Arc::new(StuckRegister::default());
        let ctrl = InverterController::new(link.clone(), window(), Duration::from_secs(1), false);
        let n = ctrl.apply(InverterCommand::SetSoc { to_pct: 40 }).await.expect("writes succeed");
        assert_eq!(n, 3);
        let written = link.written.lock().map(|w| w.len()).unwrap_or(0);
        assert_eq!(written, 3);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let link = Arc::new(StuckRegister::default());
        let ctrl = InverterController::new(link.clone(), window(), Duration::from_secs(1), true);
        assert_eq!(ctrl.apply(InverterCommand::Pause).await.ok(), Some(0));
        assert!(link.written.lock().map(|w| w.is_empty()).unwrap_or(false));
    }
}
