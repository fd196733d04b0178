//! Battery snapshot used by the trajectory simulator and the balancer.

/// The inverter refuses reserve settings below this percentage.
pub const MIN_RESERVE_PCT: f32 = 4.0;

/// Read-only battery description for one planning run.
///
/// Capacity is the *usable* capacity: nominal capacity scaled by the
/// utilisation factor the inverter actually allows.
///
/// # Examples
///
/// ```
/// use palm::soc::BatteryParameters;
///
/// let battery = BatteryParameters::new(10.0, 1.0, 3.0, 4.0, 55.0);
/// assert_eq!(battery.reserve_kwh(), 0.4);
/// assert_eq!(battery.rate_per_slot(30), 1.5);
/// assert_eq!(battery.to_pct(5.55), 55);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryParameters {
    /// Usable capacity in kilowatt-hours.
    pub capacity_kwh: f32,

    /// Maximum charge or discharge power in kilowatts.
    pub charge_rate_kw: f32,

    /// Reserve floor as a percentage of usable capacity.
    pub reserve_pct: f32,

    /// Last measured state of charge, percent.
    pub soc_pct: f32,
}

impl BatteryParameters {
    /// Creates a snapshot.
    ///
    /// # Arguments
    ///
    /// * `nominal_kwh` - Nameplate capacity in kWh
    /// * `utilisation` - Usable fraction of the nameplate capacity (0..=1)
    /// * `charge_rate_kw` - Charge/discharge power limit in kW
    /// * `reserve_pct` - Reserve floor; raised to [`MIN_RESERVE_PCT`] if lower
    /// * `soc_pct` - Current state of charge, clamped to 0..=100
    pub fn new(
        nominal_kwh: f32,
        utilisation: f32,
        charge_rate_kw: f32,
        reserve_pct: f32,
        soc_pct: f32,
    ) -> Self {
        Self {
            capacity_kwh: (nominal_kwh * utilisation.clamp(0.0, 1.0)).max(0.0),
            charge_rate_kw: charge_rate_kw.max(0.0),
            reserve_pct: reserve_pct.clamp(MIN_RESERVE_PCT, 100.0),
            soc_pct: soc_pct.clamp(0.0, 100.0),
        }
    }

    /// Copy of this snapshot with a fresh SoC reading.
    pub fn with_soc(self, soc_pct: f32) -> Self {
        Self {
            soc_pct: soc_pct.clamp(0.0, 100.0),
            ..self
        }
    }

    pub fn reserve_kwh(&self) -> f32 {
        self.capacity_kwh * self.reserve_pct / 100.0
    }

    pub fn stored_kwh(&self) -> f32 {
        self.capacity_kwh * self.soc_pct / 100.0
    }

    /// Largest change in stored energy possible within one slot.
    pub fn rate_per_slot(&self, slot_minutes: u32) -> f32 {
        self.charge_rate_kw * slot_minutes as f32 / 60.0
    }

    /// Energy as a whole percentage of usable capacity, truncated toward zero.
    ///
    /// Not clamped: trajectory values legitimately fall below zero or climb
    /// above 100 % and the selector relies on that spread.
    pub fn to_pct(&self, kwh: f32) -> i32 {
        if self.capacity_kwh <= 0.0 {
            return 0;
        }
        (100.0 * kwh / self.capacity_kwh) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilisation_scales_capacity() {
        let b = BatteryParameters::new(9.5, 0.85, 2.6, 4.0, 50.0);
        assert!((b.capacity_kwh - 8.075).abs() < 1e-5);
    }

    #[test]
    fn reserve_is_raised_to_minimum() {
        let b = BatteryParameters::new(10.0, 1.0, 3.0, 1.0, 50.0);
        assert_eq!(b.reserve_pct, MIN_RESERVE_PCT);
    }

    #[test]
    fn soc_is_clamped() {
        let b = BatteryParameters::new(10.0, 1.0, 3.0, 4.0, 140.0);
        assert_eq!(b.soc_pct, 100.0);
        assert_eq!(b.with_soc(-3.0).soc_pct, 0.0);
        assert_eq!(b.with_soc(42.0).stored_kwh(), 4.2);
    }

    #[test]
    fn percentages_truncate_and_go_negative() {
        let b = BatteryParameters::new(10.0, 1.0, 3.0, 4.0, 0.0);
        assert_eq!(b.to_pct(-1.25), -12);
        assert_eq!(b.to_pct(10.99), 109);
    }

    #[test]
    fn zero_capacity_never_divides() {
        let b = BatteryParameters::new(0.0, 1.0, 3.0, 4.0, 0.0);
        assert_eq!(b.to_pct(5.0), 0);
    }
}
