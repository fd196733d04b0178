//! Three-pass load balancing against the live net-usage estimate.

use tracing::debug;

use super::load::{Load, Priority};

/// Battery SoC above which surplus may be spent on admitting loads.
pub const DEFAULT_ADMIT_SOC_PCT: f32 = 98.0;
/// Battery SoC below which running loads are shed.
pub const DEFAULT_SHED_SOC_PCT: f32 = 95.0;

/// A switch state change to hand to the switch driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCommand {
    pub device_id: String,
    pub name: String,
    pub turn_on: bool,
}

/// Outcome of one balancing pass over all loads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceOutcome {
    pub commands: Vec<SwitchCommand>,
    /// Net usage (W, positive = import) once the commands take effect.
    pub net_usage_w: f32,
}

/// Greedy scheduler that switches loads to drive net usage toward zero.
#[derive(Debug, Clone, Copy)]
pub struct LoadBalancer {
    admit_soc_pct: f32,
    shed_soc_pct: f32,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIT_SOC_PCT, DEFAULT_SHED_SOC_PCT)
    }
}

impl LoadBalancer {
    pub fn new(admit_soc_pct: f32, shed_soc_pct: f32) -> Self {
        Self {
            admit_soc_pct,
            shed_soc_pct,
        }
    }

    /// Runs the mandatory, admit and shed passes.
    ///
    /// Priorities must already be refreshed for the current minute. Each load
    /// changes state at most once per call.
    ///
    /// # Arguments
    ///
    /// * `loads` - All loads in configured order
    /// * `net_usage_w` - Consumption minus generation, positive for import
    /// * `soc_pct` - Current battery state of charge
    pub fn balance(&self, loads: &mut [Load], net_usage_w: f32, soc_pct: f32) -> BalanceOutcome {
        let mut net = net_usage_w;
        let mut commands = Vec::new();
        let mut released = vec![false; loads.len()];

        // Forced moves; discretionary loads already running are released.
        for (i, load) in loads.iter_mut().enumerate() {
            if load.priority_changed() {
                if load.priority() == Priority::FORCED_OFF {
                    net += switch(load, false, &mut commands);
                } else if load.priority() == Priority::FORCED_ON {
                    net += switch(load, true, &mut commands);
                }
            } else if load.is_on() && load.priority().is_discretionary() {
                net -= load.est_power_w();
                released[i] = true;
            }
        }

        // Admit the most eager loads first while there is surplus to spare.
        for p in 1..=Priority::MAX_SCHEDULABLE {
            for load in loads.iter_mut() {
                if load.priority().value() == p
                    && !load.is_on()
                    && -net >= load.est_power_w()
                    && net < 0.0
                    && soc_pct > self.admit_soc_pct
                {
                    net += switch(load, true, &mut commands);
                }
            }
        }

        // Shed the least eager loads first while importing. A released load
        // is tested with its own draw added back: it stays on only while that
        // draw still fits the surplus and the battery is above the shed
        // threshold, so a small import it would cause sheds it.
        for p in (1..=Priority::MAX_SCHEDULABLE).rev() {
            for (i, load) in loads.iter_mut().enumerate() {
                if load.priority().value() != p || !load.is_on() {
                    continue;
                }
                if released[i] {
                    let keep = net + load.est_power_w() <= 0.0 && soc_pct >= self.shed_soc_pct;
                    if keep {
                        net += load.est_power_w();
                    } else {
                        // Its draw was already taken out of the estimate.
                        switch(load, false, &mut commands);
                    }
                } else if net > 0.0 || soc_pct < self.shed_soc_pct {
                    net += switch(load, false, &mut commands);
                }
            }
        }

        debug!(net_usage_w = net, switches = commands.len(), "balance complete");
        BalanceOutcome {
            commands,
            net_usage_w: net,
        }
    }
}

fn switch(load: &mut Load, turn_on: bool, commands: &mut Vec<SwitchCommand>) -> f32 {
    let was_on = load.is_on();
    let delta = load.toggle(turn_on);
    if load.is_on() != was_on {
        commands.push(SwitchCommand {
            device_id: load.config().device_id.clone(),
            name: load.config().name.clone(),
            turn_on,
        });
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockSnapshot;
    use crate::env::{EnvSettings, EnvironmentalSnapshot};
    use crate::loads::{LoadConfig, TimeSpec};
    use crate::soc::BatteryParameters;

    fn load_config(name: &str, power_w: f32, min_daily: u32) -> LoadConfig {
        LoadConfig {
            name: name.into(),
            device_id: format!("dev-{name}"),
            early_start: TimeSpec::At(0),
            late_start: TimeSpec::At(1380),
            finish: TimeSpec::At(1439),
            min_on_minutes: 1,
            min_daily_minutes: min_daily,
            max_daily_minutes: 1000,
            max_co2: 500.0,
            max_temp_c: 50.0,
            power_w,
            hysteresis_w: 0.0,
            min_battery_soc: 0.0,
        }
    }

    fn env() -> EnvironmentalSnapshot {
        EnvironmentalSnapshot::new(&EnvSettings::default())
    }

    fn refresh(loads: &mut [Load], now: u32, soc: f32) {
        let clock = ClockSnapshot::new(now, 6, &[], &[]);
        let battery = BatteryParameters::new(10.0, 1.0, 3.0, 4.0, soc);
        for load in loads.iter_mut() {
            load.refresh_priority(&clock, &env(), &battery, false);
        }
    }

    fn loads(configs: Vec<LoadConfig>) -> Vec<Load> {
        configs
            .into_iter()
            .enumerate()
            .map(|(i, c)| Load::new(i, c, &env()))
            .collect()
    }

    #[test]
    fn surplus_admits_most_eager_load_that_fits() {
        let mut l = loads(vec![
            load_config("a", 800.0, 30),
            load_config("b", 300.0, 30),
        ]);
        refresh(&mut l, 600, 99.0);
        let out = LoadBalancer::default().balance(&mut l, -900.0, 99.0);
        assert_eq!(out.commands.len(), 1);
        assert_eq!(out.commands[0].name, "a");
        assert!(l[0].is_on() && !l[1].is_on());
        assert_eq!(out.net_usage_w, -100.0);
    }

    #[test]
    fn import_sheds_least_eager_first() {
        let mut l = loads(vec![
            load_config("a", 500.0, 30),
            load_config("b", 500.0, 30),
        ]);
        refresh(&mut l, 600, 99.0);
        LoadBalancer::default().balance(&mut l, -1200.0, 99.0);
        assert!(l[0].is_on() && l[1].is_on());

        refresh(&mut l, 601, 99.0);
        let out = LoadBalancer::default().balance(&mut l, 200.0, 99.0);
        assert_eq!(out.commands.len(), 1);
        assert_eq!(out.commands[0].name, "b");
        assert!(!out.commands[0].turn_on);
    }

    #[test]
    fn low_battery_blocks_admission_and_sheds() {
        let mut l = loads(vec![load_config("a", 100.0, 30)]);
        refresh(&mut l, 600, 97.0);
        let out = LoadBalancer::default().balance(&mut l, -2000.0, 97.0);
        assert!(out.commands.is_empty());

        refresh(&mut l, 601, 99.0);
        LoadBalancer::default().balance(&mut l, -2000.0, 99.0);
        assert!(l[0].is_on());
        refresh(&mut l, 602, 90.0);
        let out = LoadBalancer::default().balance(&mut l, -2000.0, 90.0);
        assert_eq!(out.commands.len(), 1);
        assert!(!l[0].is_on());
    }

    #[test]
    fn forced_on_load_starts_despite_import() {
        let mut l = loads(vec![load_config("a", 400.0, 30)]);
        refresh(&mut l, 1381, 10.0);
        assert_eq!(l[0].priority(), Priority::FORCED_ON);
        let out = LoadBalancer::default().balance(&mut l, 3000.0, 10.0);
        assert_eq!(out.commands.len(), 1);
        assert!(out.commands[0].turn_on);
        assert_eq!(out.net_usage_w, 3400.0);
    }

    #[test]
    fn zero_net_and_stable_priorities_change_nothing() {
        let mut l = loads(vec![
            load_config("a", 500.0, 0),
            load_config("b", 500.0, 30),
            load_config("c", 600.0, 30),
        ]);
        refresh(&mut l, 600, 99.0);
        LoadBalancer::default().balance(&mut l, -1000.0, 99.0);
        assert!(l[0].is_on() && l[1].is_on() && !l[2].is_on());

        // a has met its (zero) daily minimum and is released every minute
        // from now on, but c is too big to take its place.
        for now in 601..605 {
            refresh(&mut l, now, 99.0);
            LoadBalancer::default().balance(&mut l, 0.0, 99.0);
        }
        refresh(&mut l, 605, 99.0);
        assert!(l.iter().all(|x| !x.priority_changed()));
        let out = LoadBalancer::default().balance(&mut l, 0.0, 99.0);
        assert!(out.commands.is_empty());
        assert_eq!(out.net_usage_w, 0.0);
    }

    #[test]
    fn released_discretionary_load_yields_to_eager_load() {
        let mut l = loads(vec![
            load_config("spare", 500.0, 0),
            load_config("eager", 500.0, 30),
        ]);
        refresh(&mut l, 600, 99.0);
        LoadBalancer::default().balance(&mut l, -500.0, 99.0);
        assert!(l[0].is_on() && !l[1].is_on());

        refresh(&mut l, 601, 99.0);
        assert!(l[0].priority().is_discretionary());
        LoadBalancer::default().balance(&mut l, 0.0, 99.0);

        refresh(&mut l, 602, 99.0);
        let out = LoadBalancer::default().balance(&mut l, 0.0, 99.0);
        assert_eq!(out.commands.len(), 2);
        assert!(out.commands[0].turn_on && out.commands[0].name == "eager");
        assert!(!out.commands[1].turn_on && out.commands[1].name == "spare");
        assert_eq!(out.net_usage_w, 0.0);
    }

    #[test]
    fn released_load_stays_on_only_while_it_fits() {
        let run = |net: f32| {
            let mut l = loads(vec![load_config("spare", 500.0, 0)]);
            refresh(&mut l, 600, 99.0);
            LoadBalancer::default().balance(&mut l, -500.0, 99.0);
            refresh(&mut l, 601, 99.0);
            LoadBalancer::default().balance(&mut l, 0.0, 99.0);
            refresh(&mut l, 602, 99.0);
            assert!(!l[0].priority_changed());
            let out = LoadBalancer::default().balance(&mut l, net, 99.0);
            (l[0].is_on(), out)
        };

        let (on, out) = run(-200.0);
        assert!(on);
        assert!(out.commands.is_empty());
        assert_eq!(out.net_usage_w, -200.0);

        // Importing 100 W with the load running: without its draw the site
        // would export, but adding it back crosses into import.
        let (on, out) = run(100.0);
        assert!(!on);
        assert_eq!(out.commands.len(), 1);
        assert_eq!(out.net_usage_w, -400.0);
    }

    #[test]
    fn anti_chatter_blocks_restart_for_five_minutes() {
        let mut l = loads(vec![load_config("a", 500.0, 30)]);
        refresh(&mut l, 600, 99.0);
        LoadBalancer::default().balance(&mut l, -1000.0, 99.0);
        refresh(&mut l, 601, 99.0);
        LoadBalancer::default().balance(&mut l, 100.0, 99.0);
        assert!(!l[0].is_on(), "shed at 601");

        for now in 602..606 {
            refresh(&mut l, now, 99.0);
            let out = LoadBalancer::default().balance(&mut l, -5000.0, 99.0);
            assert!(out.commands.is_empty(), "restarted at {now}");
        }
        refresh(&mut l, 606, 99.0);
        let out = LoadBalancer::default().balance(&mut l, -5000.0, 99.0);
        assert_eq!(out.commands.len(), 1, "may restart at T+5");
    }
}
