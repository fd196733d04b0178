//! The per-minute control loop: events, SoC planning, EV response and load
//! balancing against live telemetry.

use std::fmt;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{ClockSnapshot, format_hhmm};
use crate::collab::{Collaborators, with_timeout};
use crate::config::PalmConfig;
use crate::env::{EnvSettings, EnvironmentalSnapshot};
use crate::ev::EvMonitor;
use crate::events::{ChargeWindow, Events};
use crate::forecast::{GenerationForecast, MAX_CONFIDENCE, MIN_CONFIDENCE};
use crate::history::LoadProfile;
use crate::inverter::{InverterCommand, InverterController};
use crate::loads::{Load, LoadBalancer, SwitchCommand};
use crate::soc::{BatteryParameters, SocChart, SocPlanner, TargetSoc, TargetSource};
use crate::telemetry::TelemetryHistory;

/// How the engine schedules planning and whether it touches hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineOptions {
    /// Log switch and register writes instead of performing them, and plan
    /// straight after startup.
    pub test: bool,
    /// Plan once straight after startup, apply the target and stop.
    pub once: bool,
}

impl EngineOptions {
    fn immediate(self) -> bool {
        self.test || self.once
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub time: NaiveDateTime,
    pub loop_counter: u32,
    pub soc_pct: Option<f32>,
    pub pv_w: Option<f32>,
    pub consumption_w: Option<f32>,
    /// Net-usage estimate left after balancing.
    pub net_usage_w: Option<f32>,
    pub target_pct: u8,
    /// Target produced by a planning run this tick.
    pub plan: Option<TargetSoc>,
    pub switches: Vec<SwitchCommand>,
    pub inverter: Vec<InverterCommand>,
    /// Set once a once-mode run has planned and applied its target.
    pub finished: bool,
}

impl TickReport {
    fn new(time: NaiveDateTime, loop_counter: u32, target_pct: u8) -> Self {
        Self {
            time,
            loop_counter,
            soc_pct: None,
            pv_w: None,
            consumption_w: None,
            net_usage_w: None,
            target_pct,
            plan: None,
            switches: Vec::new(),
            inverter: Vec::new(),
            finished: false,
        }
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<f32>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.0}"));
        write!(
            f,
            "{} soc={}% pv={}W load={}W net={}W target={}%",
            self.time.format("%Y-%m-%d %H:%M"),
            opt(self.soc_pct),
            opt(self.pv_w),
            opt(self.consumption_w),
            opt(self.net_usage_w),
            self.target_pct
        )?;
        for s in &self.switches {
            write!(f, " {}={}", s.name, if s.turn_on { "ON" } else { "OFF" })?;
        }
        for c in &self.inverter {
            write!(f, " [{c}]")?;
        }
        Ok(())
    }
}

/// Single-threaded controller state advanced once per minute.
pub struct Engine {
    options: EngineOptions,
    collab: Collaborators,
    inverter: InverterController,
    planner: SocPlanner,
    balancer: LoadBalancer,
    window: ChargeWindow,
    env_settings: EnvSettings,
    winter_months: Vec<u32>,
    shoulder_months: Vec<u32>,
    history_weights: Vec<f32>,
    slot_minutes: u32,
    timeout: Duration,

    loads: Vec<Load>,
    env: EnvironmentalSnapshot,
    telemetry: TelemetryHistory,
    ev: EvMonitor,
    battery: BatteryParameters,
    forecast: Option<GenerationForecast>,
    profile: LoadProfile,
    target: TargetSoc,
    chart: Option<SocChart>,
    loop_counter: u32,
    finished: bool,
    pending: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Builds an engine from validated configuration.
    pub fn new(config: &PalmConfig, collab: Collaborators, options: EngineOptions) -> Self {
        let window = config.charge_window();
        let env_settings = config.env_settings();
        let env = EnvironmentalSnapshot::new(&env_settings);
        let loads = config
            .loads
            .iter()
            .enumerate()
            .map(|(i, l)| Load::new(i, l.clone(), &env))
            .collect();
        let timeout = config.request_timeout();

        Self {
            options,
            inverter: InverterController::new(collab.inverter.clone(), window, timeout, options.test),
            collab,
            planner: SocPlanner::new(config.planner_settings()),
            balancer: config.balancer(),
            window,
            env_settings,
            winter_months: config.season.winter_months.clone(),
            shoulder_months: config.season.shoulder_months.clone(),
            history_weights: config.history.weights.clone(),
            slot_minutes: config.forecast.slot_minutes,
            timeout,
            loads,
            env,
            telemetry: TelemetryHistory::new()
                .with_poll_interval(config.runtime.telemetry_poll_minutes),
            ev: EvMonitor::new(),
            battery: config.battery_at(0.0),
            forecast: None,
            profile: config.default_profile(),
            target: TargetSoc::full(TargetSource::Startup),
            chart: None,
            loop_counter: 0,
            finished: false,
            pending: Vec::new(),
        }
    }

    pub fn target(&self) -> TargetSoc {
        self.target
    }

    pub fn loads(&self) -> &[Load] {
        &self.loads
    }

    pub fn environment(&self) -> &EnvironmentalSnapshot {
        &self.env
    }

    /// Chart of the most recent simulated plan.
    pub fn chart(&self) -> Option<&SocChart> {
        self.chart.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Runs one minute of control.
    ///
    /// The first tick only initialises: it applies the current target, reads
    /// CO₂ and weather, and sets up the loads. Collaborator failures are
    /// logged and the previous values kept; nothing here returns an error.
    pub async fn tick(&mut self, now: NaiveDateTime) -> TickReport {
        let clock = ClockSnapshot::at(now, &self.winter_months, &self.shoulder_months);
        let mut report = TickReport::new(now, self.loop_counter, self.target.pct());
        self.pending.retain(|h| !h.is_finished());

        let mut inverter_cmds = Vec::new();
        let mut switch_cmds = Vec::new();
        if self.loop_counter == 0 {
            self.initialise(&clock, &mut inverter_cmds).await;
        } else if !self.finished {
            self.step(&clock, &mut report, &mut inverter_cmds, &mut switch_cmds)
                .await;
        }

        self.dispatch_inverter(&inverter_cmds);
        self.dispatch_switches(&switch_cmds);
        report.inverter = inverter_cmds;
        report.switches = switch_cmds;
        report.target_pct = self.target.pct();
        report.finished = self.finished;

        self.loop_counter += 1;
        if clock.is_midnight() {
            self.loop_counter = 1;
        }
        report
    }

    /// Waits for every background write started so far.
    pub async fn flush(&mut self) {
        for handle in self.pending.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "background write task failed");
            }
        }
    }

    async fn initialise(&mut self, clock: &ClockSnapshot, inverter_cmds: &mut Vec<InverterCommand>) {
        info!(
            time = %format_hhmm(clock.now_minutes),
            month = clock.month,
            season = ?clock.season(),
            loads = self.loads.len(),
            "initialising"
        );
        if !self.options.once {
            inverter_cmds.push(if clock.is_winter {
                InverterCommand::SetSocWinter
            } else {
                InverterCommand::SetSoc {
                    to_pct: self.target.pct(),
                }
            });
        }
        self.refresh_environment().await;
    }

    async fn step(
        &mut self,
        clock: &ClockSnapshot,
        report: &mut TickReport,
        inverter_cmds: &mut Vec<InverterCommand>,
        switch_cmds: &mut Vec<SwitchCommand>,
    ) {
        let events = Events::evaluate(
            clock,
            &self.window,
            self.loop_counter,
            self.options.immediate(),
        );

        if events.update_forecast {
            self.refresh_forecast(report.time.date()).await;
        }

        if events.update_soc {
            self.update_plan(clock, report, inverter_cmds).await;
            if self.options.once {
                info!("once mode complete");
                self.finished = true;
                return;
            }
        }

        if self.options.once {
            return;
        }

        let sun_reset = clock.is_midnight();
        if sun_reset {
            self.env.reset_sun_times(&self.env_settings);
        }

        self.respond_to_ev(clock, &events, inverter_cmds).await;

        if events.pm_boost_start {
            self.target = TargetSoc::new(
                self.planner.settings().shoulder_soc_target,
                TargetSource::Manual,
            );
            info!(target_soc = %self.target, "enabling afternoon battery boost");
            inverter_cmds.push(InverterCommand::ChargeNowSoc {
                to_pct: self.target.pct(),
            });
        }
        if events.pm_boost_end {
            inverter_cmds.push(InverterCommand::SetSoc {
                to_pct: self.target.pct(),
            });
        }

        if events.update_environment {
            self.refresh_environment().await;
        }

        let fresh = self.poll_telemetry(clock).await;
        if let Some(s) = self.telemetry.latest() {
            report.soc_pct = Some(s.soc_pct);
            report.pv_w = Some(s.pv_w);
            report.consumption_w = Some(s.consumption_w);
        }

        let sun_tracked = fresh
            && match (self.telemetry.latest(), self.telemetry.previous()) {
                (Some(latest), Some(previous)) => self.env.track_sun(
                    clock.now_minutes,
                    previous,
                    latest,
                    self.loop_counter,
                    &self.env_settings,
                ),
                _ => false,
            };
        // Schedules keyed to the virtual sun times follow the midnight reset.
        let sun_changed = sun_reset || sun_tracked;

        for load in &mut self.loads {
            load.refresh_priority(clock, &self.env, &self.battery, sun_changed);
        }

        let Some(latest) = self.telemetry.latest() else {
            debug!("no telemetry yet, loads left as they are");
            return;
        };
        let outcome = self
            .balancer
            .balance(&mut self.loads, latest.net_usage_w(), latest.soc_pct);
        report.net_usage_w = Some(outcome.net_usage_w);
        switch_cmds.extend(outcome.commands);
    }

    async fn refresh_forecast(&mut self, planning_day: NaiveDate) {
        match with_timeout(self.timeout, self.collab.forecast.fetch_forecast(planning_day)).await {
            Ok(forecast) => {
                let day1 = forecast.daily_totals().first().map_or(0.0, |d| d.median);
                info!(%planning_day, day1_median_kwh = day1, "generation forecast updated");
                self.forecast = Some(forecast);
            }
            Err(e) => warn!(error = %e, "forecast download failed, keeping previous forecast"),
        }
    }

    /// Fetches prior-day consumption and combines it with the configured
    /// weights. Days that fail are skipped; if none arrive the previous
    /// profile stays in use.
    async fn refresh_load_profile(&mut self) {
        let all_zero = self.history_weights.iter().all(|w| *w <= 0.0);
        let mut days = Vec::with_capacity(self.history_weights.len());
        for (i, weight) in self.history_weights.iter().enumerate() {
            if *weight <= 0.0 && !all_zero {
                days.push(None);
                continue;
            }
            let call = self.collab.history.day_profile(i + 1, self.slot_minutes);
            match with_timeout(self.timeout, call).await {
                Ok(profile) => days.push(Some(profile)),
                Err(e) => {
                    warn!(days_ago = i + 1, error = %e, "load history unavailable");
                    days.push(None);
                }
            }
        }
        if days.iter().all(Option::is_none) {
            warn!("no load history available, keeping previous load profile");
            return;
        }
        self.profile = LoadProfile::weighted_average(self.slot_minutes, &days, &self.history_weights);
        info!(total_kwh = self.profile.total(), "load profile updated");
    }

    async fn update_plan(
        &mut self,
        clock: &ClockSnapshot,
        report: &mut TickReport,
        inverter_cmds: &mut Vec<InverterCommand>,
    ) {
        self.refresh_load_profile().await;

        let forecast = self.forecast.as_ref();
        for weight in [MIN_CONFIDENCE, MAX_CONFIDENCE] {
            let diag = self
                .planner
                .plan_with_weight(weight, clock, forecast, &self.profile, &self.battery, false);
            debug!(confidence_weight = weight, target_soc = %diag.target, "bounding plan");
        }
        let plan = self
            .planner
            .plan(clock, forecast, &self.profile, &self.battery, true);

        self.chart = plan.trajectory.as_ref().map(|trajectory| {
            let chart = SocChart::build(trajectory, &self.battery, plan.target.pct());
            for row in &chart.rows {
                debug!(
                    day = row.day,
                    time = %row.time,
                    calculated = row.calculated,
                    adjusted = row.adjusted,
                    "SoC chart"
                );
            }
            chart
        });

        self.target = plan.target;
        report.plan = Some(plan.target);
        info!(target_soc = %self.target, "overnight charge target set");
        inverter_cmds.push(InverterCommand::for_target(&self.target));
    }

    async fn respond_to_ev(
        &mut self,
        clock: &ClockSnapshot,
        events: &Events,
        inverter_cmds: &mut Vec<InverterCommand>,
    ) {
        match with_timeout(self.timeout, self.collab.telemetry.ev_power_w()).await {
            Ok(Some(power_w)) => {
                self.ev.record(power_w);
            }
            Ok(None) => return,
            Err(e) => warn!(error = %e, "EV charger reading failed"),
        }
        if let Some(cmd) = self.ev.respond(clock, events, self.target.pct()) {
            inverter_cmds.push(cmd);
        }
    }

    async fn refresh_environment(&mut self) {
        match with_timeout(self.timeout, self.collab.environment.co2_forecast()).await {
            Ok(forecast) => self.env.update_co2(&forecast, &self.env_settings),
            Err(e) => warn!(error = %e, "CO2 forecast unavailable"),
        }
        match with_timeout(self.timeout, self.collab.environment.temperature_c()).await {
            Ok(t) => self.env.update_temperature(t),
            Err(e) => warn!(error = %e, "weather unavailable"),
        }
    }

    /// Polls the inverter if due. Returns `true` if a new sample arrived.
    async fn poll_telemetry(&mut self, clock: &ClockSnapshot) -> bool {
        let now = clock.now_minutes;
        let mut fresh = false;
        if self.telemetry.should_poll(now) {
            match with_timeout(self.timeout, self.collab.telemetry.latest()).await {
                Ok(sample) if self.telemetry.latest().is_none_or(|s| s.time != sample.time) => {
                    self.telemetry.push(sample);
                    self.battery = self.battery.with_soc(sample.soc_pct);
                    fresh = true;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "telemetry unavailable, keeping last reading"),
            }
        }
        if self.telemetry.is_stale(now)
            && let Some(s) = self.telemetry.latest()
        {
            error!(last_seen = %format_hhmm(s.minute_of_day()), "inverter data is stale");
        }
        fresh
    }

    fn dispatch_inverter(&mut self, commands: &[InverterCommand]) {
        if commands.is_empty() {
            return;
        }
        let controller = self.inverter.clone();
        let commands = commands.to_vec();
        self.pending.push(tokio::spawn(async move {
            for command in commands {
                if let Err(e) = controller.apply(command).await {
                    warn!(%command, error = %e, "inverter command failed");
                }
            }
        }));
    }

    fn dispatch_switches(&mut self, commands: &[SwitchCommand]) {
        if commands.is_empty() {
            return;
        }
        if self.options.test {
            for c in commands {
                info!(device = %c.device_id, label = %c.name, on = c.turn_on, "dry run: switch");
            }
            return;
        }
        let driver = self.collab.switches.clone();
        let timeout = self.timeout;
        let commands = commands.to_vec();
        self.pending.push(tokio::spawn(async move {
            for c in commands {
                let call = driver.set_switch(&c.device_id, c.turn_on);
                if let Err(e) = with_timeout(timeout, call).await {
                    warn!(device = %c.device_id, error = %e, "switch command failed");
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::site::SimulatedSite;

    fn at(month: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, month, 10)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .expect("valid time")
    }

    fn engine(config: &PalmConfig, options: EngineOptions) -> (Engine, Arc<SimulatedSite>) {
        let site = Arc::new(SimulatedSite::new(config));
        (Engine::new(config, site.collaborators(), options), site)
    }

    #[tokio::test]
    async fn first_tick_initialises_and_applies_target() {
        let cfg = PalmConfig::baseline();
        let (mut engine, site) = engine(&cfg, EngineOptions::default());
        site.advance_to(at(6, 12, 0));
        let report = engine.tick(at(6, 12, 0)).await;
        assert_eq!(report.loop_counter, 0);
        assert_eq!(report.inverter, vec![InverterCommand::SetSoc { to_pct: 100 }]);
        engine.flush().await;
        assert!(!site.register_writes().is_empty());
    }

    #[tokio::test]
    async fn winter_startup_uses_winter_window() {
        let cfg = PalmConfig::baseline();
        let (mut engine, _site) = engine(&cfg, EngineOptions::default());
        let report = engine.tick(at(12, 12, 0)).await;
        assert_eq!(report.inverter, vec![InverterCommand::SetSocWinter]);
    }

    #[tokio::test]
    async fn once_mode_plans_on_second_loop_and_finishes() {
        let cfg = PalmConfig::baseline();
        let options = EngineOptions {
            test: false,
            once: true,
        };
        let (mut engine, site) = engine(&cfg, options);
        let mut reports = Vec::new();
        for minute in 0..3 {
            let now = at(6, 14, minute);
            site.advance_to(now);
            reports.push(engine.tick(now).await);
        }
        assert!(reports[0].inverter.is_empty(), "once mode skips the startup write");
        assert!(reports[1].plan.is_none());
        let plan = reports[2].plan.expect("planned on loop 2");
        assert_eq!(plan.source, TargetSource::ForecastDerived);
        assert!(reports[2].finished);
        assert!(engine.chart().is_some());
        assert_eq!(reports[2].inverter, vec![InverterCommand::for_target(&plan)]);
    }

    #[tokio::test]
    async fn test_mode_writes_nothing() {
        let cfg = PalmConfig::baseline();
        let options = EngineOptions {
            test: true,
            once: false,
        };
        let (mut engine, site) = engine(&cfg, options);
        for minute in 0..10 {
            let now = at(6, 13, minute);
            site.advance_to(now);
            engine.tick(now).await;
        }
        engine.flush().await;
        assert!(site.register_writes().is_empty());
        assert!(site.switch_log().is_empty());
    }

    #[tokio::test]
    async fn failed_forecast_charges_fully() {
        let cfg = PalmConfig::baseline();
        let options = EngineOptions {
            test: false,
            once: true,
        };
        let (mut engine, site) = engine(&cfg, options);
        site.set_forecast_available(false);
        let mut last = None;
        for minute in 0..3 {
            let now = at(6, 14, minute);
            site.advance_to(now);
            last = Some(engine.tick(now).await);
        }
        let plan = last.and_then(|r| r.plan).expect("planned");
        assert_eq!(plan.pct(), 100);
        assert_eq!(plan.source, TargetSource::MissingForecast);
    }

    #[tokio::test]
    async fn shoulder_afternoon_boost_charges_to_floor() {
        let cfg = PalmConfig::baseline();
        let (mut engine, site) = engine(&cfg, EngineOptions::default());
        let mut boost = None;
        for minute in 0..=3 {
            let now = at(4, 13, minute);
            site.advance_to(now);
            boost = Some(engine.tick(now).await);
        }
        let boost = boost.expect("ticked");
        assert_eq!(boost.inverter, vec![InverterCommand::ChargeNowSoc { to_pct: 60 }]);
        assert_eq!(engine.target().source, TargetSource::Manual);

        // No boost outside winter and shoulder months.
        let (mut engine, site) = self::engine(&cfg, EngineOptions::default());
        for minute in 0..=3 {
            let now = at(6, 13, minute);
            site.advance_to(now);
            let report = engine.tick(now).await;
            assert!(minute == 0 || report.inverter.is_empty());
        }
    }

    #[test]
    fn report_display_lists_switches() {
        let mut r = TickReport::new(at(6, 9, 5), 3, 40);
        r.switches.push(SwitchCommand {
            device_id: "1".into(),
            name: "Pump".into(),
            turn_on: true,
        });
        let s = r.to_string();
        assert!(s.starts_with("2024-06-10 09:05"));
        assert!(s.contains("Pump=ON"));
        assert!(s.contains("target=40%"));
    }
}
