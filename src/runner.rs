//! Drives the engine from the wall clock or from a simulated clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::engine::{Engine, TickReport};
use crate::site::SimulatedSite;

/// Normal tick period.
pub const TICK_PERIOD: Duration = Duration::from_secs(60);
/// Accelerated tick period for test and once modes.
pub const FAST_TICK_PERIOD: Duration = Duration::from_secs(5);
/// Reports kept by a wall-clock run: one week of minutes.
pub const WALL_CLOCK_REPORT_LIMIT: usize = 7 * 1440;

/// Owns the engine and, when simulating, the site whose clock it drives.
pub struct Runner {
    engine: Engine,
    site: Option<Arc<SimulatedSite>>,
    keep_reports: bool,
    report_limit: Option<usize>,
    reports: Vec<TickReport>,
}

impl Runner {
    pub fn new(engine: Engine, site: Option<Arc<SimulatedSite>>) -> Self {
        Self {
            engine,
            site,
            keep_reports: true,
            report_limit: None,
            reports: Vec::new(),
        }
    }

    /// Whether tick reports are collected for export. Long wall-clock runs
    /// should turn this off.
    pub fn keep_reports(mut self, keep: bool) -> Self {
        self.keep_reports = keep;
        self
    }

    /// Keeps only the newest `limit` reports; older ones are dropped as new
    /// ticks arrive.
    pub fn report_limit(mut self, limit: Option<usize>) -> Self {
        self.report_limit = limit;
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn reports(&self) -> &[TickReport] {
        &self.reports
    }

    async fn tick(&mut self, now: NaiveDateTime) -> bool {
        if let Some(site) = &self.site {
            site.advance_to(now);
        }
        let report = self.engine.tick(now).await;
        info!("{report}");
        let finished = report.finished;
        if self.keep_reports {
            self.reports.push(report);
            if let Some(limit) = self.report_limit {
                let excess = self.reports.len().saturating_sub(limit);
                if excess > 0 {
                    self.reports.drain(..excess);
                }
            }
        }
        finished
    }

    /// Runs `minutes` simulated minutes starting at `start`, as fast as
    /// possible. Background writes are awaited after every tick so the
    /// site sees them before the next minute. Stops early once a once-mode
    /// run has finished.
    pub async fn run_simulated(&mut self, start: NaiveDateTime, minutes: usize) {
        let mut clock = Clock::new(start, minutes);
        while let Some(now) = clock.tick() {
            let finished = self.tick(now).await;
            self.engine.flush().await;
            if finished {
                break;
            }
        }
        info!(ticks = self.reports.len(), "simulation complete");
    }

    /// Ticks on the wall clock until interrupted, or until a once-mode run
    /// has finished.
    pub async fn run_wall_clock(&mut self, fast: bool) {
        let period = if fast { FAST_TICK_PERIOD } else { TICK_PERIOD };
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                result = &mut ctrl_c => {
                    if let Err(e) = result {
                        warn!(error = %e, "cannot listen for interrupt");
                    }
                    info!("interrupted, stopping");
                    break;
                }
            }
            let now = Local::now().naive_local();
            let now = now
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(now);
            if self.tick(now).await {
                break;
            }
        }
        self.engine.flush().await;
    }

    /// Returns the engine and collected reports.
    pub fn into_parts(self) -> (Engine, Vec<TickReport>) {
        (self.engine, self.reports)
    }
}
