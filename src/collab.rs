//! Contracts of the external systems the control loop talks to.
//!
//! Every call returns a [`CollaboratorError`] on failure; the engine wraps
//! each in a timeout and falls back to its last known value.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::CollaboratorError;
use crate::forecast::GenerationForecast;
use crate::history::LoadProfile;
use crate::inverter::{Register, RegisterValue, RegisterWrite};
use crate::telemetry::TelemetrySample;

/// Supplies the three-percentile PV forecast.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    /// Forecast whose first slot is local midnight of `planning_day`.
    async fn fetch_forecast(
        &self,
        planning_day: NaiveDate,
    ) -> Result<GenerationForecast, CollaboratorError>;
}

/// Supplies recorded consumption for previous days.
#[async_trait]
pub trait LoadHistoryProvider: Send + Sync {
    /// Per-slot consumption for the day `days_ago` days before today (1 is
    /// yesterday).
    async fn day_profile(
        &self,
        days_ago: usize,
        slot_minutes: u32,
    ) -> Result<LoadProfile, CollaboratorError>;
}

/// Supplies live inverter readings.
#[async_trait]
pub trait TelemetryProvider: Send + Sync {
    async fn latest(&self) -> Result<TelemetrySample, CollaboratorError>;

    /// Power drawn by the EV charger, if the site meters one.
    async fn ev_power_w(&self) -> Result<Option<f32>, CollaboratorError> {
        Ok(None)
    }
}

/// Supplies grid carbon intensity and weather.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Half-hourly CO₂ intensity forecast (g/kWh) starting now.
    async fn co2_forecast(&self) -> Result<Vec<f32>, CollaboratorError>;

    async fn temperature_c(&self) -> Result<f32, CollaboratorError>;
}

/// Switches controllable loads.
#[async_trait]
pub trait SwitchDriver: Send + Sync {
    async fn set_switch(&self, device_id: &str, on: bool) -> Result<(), CollaboratorError>;
}

/// Reads and writes inverter holding registers.
#[async_trait]
pub trait InverterLink: Send + Sync {
    async fn write_register(&self, write: &RegisterWrite) -> Result<(), CollaboratorError>;

    async fn read_register(&self, register: Register) -> Result<RegisterValue, CollaboratorError>;
}

/// The full set of collaborators handed to the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub forecast: Arc<dyn ForecastProvider>,
    pub history: Arc<dyn LoadHistoryProvider>,
    pub telemetry: Arc<dyn TelemetryProvider>,
    pub environment: Arc<dyn EnvironmentProvider>,
    pub switches: Arc<dyn SwitchDriver>,
    pub inverter: Arc<dyn InverterLink>,
}

/// Awaits `call`, turning an elapsed `limit` into [`CollaboratorError::Timeout`].
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, CollaboratorError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| CollaboratorError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_call_times_out() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CollaboratorError::Timeout(_))));
    }

    #[tokio::test]
    async fn errors_pass_through() {
        let result: Result<(), _> = with_timeout(Duration::from_secs(1), async {
            Err(CollaboratorError::Malformed("short payload".into()))
        })
        .await;
        assert!(matches!(result, Err(CollaboratorError::Malformed(_))));
    }
}
