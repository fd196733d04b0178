//! File-backed collaborators and CSV export.

pub mod export;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Local, NaiveDate, TimeZone, Utc};
use tracing::info;

use crate::collab::{ForecastProvider, LoadHistoryProvider};
use crate::error::{CollaboratorError, Result};
use crate::forecast::GenerationForecast;
use crate::forecast::solcast::{SolcastPayload, to_forecast};
use crate::history::LoadProfile;

/// Days of slots kept from a forecast file; the planner simulates two.
const FORECAST_SLOT_DAYS: usize = 2;

/// Reads saved forecast payloads (one file per array) on every fetch.
#[derive(Debug, Clone)]
pub struct JsonFileForecast {
    paths: Vec<PathBuf>,
    slot_minutes: u32,
}

impl JsonFileForecast {
    pub fn new(paths: Vec<PathBuf>, slot_minutes: u32) -> Self {
        Self {
            paths,
            slot_minutes,
        }
    }
}

#[async_trait]
impl ForecastProvider for JsonFileForecast {
    async fn fetch_forecast(
        &self,
        planning_day: NaiveDate,
    ) -> std::result::Result<GenerationForecast, CollaboratorError> {
        let payloads = self
            .paths
            .iter()
            .map(|p| SolcastPayload::from_json_file(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CollaboratorError::Malformed(e.to_string()))?;

        let midnight = planning_day.and_time(chrono::NaiveTime::MIN);
        let local_midnight = Local
            .from_local_datetime(&midnight)
            .earliest()
            .map_or_else(|| midnight.and_utc(), |t| t.with_timezone(&Utc));

        to_forecast(&payloads, local_midnight, self.slot_minutes, FORECAST_SLOT_DAYS)
            .map_err(|e| CollaboratorError::Malformed(e.to_string()))
    }
}

/// Prior-day load profiles read once from CSV, most recent day first.
#[derive(Debug, Clone)]
pub struct CsvHistory {
    slot_minutes: u32,
    days: Vec<LoadProfile>,
}

impl CsvHistory {
    /// Reads the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(slot_minutes: u32, path: &Path) -> Result<Self> {
        let days = LoadProfile::read_csv_days(slot_minutes, path)?;
        info!(days = days.len(), path = %path.display(), "load history read");
        Ok(Self { slot_minutes, days })
    }

    pub fn from_days(slot_minutes: u32, days: Vec<LoadProfile>) -> Self {
        Self { slot_minutes, days }
    }
}

#[async_trait]
impl LoadHistoryProvider for CsvHistory {
    async fn day_profile(
        &self,
        days_ago: usize,
        slot_minutes: u32,
    ) -> std::result::Result<LoadProfile, CollaboratorError> {
        if slot_minutes != self.slot_minutes {
            return Err(CollaboratorError::Malformed(format!(
                "history has {}-minute slots, {slot_minutes} requested",
                self.slot_minutes
            )));
        }
        days_ago
            .checked_sub(1)
            .and_then(|i| self.days.get(i))
            .cloned()
            .ok_or_else(|| CollaboratorError::Malformed(format!("no history {days_ago} days ago")))
    }
}
