//! Error types shared by the planner, the control loop and its collaborators.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by an external collaborator (inverter, forecast service,
/// switch driver, ...).
///
/// Every variant is transient from the control loop's point of view: the
/// caller logs it and keeps its last known value.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("device {device} rejected command")]
    Rejected { device: String },
}

/// Errors raised while decoding or assembling a generation forecast.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("percentile series differ in length: {pessimistic}/{median}/{optimistic}")]
    LengthMismatch {
        pessimistic: usize,
        median: usize,
        optimistic: usize,
    },

    #[error("slot length must divide a day, got {0} minutes")]
    BadSlotLength(u32),

    #[error("forecast payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported forecast period \"{0}\"")]
    BadPeriod(String),

    #[error("forecast payload contains no periods")]
    Empty,

    #[error("cannot read forecast: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error for operations that touch files or collaborators.
#[derive(Debug, Error)]
pub enum PalmError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PalmError>;
