//! Error types for the simulation harness.

use paycentral_core::{FailureMode, MandateError, StatsError};
use paycentral_env::EnvError;
use thiserror::Error;

/// Configuration and harness errors.
///
/// Modeled failures are never errors: they are `Outcome::Failure` data.
/// Everything here aborts a run before the first trial.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Calibration missing for {mode}: {reason}")]
    CalibrationMissing { mode: FailureMode, reason: String },

    #[error("Invalid calibration for {mode}: {reason}")]
    InvalidCalibration { mode: String, reason: String },

    #[error(transparent)]
    Mandate(#[from] MandateError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}
