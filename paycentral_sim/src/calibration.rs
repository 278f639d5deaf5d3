//! Failure-rate calibration.
//!
//! Thresholds are external configuration, never constants in code. Each
//! threshold must come with a citation of where the number came from;
//! an uncited threshold counts as missing.
//!
//! ```toml
//! [rates.price_hallucination]
//! threshold = 0.15
//! citation = "Observed hallucination rate of production chat agents"
//! ```

use crate::error::SimError;
use paycentral_core::FailureMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One calibrated predicate threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedRate {
    /// Probability in [0, 1] that the predicate fires
    pub threshold: f64,

    /// Provenance of the number
    #[serde(default)]
    pub citation: String,
}

#[derive(Deserialize)]
struct RawCalibration {
    #[serde(default)]
    rates: BTreeMap<String, CalibratedRate>,
}

/// Thresholds for every configured failure mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Calibration {
    rates: BTreeMap<FailureMode, CalibratedRate>,
}

impl Calibration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document with a `[rates.<mode>]` table per mode.
    pub fn from_toml_str(document: &str) -> Result<Self, SimError> {
        let raw: RawCalibration =
            toml::from_str(document).map_err(|e| SimError::Parse(format!("calibration: {}", e)))?;

        let mut rates = BTreeMap::new();
        for (name, rate) in raw.rates {
            let mode: FailureMode = name.parse().map_err(|reason| SimError::InvalidCalibration {
                mode: name.clone(),
                reason,
            })?;
            rates.insert(mode, rate);
        }
        Ok(Self { rates })
    }

    /// Reads a TOML calibration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let document = std::fs::read_to_string(path)?;
        Self::from_toml_str(&document)
    }

    /// Sets one threshold (builder style).
    pub fn with_rate(mut self, mode: FailureMode, threshold: f64, citation: impl Into<String>) -> Self {
        self.rates.insert(
            mode,
            CalibratedRate {
                threshold,
                citation: citation.into(),
            },
        );
        self
    }

    pub fn rate(&self, mode: FailureMode) -> Option<&CalibratedRate> {
        self.rates.get(&mode)
    }

    /// The validated threshold for `mode`.
    pub fn threshold_for(&self, mode: FailureMode) -> Result<f64, SimError> {
        let rate = self.rates.get(&mode).ok_or_else(|| SimError::CalibrationMissing {
            mode,
            reason: "no threshold configured".to_string(),
        })?;

        if rate.citation.trim().is_empty() {
            return Err(SimError::CalibrationMissing {
                mode,
                reason: "threshold has no citation".to_string(),
            });
        }
        if !rate.threshold.is_finite() || !(0.0..=1.0).contains(&rate.threshold) {
            return Err(SimError::InvalidCalibration {
                mode: mode.name().to_string(),
                reason: format!("threshold {} outside [0, 1]", rate.threshold),
            });
        }
        Ok(rate.threshold)
    }

    /// Checks every mode in `modes`, failing on the first problem.
    pub fn validate(&self, modes: &[FailureMode]) -> Result<(), SimError> {
        for mode in modes {
            self.threshold_for(*mode)?;
        }
        Ok(())
    }
}
