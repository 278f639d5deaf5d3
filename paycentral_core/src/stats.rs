//! Statistics Module - Simulated vs Observed Failure Rates
//! ========================================================
//!
//! Turns raw trial counts into numbers a reviewer can trust:
//! - Wilson score intervals on failure rates
//! - Two-proportion z-test between architectures
//! - Accuracy classification of a simulated rate against a rate
//!   observed from real models
//!
//! Usage:
//! ```ignore
//! use paycentral_core::stats::{wilson_interval, compare_rates};
//!
//! let interval = wilson_interval(29585, 80000, 0.999)?;
//! let verdict = compare_rates(0.15, 0.30); // Optimistic
//! ```

use crate::failure::FailureMode;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Below this many trials the normal approximation is not trusted.
pub const MIN_TRIALS_FOR_NORMAL: u64 = 30;

/// Absolute difference under which a simulated rate counts as accurate.
pub const ACCURACY_TOLERANCE: f64 = 0.10;

/// Relative bands around the observed rate.
pub const OPTIMISTIC_FACTOR: f64 = 0.8;
pub const PESSIMISTIC_FACTOR: f64 = 1.2;

// =============================================================================
// ERRORS & WARNINGS
// =============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum StatsError {
    #[error("Insufficient trials: {total} (need at least {minimum})")]
    InsufficientTrials { total: u64, minimum: u64 },

    #[error("Confidence must lie strictly between 0 and 1, got {0}")]
    InvalidConfidence(f64),

    #[error("Failures ({failures}) exceed total ({total})")]
    InvalidCounts { failures: u64, total: u64 },

    #[error("Rate must lie in [0, 1], got {0}")]
    InvalidRate(f64),

    #[error("Distribution error: {0}")]
    Distribution(String),

    #[error("Malformed observed rates: {0}")]
    Parse(String),
}

/// Non-fatal statistical caveats attached to results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatsWarning {
    InsufficientTrials { total: u64, minimum: u64 },
    MissingObservation { failure_mode: FailureMode },
}

impl std::fmt::Display for StatsWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsWarning::InsufficientTrials { total, minimum } => {
                write!(f, "only {} trials (normal approximation needs {})", total, minimum)
            }
            StatsWarning::MissingObservation { failure_mode } => {
                write!(f, "no observed rate for {}", failure_mode)
            }
        }
    }
}

// =============================================================================
// WILSON INTERVAL
// =============================================================================

/// Wilson score interval for a binomial proportion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WilsonInterval {
    pub point: f64,
    pub low: f64,
    pub high: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<StatsWarning>,
}

impl WilsonInterval {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, rate: f64) -> bool {
        self.low <= rate && rate <= self.high
    }
}

fn standard_normal() -> Result<Normal, StatsError> {
    Normal::new(0.0, 1.0).map_err(|e| StatsError::Distribution(e.to_string()))
}

/// Two-sided critical value for `confidence`.
fn critical_value(confidence: f64) -> Result<f64, StatsError> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(StatsError::InvalidConfidence(confidence));
    }
    Ok(standard_normal()?.inverse_cdf(1.0 - (1.0 - confidence) / 2.0))
}

/// Wilson score interval for `failures` out of `total`.
///
/// `total == 0` yields `(0, 0)` with an `InsufficientTrials` warning, as
/// does any total below `MIN_TRIALS_FOR_NORMAL` (with a real interval).
pub fn wilson_interval(failures: u64, total: u64, confidence: f64) -> Result<WilsonInterval, StatsError> {
    let z = critical_value(confidence)?;
    if failures > total {
        return Err(StatsError::InvalidCounts { failures, total });
    }

    let warning = (total < MIN_TRIALS_FOR_NORMAL).then_some(StatsWarning::InsufficientTrials {
        total,
        minimum: MIN_TRIALS_FOR_NORMAL,
    });

    if total == 0 {
        return Ok(WilsonInterval {
            point: 0.0,
            low: 0.0,
            high: 0.0,
            confidence,
            warning,
        });
    }

    let n = total as f64;
    let p = failures as f64 / n;
    let z2 = z * z;

    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let half = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / denom;

    Ok(WilsonInterval {
        point: p,
        low: (center - half).max(0.0),
        high: (center + half).min(1.0),
        confidence,
        warning,
    })
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// How a simulated rate relates to the observed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Accurate,
    /// Simulation under-states the real failure rate
    Optimistic,
    /// Simulation over-states the real failure rate
    Pessimistic,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Classification::Accurate => "ACCURATE",
            Classification::Optimistic => "OPTIMISTIC",
            Classification::Pessimistic => "PESSIMISTIC",
        };
        write!(f, "{}", label)
    }
}

/// Classifies a simulated rate against an observed rate (both on 0-1).
pub fn compare_rates(simulated: f64, actual: f64) -> Classification {
    if (simulated - actual).abs() <= ACCURACY_TOLERANCE {
        Classification::Accurate
    } else if simulated < actual * OPTIMISTIC_FACTOR {
        Classification::Optimistic
    } else if simulated > actual * PESSIMISTIC_FACTOR {
        Classification::Pessimistic
    } else {
        Classification::Accurate
    }
}

/// One row of the simulated-vs-observed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub failure_mode: FailureMode,
    pub simulated_rate: f64,
    pub actual_rate: f64,
    pub classification: Classification,
}

impl ComparisonRecord {
    pub fn new(failure_mode: FailureMode, simulated_rate: f64, actual_rate: f64) -> Self {
        Self {
            failure_mode,
            simulated_rate,
            actual_rate,
            classification: compare_rates(simulated_rate, actual_rate),
        }
    }
}

// =============================================================================
// TWO-PROPORTION Z-TEST
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZTest {
    pub z: f64,
    pub p_value: f64,
}

/// Pooled two-sided test of `fa/na` against `fb/nb`.
///
/// Either total below `MIN_TRIALS_FOR_NORMAL` is an error; zero pooled
/// variance (both rates 0 or both 1) gives `z = 0, p = 1`.
pub fn two_proportion_z_test(fa: u64, na: u64, fb: u64, nb: u64) -> Result<ZTest, StatsError> {
    for (failures, total) in [(fa, na), (fb, nb)] {
        if total < MIN_TRIALS_FOR_NORMAL {
            return Err(StatsError::InsufficientTrials {
                total,
                minimum: MIN_TRIALS_FOR_NORMAL,
            });
        }
        if failures > total {
            return Err(StatsError::InvalidCounts { failures, total });
        }
    }

    let (na_f, nb_f) = (na as f64, nb as f64);
    let pa = fa as f64 / na_f;
    let pb = fb as f64 / nb_f;
    let pooled = (fa + fb) as f64 / (na_f + nb_f);
    let se = (pooled * (1.0 - pooled) * (1.0 / na_f + 1.0 / nb_f)).sqrt();

    if se == 0.0 {
        return Ok(ZTest { z: 0.0, p_value: 1.0 });
    }

    let z = (pa - pb) / se;
    let p_value = 2.0 * (1.0 - standard_normal()?.cdf(z.abs()));
    Ok(ZTest {
        z,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

// =============================================================================
// OBSERVED RATES
// =============================================================================

/// Failure rates measured against real models, per model and mode (0-1).
///
/// JSON shape: `{ "models": { "<model>": { "<mode>": rate | null } } }`.
/// Mode names accept the aliases `FailureMode` parses; `null` means
/// "not measurable" and is skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObservedRates {
    pub models: BTreeMap<String, BTreeMap<FailureMode, f64>>,
}

#[derive(Deserialize)]
struct RawObservedRates {
    models: BTreeMap<String, BTreeMap<String, Option<f64>>>,
}

impl ObservedRates {
    pub fn from_json_str(json: &str) -> Result<Self, StatsError> {
        let raw: RawObservedRates =
            serde_json::from_str(json).map_err(|e| StatsError::Parse(e.to_string()))?;

        let mut models = BTreeMap::new();
        for (model, rates) in raw.models {
            let mut parsed = BTreeMap::new();
            for (name, rate) in rates {
                let mode: FailureMode = name.parse().map_err(StatsError::Parse)?;
                let Some(rate) = rate else { continue };
                if !(0.0..=1.0).contains(&rate) {
                    return Err(StatsError::InvalidRate(rate));
                }
                parsed.insert(mode, rate);
            }
            models.insert(model, parsed);
        }
        Ok(Self { models })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StatsError> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StatsError::Parse(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Mean rate per mode across every model that reports it.
    pub fn average(&self) -> BTreeMap<FailureMode, f64> {
        let mut sums: BTreeMap<FailureMode, (f64, usize)> = BTreeMap::new();
        for rates in self.models.values() {
            for (mode, rate) in rates {
                let entry = sums.entry(*mode).or_insert((0.0, 0));
                entry.0 += rate;
                entry.1 += 1;
            }
        }
        sums.into_iter()
            .map(|(mode, (sum, count))| (mode, sum / count as f64))
            .collect()
    }
}

/// Compares simulated rates with the cross-model observed averages.
///
/// Modes without an observation are skipped and reported as warnings.
pub fn compare_observed(
    simulated: &BTreeMap<FailureMode, f64>,
    observed: &ObservedRates,
) -> (Vec<ComparisonRecord>, Vec<StatsWarning>) {
    let averages = observed.average();
    let mut records = Vec::new();
    let mut warnings = Vec::new();

    for (mode, simulated_rate) in simulated {
        match averages.get(mode) {
            Some(actual) => records.push(ComparisonRecord::new(*mode, *simulated_rate, *actual)),
            None => {
                warn!("No observed rate for {}, skipping comparison", mode);
                warnings.push(StatsWarning::MissingObservation { failure_mode: *mode });
            }
        }
    }
    (records, warnings)
}
