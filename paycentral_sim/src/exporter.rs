//! JSON result snapshot.
//!
//! The snapshot carries no wall-clock values, so two runs with the same
//! seed and trial count write byte-identical files.

use crate::agent::Architecture;
use crate::runner::ScenarioResult;
use crate::scenarios::ScenarioId;
use paycentral_core::{compare_observed, ComparisonRecord, FailureMode, ObservedRates, ZTest};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// All scenario results of one architecture.
#[derive(Debug, Clone, Serialize)]
pub struct ArchitectureReport {
    pub scenarios: BTreeMap<String, ScenarioResult>,
    pub total_failures: u64,
    pub total_trials: u64,

    /// Percent
    pub overall_failure_rate: f64,
}

impl ArchitectureReport {
    pub fn from_results(results: &[ScenarioResult]) -> Self {
        let total_failures = results.iter().map(|r| r.failures).sum();
        let total_trials = results.iter().map(|r| r.total_trials).sum();
        Self {
            scenarios: results
                .iter()
                .map(|r| (r.scenario.name().to_string(), r.clone()))
                .collect(),
            total_failures,
            total_trials,
            overall_failure_rate: percent(total_failures, total_trials),
        }
    }

    /// Rate (0-1) at which each scenario's own mode fired.
    ///
    /// Failures attributed to higher-priority modes the scenario also
    /// exposes are not counted.
    pub fn rates_by_mode(&self) -> BTreeMap<FailureMode, f64> {
        self.scenarios
            .values()
            .map(|r| {
                let mode = r.scenario.primary_mode();
                let fired = r.by_mode.get(&mode).copied().unwrap_or(0);
                (mode, fraction(fired, r.total_trials))
            })
            .collect()
    }
}

/// Headline numbers, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub naive_rate: f64,
    pub secure_rate: f64,

    /// Percentage points removed by the sealed-mandate architecture
    pub improvement: f64,
}

/// Run metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMeta {
    pub seed: u64,
    pub trials_per_scenario: u64,
    pub scenarios: Vec<String>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSnapshot {
    pub meta: RunMeta,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub naive: Option<ArchitectureReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<ArchitectureReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,

    /// Naive vs secure two-proportion test over all trials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub significance: Option<ZTest>,

    /// Simulated vs observed rates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<Vec<ComparisonRecord>>,

    pub warnings: Vec<String>,
}

impl SimulationSnapshot {
    /// Creates a new export container.
    pub fn new(seed: u64, trials_per_scenario: u64, scenarios: &[ScenarioId]) -> Self {
        Self {
            meta: RunMeta {
                seed,
                trials_per_scenario,
                scenarios: scenarios.iter().map(|s| s.name().to_string()).collect(),
            },
            naive: None,
            secure: None,
            comparison: None,
            significance: None,
            validation: None,
            warnings: Vec::new(),
        }
    }

    /// Adds one architecture's results.
    pub fn add_results(&mut self, architecture: Architecture, results: &[ScenarioResult]) {
        for result in results {
            for warning in &result.warnings {
                self.warnings
                    .push(format!("{}/{}: {}", architecture, result.scenario, warning));
            }
        }
        let report = ArchitectureReport::from_results(results);
        match architecture {
            Architecture::Naive => self.naive = Some(report),
            Architecture::Secure => self.secure = Some(report),
        }
    }

    /// Fills in the headline comparison and the significance test.
    pub fn finalize(&mut self) {
        let (Some(naive), Some(secure)) = (&self.naive, &self.secure) else {
            return;
        };
        self.comparison = Some(Comparison {
            naive_rate: naive.overall_failure_rate,
            secure_rate: secure.overall_failure_rate,
            improvement: naive.overall_failure_rate - secure.overall_failure_rate,
        });

        match paycentral_core::two_proportion_z_test(
            naive.total_failures,
            naive.total_trials,
            secure.total_failures,
            secure.total_trials,
        ) {
            Ok(test) => self.significance = Some(test),
            Err(e) => self.warnings.push(format!("significance test skipped: {}", e)),
        }
    }

    /// Compares the naive rates with rates observed from real models.
    pub fn validate_against(&mut self, observed: &ObservedRates) {
        let Some(naive) = &self.naive else {
            self.warnings
                .push("validation skipped: no naive results".to_string());
            return;
        };
        let (records, warnings) = compare_observed(&naive.rates_by_mode(), observed);
        self.warnings
            .extend(warnings.into_iter().map(|w| format!("validation: {}", w)));
        self.validation = Some(records);
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self.to_json_pretty()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

fn fraction(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64
}

fn percent(part: u64, total: u64) -> f64 {
    fraction(part, total) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::calibration::Calibration;
    use crate::runner::{ScenarioEngine, SimConfig};
    use paycentral_core::Classification;

    fn snapshot(seed: u64) -> SimulationSnapshot {
        let calibration = Calibration::from_toml_str(include_str!("../../config/calibration.toml")).unwrap();
        let engine = ScenarioEngine::new(SimConfig { seed, ..Default::default() }, calibration).unwrap();

        let mut snapshot = SimulationSnapshot::new(seed, 400, &ScenarioId::all());
        for architecture in Architecture::all() {
            let mut agent = Agent::new(architecture, seed);
            let results = engine.run_all(&mut agent, 400).unwrap();
            snapshot.add_results(architecture, &results);
        }
        snapshot.finalize();
        snapshot
    }

    #[test]
    fn test_snapshot_is_byte_identical_across_runs() {
        let a = snapshot(42).to_json_pretty().unwrap();
        let b = snapshot(42).to_json_pretty().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_comparison_and_totals() {
        let snapshot = snapshot(42);
        let naive = snapshot.naive.as_ref().unwrap();
        let secure = snapshot.secure.as_ref().unwrap();
        let comparison = snapshot.comparison.unwrap();

        assert_eq!(naive.total_trials, 3_200);
        assert_eq!(secure.total_failures, 0);
        assert_eq!(comparison.secure_rate, 0.0);
        assert!(comparison.naive_rate > 20.0);
        assert_eq!(comparison.improvement, comparison.naive_rate);
        assert!(snapshot.significance.unwrap().p_value < 1e-6);
    }

    #[test]
    fn test_validation_block() {
        let mut snapshot = snapshot(42);
        let observed = ObservedRates::from_json_str(include_str!("../../config/observed_rates.json")).unwrap();

        snapshot.validate_against(&observed);

        let records = snapshot.validation.as_ref().unwrap();
        assert_eq!(records.len(), 7);
        assert!(records.iter().all(|r| r.failure_mode != FailureMode::RaceCondition));
        assert!(snapshot.warnings.iter().any(|w| w.contains("race_condition")));

        let injection = records
            .iter()
            .find(|r| r.failure_mode == FailureMode::PromptInjection)
            .unwrap();
        assert_eq!(injection.classification, Classification::Pessimistic);
    }

    #[test]
    fn test_mode_rates_exclude_earlier_modes() {
        let calibration = Calibration::from_toml_str(include_str!("../../config/calibration.toml")).unwrap();
        let engine = ScenarioEngine::new(SimConfig::default(), calibration).unwrap();
        let scenarios = [ScenarioId::ContextOverflow];

        let mut agent = Agent::naive(42);
        let results = engine.run_selected(&mut agent, &scenarios, 10_000).unwrap();
        let mut snapshot = SimulationSnapshot::new(42, 10_000, &scenarios);
        snapshot.add_results(Architecture::Naive, &results);

        let result = &results[0];
        let own = result.by_mode[&FailureMode::ContextOverflow];
        assert!(own < result.failures);

        let rates = snapshot.naive.as_ref().unwrap().rates_by_mode();
        assert_eq!(rates[&FailureMode::ContextOverflow], own as f64 / 10_000.0);

        let observed = ObservedRates::from_json_str(include_str!("../../config/observed_rates.json")).unwrap();
        snapshot.validate_against(&observed);
        let records = snapshot.validation.as_ref().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failure_mode, FailureMode::ContextOverflow);
        assert_eq!(records[0].classification, Classification::Accurate);
    }

    #[test]
    fn test_write_to_file() {
        let snapshot = snapshot(7);
        let path = std::env::temp_dir().join(format!("paycentral_snapshot_{}.json", std::process::id()));

        snapshot.write_to_file(&path).unwrap();
        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(written["meta"]["seed"], 7);
        assert_eq!(written["meta"]["scenarios"].as_array().unwrap().len(), 8);
        assert!(written["naive"]["scenarios"]["race_condition"]["failure_rate"].is_number());
        let _ = std::fs::remove_file(&path);
    }
}
