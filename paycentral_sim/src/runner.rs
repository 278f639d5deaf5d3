//! Scenario engine - runs failure-injection trials against an agent.

use crate::agent::{Agent, Architecture, Command, Outcome, Trial, TrialInput};
use crate::calibration::Calibration;
use crate::context::SimContext;
use crate::error::SimError;
use crate::keys::DeterministicKeyProvider;
use crate::rng::TrialStream;
use crate::scenarios::ScenarioId;

use paycentral_core::{
    wilson_interval, ConsumeSemantics, FailureMode, MandateService, StatsWarning, WilsonInterval,
};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Failed trials kept per scenario result.
pub const MAX_SAMPLE_FAILURES: usize = 5;

/// Confidence of the interval attached to every scenario result.
pub const RESULT_CONFIDENCE: f64 = 0.95;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Trials per scenario
    pub trials: u64,

    /// Evaluate trials on the rayon pool
    pub parallel: bool,

    /// Architectures to run
    pub architectures: Vec<Architecture>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            trials: 10_000,
            parallel: true,
            architectures: Architecture::all().to_vec(),
        }
    }
}

/// Results from running one scenario against one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    pub architecture: Architecture,

    pub total_trials: u64,

    pub failures: u64,

    /// failures / total_trials (0-1)
    pub failure_rate: f64,

    /// Failures per mode
    pub by_mode: BTreeMap<FailureMode, u64>,

    /// Wilson interval on the failure rate
    pub interval: WilsonInterval,

    /// First failed trials, in trial order
    pub sample_failures: Vec<Trial>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<StatsWarning>,
}

impl ScenarioResult {
    fn from_trials(scenario: ScenarioId, architecture: Architecture, trials: &[Trial]) -> Result<Self, SimError> {
        let total_trials = trials.len() as u64;
        let mut by_mode = BTreeMap::new();
        for mode in trials.iter().filter_map(|t| t.outcome().failure_mode()) {
            *by_mode.entry(mode).or_insert(0u64) += 1;
        }
        let failures: u64 = by_mode.values().sum();

        let interval = wilson_interval(failures, total_trials, RESULT_CONFIDENCE)?;
        let warnings: Vec<StatsWarning> = interval.warning.iter().cloned().collect();
        for warning in &warnings {
            warn!("{} / {}: {}", architecture, scenario, warning);
        }

        Ok(Self {
            scenario,
            architecture,
            total_trials,
            failures,
            failure_rate: interval.point,
            by_mode,
            interval,
            sample_failures: trials
                .iter()
                .filter(|t| t.outcome().is_failure())
                .take(MAX_SAMPLE_FAILURES)
                .cloned()
                .collect(),
            warnings,
        })
    }
}

/// Runs scenarios against agents.
///
/// Every trial is a pure function of (seed, scenario, trial index): draws
/// come from the trial's own stream and the Secure agent's mandates get
/// seed-derived ids under a virtual clock. Parallel and sequential runs
/// therefore produce the same trial sequence.
pub struct ScenarioEngine {
    config: SimConfig,
    calibration: Calibration,
    keys: DeterministicKeyProvider,
}

impl ScenarioEngine {
    /// Creates a new engine.
    pub fn new(config: SimConfig, calibration: Calibration) -> Result<Self, SimError> {
        let keys = DeterministicKeyProvider::new(config.seed)?;
        Ok(Self {
            config,
            calibration,
            keys,
        })
    }

    /// Sets the trial count.
    pub fn with_trials(mut self, trials: u64) -> Self {
        self.config.trials = trials;
        self
    }

    /// Switches rayon evaluation on or off.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// A fresh mandate service for one run.
    fn mandate_service(&self) -> MandateService<SimContext> {
        MandateService::in_memory(self.keys.signing_secret(), SimContext::shared(self.config.seed))
    }

    /// Runs a single trial and updates the agent's counters.
    pub fn execute(&self, agent: &mut Agent, input: &TrialInput) -> Result<Outcome, SimError> {
        self.calibration.validate(input.scenario.failure_modes())?;
        let service = self.mandate_service();
        let trial = self.evaluate(agent.architecture(), input, &service)?;
        agent.record(trial.outcome());
        Ok(trial.outcome())
    }

    /// Runs `trials` trials of one scenario and updates the agent's counters.
    pub fn run_scenario(&self, agent: &mut Agent, scenario: ScenarioId, trials: u64) -> Result<ScenarioResult, SimError> {
        let executed = self.run_trials(agent.architecture(), scenario, trials)?;
        for trial in &executed {
            agent.record(trial.outcome());
        }
        let result = ScenarioResult::from_trials(scenario, agent.architecture(), &executed)?;

        info!(
            "{} / {}: {} failures in {} trials ({:.2}%)",
            agent.architecture(),
            scenario,
            result.failures,
            result.total_trials,
            result.failure_rate * 100.0
        );
        Ok(result)
    }

    /// Runs every registered scenario in registry order.
    ///
    /// The calibration is checked for all scenarios before the first trial.
    pub fn run_all(&self, agent: &mut Agent, trials: u64) -> Result<Vec<ScenarioResult>, SimError> {
        self.run_selected(agent, &ScenarioId::all(), trials)
    }

    /// Runs the given scenarios in order, after checking all of them.
    pub fn run_selected(
        &self,
        agent: &mut Agent,
        scenarios: &[ScenarioId],
        trials: u64,
    ) -> Result<Vec<ScenarioResult>, SimError> {
        for scenario in scenarios {
            self.calibration.validate(scenario.failure_modes())?;
        }
        scenarios
            .iter()
            .map(|scenario| self.run_scenario(agent, *scenario, trials))
            .collect()
    }

    /// Produces the trial sequence of one scenario without touching an agent.
    pub fn run_trials(
        &self,
        architecture: Architecture,
        scenario: ScenarioId,
        trials: u64,
    ) -> Result<Vec<Trial>, SimError> {
        self.calibration.validate(scenario.failure_modes())?;
        info!(
            "Starting scenario: {} ({}, seed={}, trials={})",
            scenario.name(),
            architecture,
            self.config.seed,
            trials
        );

        let service = self.mandate_service();
        let evaluate = |trial_index: u64| self.evaluate(architecture, &scenario.input(trial_index), &service);

        let executed: Vec<Trial> = if self.config.parallel {
            (0..trials).into_par_iter().map(evaluate).collect::<Result<_, _>>()?
        } else {
            (0..trials).map(evaluate).collect::<Result<_, _>>()?
        };

        if architecture == Architecture::Secure {
            let stats = service.stats();
            debug!(
                "{}: sealed {} mandates, {} charges, {} replays, {} rejections",
                scenario, stats.issued, stats.charges, stats.replays, stats.rejections
            );
        }
        Ok(executed)
    }

    fn evaluate(
        &self,
        architecture: Architecture,
        input: &TrialInput,
        service: &MandateService<SimContext>,
    ) -> Result<Trial, SimError> {
        let scenario = input.scenario;
        let mut stream = TrialStream::new(self.config.seed, scenario.name(), input.trial_index);

        let (draw, outcome) = match architecture {
            Architecture::Naive => self.naive_outcome(scenario, &mut stream)?,
            Architecture::Secure => (stream.next_draw(), self.secure_outcome(input, service)),
        };

        if input.trial_index > 0 && input.trial_index % 1000 == 0 {
            debug!("  {} / {}: trial {}", architecture, scenario, input.trial_index);
        }
        Ok(Trial::new(scenario, input.trial_index, draw, outcome))
    }

    /// First predicate whose draw falls below its threshold wins.
    fn naive_outcome(&self, scenario: ScenarioId, stream: &mut TrialStream) -> Result<(f64, Outcome), SimError> {
        let mut first_draw = None;
        for mode in scenario.failure_modes() {
            let threshold = self.calibration.threshold_for(*mode)?;
            let draw = stream.next_draw();
            let first = *first_draw.get_or_insert(draw);
            if draw < threshold {
                return Ok((first, Outcome::Failure(*mode)));
            }
        }
        let draw = match first_draw {
            Some(draw) => draw,
            None => stream.next_draw(),
        };
        Ok((draw, Outcome::Success))
    }

    /// The sealed-mandate checkout. Never computes money itself.
    fn secure_outcome(&self, input: &TrialInput, service: &MandateService<SimContext>) -> Outcome {
        let scenario = input.scenario;
        let primary = Outcome::Failure(scenario.primary_mode());

        // No explicit instruction, no charge.
        let Some(command) = input.authorization() else {
            return Outcome::Success;
        };

        let mut cart = scenario.cart();
        if let Command::Subscribe { frequency } = command {
            cart = cart.with_recurrence(frequency);
        }

        let mandate_id = self.keys.mandate_id(scenario.name(), input.trial_index);
        let mandate = match service.seal_with_id(&cart, mandate_id) {
            Ok(mandate) => mandate,
            Err(e) => {
                debug!("{} trial {}: seal rejected: {}", scenario, input.trial_index, e);
                return primary;
            }
        };

        if mandate.total() != scenario.expected_total() {
            return Outcome::Failure(FailureMode::CalculationError);
        }
        if mandate.currency() != scenario.expected_currency() {
            return Outcome::Failure(FailureMode::CurrencyConfusion);
        }
        if mandate.recurrence() != scenario.expected_recurrence() {
            return Outcome::Failure(FailureMode::FrequencyError);
        }

        let settle = || service.consume(&mandate, ConsumeSemantics::ReplayExisting);
        let first = if scenario.submits_twice() {
            let (first, second) = rayon::join(settle, settle);
            match (first, second) {
                (Ok(first), Ok(second)) if first == second && service.charges_for(&mandate_id) == 1 => first,
                (Ok(_), Ok(_)) => return Outcome::Failure(FailureMode::RaceCondition),
                (Err(e), _) | (_, Err(e)) => {
                    debug!("{} trial {}: settlement rejected: {}", scenario, input.trial_index, e);
                    return primary;
                }
            }
        } else {
            match settle() {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!("{} trial {}: settlement rejected: {}", scenario, input.trial_index, e);
                    return primary;
                }
            }
        };

        if first.amount != mandate.total() {
            return Outcome::Failure(FailureMode::PriceHallucination);
        }
        Outcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn calibration() -> Calibration {
        Calibration::new()
            .with_rate(FailureMode::PriceHallucination, 0.15, "test")
            .with_rate(FailureMode::PromptInjection, 0.51, "test")
            .with_rate(FailureMode::ContextOverflow, 0.24, "test")
            .with_rate(FailureMode::CalculationError, 0.08, "test")
            .with_rate(FailureMode::AuthorizationAmbiguity, 0.60, "test")
            .with_rate(FailureMode::RaceCondition, 1.0, "test")
            .with_rate(FailureMode::FrequencyError, 0.15, "test")
            .with_rate(FailureMode::CurrencyConfusion, 0.055, "test")
    }

    fn engine(seed: u64) -> ScenarioEngine {
        let config = SimConfig {
            seed,
            trials: 2_000,
            ..Default::default()
        };
        ScenarioEngine::new(config, calibration()).unwrap()
    }

    fn outcomes(trials: &[Trial]) -> Vec<Outcome> {
        trials.iter().map(|t| t.outcome()).collect()
    }

    #[test]
    fn test_same_seed_same_trials() {
        let a = engine(42).run_trials(Architecture::Naive, ScenarioId::ContextOverflow, 2_000).unwrap();
        let b = engine(42).run_trials(Architecture::Naive, ScenarioId::ContextOverflow, 2_000).unwrap();
        assert_eq!(a, b);

        let c = engine(43).run_trials(Architecture::Naive, ScenarioId::ContextOverflow, 2_000).unwrap();
        assert_ne!(outcomes(&a), outcomes(&c));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        for scenario in ScenarioId::all() {
            for architecture in Architecture::all() {
                let parallel = engine(7).with_parallel(true).run_trials(architecture, scenario, 500).unwrap();
                let sequential = engine(7).with_parallel(false).run_trials(architecture, scenario, 500).unwrap();
                assert_eq!(parallel, sequential, "{} / {}", architecture, scenario);
            }
        }
    }

    #[test]
    fn test_isolated_scenario_equals_batch_member() {
        let engine = engine(42);

        let mut solo_agent = Agent::naive(42);
        let solo = engine.run_scenario(&mut solo_agent, ScenarioId::CurrencyConfusion, 1_000).unwrap();

        let mut batch_agent = Agent::naive(42);
        let batch = engine.run_all(&mut batch_agent, 1_000).unwrap();
        let member = batch.iter().find(|r| r.scenario == ScenarioId::CurrencyConfusion).unwrap();

        assert_eq!(&solo, member);
        assert_eq!(batch.len(), ScenarioId::all().len());
        assert_eq!(batch_agent.execution_count(), 8_000);
    }

    #[test]
    fn test_naive_rates_track_calibration() {
        let engine = engine(42);
        let mut agent = Agent::naive(42);

        let result = engine.run_scenario(&mut agent, ScenarioId::CalculationError, 10_000).unwrap();
        assert!((result.failure_rate - 0.08).abs() < 0.015, "rate {}", result.failure_rate);
        assert!(result.interval.contains(result.failure_rate));

        let race = engine.run_scenario(&mut agent, ScenarioId::RaceCondition, 100).unwrap();
        assert_eq!(race.failures, 100);
    }

    #[test]
    fn test_priority_first_mode_wins() {
        // both predicates always fire: hallucination is checked first
        let calibration = Calibration::new()
            .with_rate(FailureMode::PriceHallucination, 1.0, "test")
            .with_rate(FailureMode::PromptInjection, 1.0, "test");
        let engine = ScenarioEngine::new(SimConfig::default(), calibration).unwrap();

        let trials = engine.run_trials(Architecture::Naive, ScenarioId::PromptInjection, 200).unwrap();
        assert!(trials
            .iter()
            .all(|t| t.outcome() == Outcome::Failure(FailureMode::PriceHallucination)));
    }

    #[test]
    fn test_later_mode_fires_only_when_earlier_misses() {
        let calibration = Calibration::new()
            .with_rate(FailureMode::PriceHallucination, 0.0, "test")
            .with_rate(FailureMode::PromptInjection, 1.0, "test");
        let engine = ScenarioEngine::new(SimConfig::default(), calibration).unwrap();

        let trials = engine.run_trials(Architecture::Naive, ScenarioId::PromptInjection, 200).unwrap();
        assert!(trials
            .iter()
            .all(|t| t.outcome() == Outcome::Failure(FailureMode::PromptInjection)));
    }

    #[test]
    fn test_secure_agent_never_fails() {
        let engine = engine(42);
        let mut agent = Agent::secure(42);

        let results = engine.run_all(&mut agent, 300).unwrap();

        assert!(results.iter().all(|r| r.failures == 0));
        assert_eq!(agent.failure_count(), 0);
        assert_eq!(agent.execution_count(), 2_400);
    }

    #[test]
    fn test_execute_updates_counters() {
        let engine = ScenarioEngine::new(
            SimConfig::default(),
            Calibration::new().with_rate(FailureMode::RaceCondition, 1.0, "test"),
        )
        .unwrap();
        let mut agent = Agent::naive(1);

        let outcome = engine.execute(&mut agent, &ScenarioId::RaceCondition.input(0)).unwrap();

        assert_eq!(outcome, Outcome::Failure(FailureMode::RaceCondition));
        assert_eq!((agent.execution_count(), agent.failure_count()), (1, 1));

        let mut secure = Agent::secure(1);
        let outcome = engine.execute(&mut secure, &ScenarioId::RaceCondition.input(0)).unwrap();
        assert_eq!(outcome, Outcome::Success);
        assert_eq!((secure.execution_count(), secure.failure_count()), (1, 0));
    }

    #[test]
    fn test_missing_calibration_fails_before_any_trial() {
        let calibration = calibration().with_rate(FailureMode::CurrencyConfusion, 0.05, "");
        let engine = ScenarioEngine::new(SimConfig::default(), calibration).unwrap();
        let mut agent = Agent::naive(42);

        let err = engine.run_all(&mut agent, 100).unwrap_err();

        assert!(matches!(err, SimError::CalibrationMissing { mode: FailureMode::CurrencyConfusion, .. }));
        assert_eq!(agent.execution_count(), 0);
    }

    #[test]
    fn test_sample_failures_are_capped_and_ordered() {
        let engine = engine(42);
        let mut agent = Agent::naive(42);
        let result = engine.run_scenario(&mut agent, ScenarioId::AuthorizationAmbiguity, 500).unwrap();

        assert_eq!(result.sample_failures.len(), MAX_SAMPLE_FAILURES);
        assert!(result
            .sample_failures
            .windows(2)
            .all(|w| w[0].trial_index() < w[1].trial_index()));
        assert_eq!(result.by_mode.values().sum::<u64>(), result.failures);
    }

    #[test]
    fn test_zero_trials_warns() {
        let engine = engine(42);
        let mut agent = Agent::naive(42);
        let result = engine.run_scenario(&mut agent, ScenarioId::PriceHallucination, 0).unwrap();

        assert_eq!(result.failures, 0);
        assert_eq!(result.failure_rate, 0.0);
        assert!(matches!(result.warnings[..], [StatsWarning::InsufficientTrials { total: 0, .. }]));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_runs_are_reproducible(seed: u64, trials in 1u64..300) {
            let a = engine(seed).run_trials(Architecture::Naive, ScenarioId::PriceHallucination, trials).unwrap();
            let b = engine(seed).with_parallel(false).run_trials(Architecture::Naive, ScenarioId::PriceHallucination, trials).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
