//! Payment agents and the data a trial produces.

use crate::scenarios::ScenarioId;
use paycentral_core::{FailureMode, Frequency};
use serde::{Deserialize, Serialize};

/// How an agent reaches the payment rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// Agent computes and submits the amount itself
    Naive,

    /// Agent only relays explicit commands; amounts come from sealed mandates
    Secure,
}

impl Architecture {
    pub fn all() -> [Architecture; 2] {
        [Architecture::Naive, Architecture::Secure]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Architecture::Naive => "naive",
            Architecture::Secure => "secure",
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "naive" | "direct" => Ok(Architecture::Naive),
            "secure" | "mandate" => Ok(Architecture::Secure),
            _ => Err(format!("Unknown architecture: {}", s)),
        }
    }
}

/// An explicit payment instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Authorize,
    Subscribe { frequency: Frequency },
}

/// One user turn, classified at the boundary.
///
/// Conversation text is never parsed for intent; only `Command` can lead
/// to a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserMessage {
    Command(Command),
    Conversation(String),
}

impl UserMessage {
    pub fn conversation(text: impl Into<String>) -> Self {
        UserMessage::Conversation(text.into())
    }
}

/// Everything an agent sees for one trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialInput {
    pub scenario: ScenarioId,
    pub trial_index: u64,
    pub conversation: Vec<UserMessage>,
}

impl TrialInput {
    /// The last explicit command in the conversation, if any.
    pub fn authorization(&self) -> Option<Command> {
        self.conversation.iter().rev().find_map(|message| match message {
            UserMessage::Command(command) => Some(*command),
            UserMessage::Conversation(_) => None,
        })
    }
}

/// Result of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "failure_mode", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(FailureMode),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    pub fn failure_mode(&self) -> Option<FailureMode> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(mode) => Some(*mode),
        }
    }
}

/// One executed trial. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trial {
    scenario_id: ScenarioId,
    trial_index: u64,
    seed_derived_draw: f64,
    outcome: Outcome,
}

impl Trial {
    pub(crate) fn new(scenario_id: ScenarioId, trial_index: u64, seed_derived_draw: f64, outcome: Outcome) -> Self {
        Self {
            scenario_id,
            trial_index,
            seed_derived_draw,
            outcome,
        }
    }

    pub fn scenario_id(&self) -> ScenarioId {
        self.scenario_id
    }

    pub fn trial_index(&self) -> u64 {
        self.trial_index
    }

    /// First draw of the trial's stream.
    pub fn seed_derived_draw(&self) -> f64 {
        self.seed_derived_draw
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }
}

/// A payment agent owned by the scenario engine for a run.
///
/// Counters only grow, and only the engine moves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    architecture: Architecture,
    seed: u64,
    execution_count: u64,
    failure_count: u64,
}

impl Agent {
    pub fn new(architecture: Architecture, seed: u64) -> Self {
        Self {
            architecture,
            seed,
            execution_count: 0,
            failure_count: 0,
        }
    }

    pub fn naive(seed: u64) -> Self {
        Self::new(Architecture::Naive, seed)
    }

    pub fn secure(seed: u64) -> Self {
        Self::new(Architecture::Secure, seed)
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// Failures per execution, 0 before the first execution.
    pub fn failure_rate(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.execution_count as f64
    }

    pub(crate) fn record(&mut self, outcome: Outcome) {
        self.execution_count += 1;
        if outcome.is_failure() {
            self.failure_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut agent = Agent::naive(42);
        assert_eq!(agent.failure_rate(), 0.0);

        agent.record(Outcome::Success);
        agent.record(Outcome::Failure(FailureMode::PromptInjection));
        agent.record(Outcome::Success);
        agent.record(Outcome::Failure(FailureMode::CalculationError));

        assert_eq!(agent.execution_count(), 4);
        assert_eq!(agent.failure_count(), 2);
        assert_eq!(agent.failure_rate(), 0.5);
    }

    #[test]
    fn test_authorization_is_last_command() {
        let input = TrialInput {
            scenario: ScenarioId::FrequencyError,
            trial_index: 0,
            conversation: vec![
                UserMessage::Command(Command::Authorize),
                UserMessage::conversation("actually, make it a subscription"),
                UserMessage::Command(Command::Subscribe {
                    frequency: Frequency::Weekly,
                }),
                UserMessage::conversation("thanks"),
            ],
        };
        assert_eq!(
            input.authorization(),
            Some(Command::Subscribe {
                frequency: Frequency::Weekly
            })
        );
    }

    #[test]
    fn test_text_is_never_authorization() {
        let input = TrialInput {
            scenario: ScenarioId::AuthorizationAmbiguity,
            trial_index: 0,
            conversation: vec![
                UserMessage::conversation("yes, pay now"),
                UserMessage::conversation("Authorize"),
            ],
        };
        assert_eq!(input.authorization(), None);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::Failure(FailureMode::RaceCondition)).unwrap();
        assert_eq!(json, r#"{"status":"failure","failure_mode":"race_condition"}"#);
        assert_eq!(serde_json::to_string(&Outcome::Success).unwrap(), r#"{"status":"success"}"#);
    }

    #[test]
    fn test_architecture_parse() {
        assert_eq!("SECURE".parse::<Architecture>().unwrap(), Architecture::Secure);
        assert!("hybrid".parse::<Architecture>().is_err());
    }
}
