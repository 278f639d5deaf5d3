//! PayCentral Deterministic Failure-Injection Harness
//!
//! This crate runs the same payment scenarios against two agent
//! architectures and counts how often each one charges the wrong thing:
//! - **Naive**: the language model computes and submits the amount directly
//! - **Secure**: the model only proposes a cart; the amount is computed
//!   exactly, sealed into a `CartMandate` and settled once
//!
//! # Core Principle: Replayable Trials
//!
//! All sources of non-determinism are controlled:
//! - **Randomness**: every trial draws from its own stream, derived from
//!   (seed, scenario, trial index)
//! - **Time**: mandates are sealed under a virtual clock
//! - **Identity**: signing secret and mandate ids come from the seed
//!
//! A run is therefore identical whether trials execute on the rayon pool or
//! one after another.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ScenarioEngine                        │
//! │   Calibration (TOML)          TrialStream (seed, id, index)  │
//! │          │                              │                    │
//! │   ┌──────▼──────┐               ┌───────▼───────┐            │
//! │   │ Naive agent │               │ Secure agent  │            │
//! │   │ draw < rate │               │ seal/consume  │            │
//! │   └──────┬──────┘               └───────┬───────┘            │
//! │          └────────────┬─────────────────┘                    │
//! │               ScenarioResult + Wilson interval               │
//! └───────────────────────┬──────────────────────────────────────┘
//!                         ▼
//!              SimulationSnapshot (JSON)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use paycentral_sim::{Agent, Calibration, ScenarioEngine, SimConfig};
//!
//! let calibration = Calibration::from_file("config/calibration.toml")?;
//! let engine = ScenarioEngine::new(SimConfig::default(), calibration)?;
//!
//! let mut agent = Agent::naive(42);
//! let results = engine.run_all(&mut agent, 10_000)?;
//! ```

mod agent;
mod calibration;
mod context;
mod error;
mod exporter;
mod keys;
mod rng;
mod runner;
pub mod scenarios;

pub use agent::{Agent, Architecture, Command, Outcome, Trial, TrialInput, UserMessage};
pub use calibration::{CalibratedRate, Calibration};
pub use context::SimContext;
pub use error::SimError;
pub use exporter::{ArchitectureReport, Comparison, RunMeta, SimulationSnapshot};
pub use keys::DeterministicKeyProvider;
pub use rng::{next, TrialStream};
pub use runner::{ScenarioEngine, ScenarioResult, SimConfig, MAX_SAMPLE_FAILURES, RESULT_CONFIDENCE};
