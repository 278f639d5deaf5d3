//! PayCentral Simulator CLI
//!
//! Run the failure-injection scenarios, or seal and verify live carts.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use paycentral_core::{two_proportion_z_test, Cart, CartMandate, FailureMode, MandateService, ObservedRates};
use paycentral_env::{SigningSecret, SystemContext};
use paycentral_sim::scenarios::ScenarioId;
use paycentral_sim::{Agent, Architecture, Calibration, ScenarioEngine, SimConfig, SimulationSnapshot};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// PayCentral failure-injection simulator
#[derive(Parser, Debug)]
#[command(name = "paycentral-sim")]
#[command(about = "Compare direct and sealed-mandate payment agents", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,

    #[command(flatten)]
    simulate: SimulateArgs,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run scenarios against both architectures (default)
    Simulate(SimulateArgs),

    /// Seal a JSON cart with the secret from PAYCENTRAL_SIGNING_KEY
    Seal {
        #[arg(long)]
        cart: PathBuf,
    },

    /// Check a sealed mandate against the secret from PAYCENTRAL_SIGNING_KEY
    Verify {
        #[arg(long)]
        mandate: PathBuf,
    },

    /// Two-proportion z-test on failure counts
    Ztest {
        #[arg(long)]
        failures_a: u64,
        #[arg(long)]
        total_a: u64,
        #[arg(long)]
        failures_b: u64,
        #[arg(long)]
        total_b: u64,
    },
}

#[derive(Args, Debug, Clone)]
struct SimulateArgs {
    /// Master seed for determinism
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Trials per scenario
    #[arg(short, long, default_value = "10000")]
    trials: u64,

    /// Scenario to run (price_hallucination, prompt_injection, context_overflow,
    /// calculation_error, authorization_ambiguity, race_condition, frequency_error,
    /// currency_confusion, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Architecture to run (naive, secure, both)
    #[arg(short, long, default_value = "both")]
    architecture: String,

    /// Calibrated failure thresholds
    #[arg(long, default_value = "config/calibration.toml")]
    calibration: PathBuf,

    /// Failure rates observed from real models, for validation
    #[arg(long)]
    observed: Option<PathBuf>,

    /// Write the result snapshot to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Evaluate trials on one thread
    #[arg(long)]
    sequential: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let simulate = match &cli.command {
        Some(Cmd::Simulate(args)) => Some(args),
        None => Some(&cli.simulate),
        _ => None,
    };
    let level = match simulate {
        Some(args) if args.verbose => "debug",
        Some(args) if args.json => "warn",
        _ => "info",
    };
    init_logging(level);

    let result = match cli.command {
        Some(Cmd::Seal { cart }) => seal(&cart),
        Some(Cmd::Verify { mandate }) => verify(&mandate),
        Some(Cmd::Ztest {
            failures_a,
            total_a,
            failures_b,
            total_b,
        }) => ztest(failures_a, total_a, failures_b, total_b),
        Some(Cmd::Simulate(args)) => simulate_cmd(&args),
        None => simulate_cmd(&cli.simulate),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn simulate_cmd(args: &SimulateArgs) -> Result<()> {
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                bail!("{} (available: {}, all)", e, names.join(", "));
            }
        }
    };

    let architectures: Vec<Architecture> = if args.architecture == "both" {
        Architecture::all().to_vec()
    } else {
        vec![args.architecture.parse::<Architecture>().map_err(anyhow::Error::msg)?]
    };

    let calibration = Calibration::from_file(&args.calibration)
        .with_context(|| format!("loading calibration from {}", args.calibration.display()))?;
    for mode in FailureMode::all() {
        if let Some(rate) = calibration.rate(mode) {
            debug!("{} threshold {} ({})", mode, rate.threshold, rate.citation);
        }
    }
    let observed = args
        .observed
        .as_ref()
        .map(|path| {
            ObservedRates::from_file(path).with_context(|| format!("loading observed rates from {}", path.display()))
        })
        .transpose()?;

    let config = SimConfig {
        seed: args.seed,
        trials: args.trials,
        parallel: !args.sequential,
        architectures,
    };
    let engine = ScenarioEngine::new(config.clone(), calibration)?;

    info!("PayCentral Simulator v0.1.0");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "seed={} trials={} scenarios={} parallel={}",
        config.seed,
        config.trials,
        scenarios.len(),
        config.parallel
    );

    let mut snapshot = SimulationSnapshot::new(config.seed, config.trials, &scenarios);
    for architecture in &config.architectures {
        let mut agent = Agent::new(*architecture, config.seed);
        let results = engine.run_selected(&mut agent, &scenarios, config.trials)?;

        for result in &results {
            info!(
                "  {:<8} {:<24} {:>6.2}%  [{:.2}%, {:.2}%]",
                architecture,
                result.scenario.name(),
                result.failure_rate * 100.0,
                result.interval.low * 100.0,
                result.interval.high * 100.0
            );
        }
        snapshot.add_results(*architecture, &results);
    }
    snapshot.finalize();

    if let Some(observed) = &observed {
        snapshot.validate_against(observed);
    }

    if let Some(comparison) = &snapshot.comparison {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("Naive failure rate:  {:.2}%", comparison.naive_rate);
        info!("Secure failure rate: {:.2}%", comparison.secure_rate);
        info!("Improvement:         {:.2} points", comparison.improvement);
    }
    if let Some(test) = &snapshot.significance {
        info!("z = {:.3}, p = {:.3e}", test.z, test.p_value);
    }
    for record in snapshot.validation.iter().flatten() {
        info!(
            "  {:<24} simulated {:>6.2}%  observed {:>6.2}%  {}",
            record.failure_mode.name(),
            record.simulated_rate * 100.0,
            record.actual_rate * 100.0,
            record.classification
        );
    }
    for warning in &snapshot.warnings {
        warn!("{}", warning);
    }

    if let Some(path) = &args.output {
        snapshot
            .write_to_file(path)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
        info!("Exported results to {}", path.display());
    }

    if args.json {
        println!("{}", snapshot.to_json_pretty()?);
    }
    Ok(())
}

fn production_service() -> Result<MandateService<SystemContext>> {
    let secret = SigningSecret::from_env(SigningSecret::ENV_VAR)?;
    Ok(MandateService::in_memory(secret, SystemContext::shared()))
}

fn seal(path: &Path) -> Result<()> {
    let document = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let cart: Cart = serde_json::from_str(&document).with_context(|| format!("parsing cart {}", path.display()))?;

    let mandate = production_service()?.seal(&cart)?;
    info!("Sealed mandate {} for {} {}", mandate.mandate_id(), mandate.total(), mandate.currency());
    println!("{}", serde_json::to_string_pretty(&mandate)?);
    Ok(())
}

fn verify(path: &Path) -> Result<()> {
    let document = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mandate: CartMandate =
        serde_json::from_str(&document).with_context(|| format!("parsing mandate {}", path.display()))?;

    if production_service()?.verify(&mandate) {
        println!("{}: VALID", mandate.mandate_id());
        Ok(())
    } else {
        bail!("{}: INVALID signature", mandate.mandate_id())
    }
}

fn ztest(failures_a: u64, total_a: u64, failures_b: u64, total_b: u64) -> Result<()> {
    let test = two_proportion_z_test(failures_a, total_a, failures_b, total_b)?;
    println!("z = {:.4}", test.z);
    println!("p = {:.6e}", test.p_value);
    Ok(())
}
