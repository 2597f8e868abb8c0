//! wattsim — replay harness for the WattGrid scheduler.
//!
//! Loads a scenario (machines, task arrivals, injected SLA warnings), runs it
//! through the scheduler over the in-memory cluster engine, and prints the
//! shutdown report.
//!
//! # Usage
//!
//! ```text
//! wattsim replay --scenario cluster.toml --config wattgrid.toml
//! wattsim replay --scenario cluster.toml --json > report.json
//! wattsim defaults > wattgrid.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wattgrid_core::SchedulerConfig;

mod replay;
mod scenario;

use scenario::Scenario;

#[derive(Parser)]
#[command(
    name = "wattsim",
    about = "WattGrid — energy-aware placement replay harness",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a scenario and print the shutdown report.
    Replay {
        /// Scenario file (TOML).
        #[arg(short, long)]
        scenario: PathBuf,

        /// Scheduler configuration (TOML). Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured fallback placement seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Emit logs and the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the default scheduler configuration.
    Defaults,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            scenario,
            config,
            seed,
            json,
        } => {
            init_tracing(json)?;
            run_replay(scenario, config, seed, json)
        }
        Command::Defaults => {
            print!("{}", SchedulerConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

/// Logs go to stderr so the report on stdout stays machine-readable.
fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info,wattgrid=debug"))?;
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn run_replay(
    scenario_path: PathBuf,
    config_path: Option<PathBuf>,
    seed: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let scenario = Scenario::from_file(&scenario_path)?;
    let mut config = match &config_path {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    };
    if seed.is_some() {
        config.seed = seed;
    }

    info!(
        scenario = %scenario_path.display(),
        machines = scenario.machine_count(),
        tasks = scenario.tasks.len(),
        policy = ?config.policy,
        "starting replay"
    );
    let report = replay::replay(&scenario, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
