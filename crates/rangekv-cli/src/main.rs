use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use rangekv_core::{LoggingConfig, RangeKvConfig};

mod commands;

use commands::run::{run_worker, RunOptions};
use commands::score::run_score;
use commands::seed::SeedArgs;
use commands::simulate::{run_simulate, SimulateOptions};

#[derive(Parser, Debug)]
#[command(name = "rangekv")]
#[command(about = "Range maintenance tooling for rangekv", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the standard search path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Seed an in-memory store and print scan priorities
    Score {
        #[command(flatten)]
        seed: SeedArgs,

        /// Print JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Seed an in-memory store and run scan queue ticks over it
    Simulate {
        #[command(flatten)]
        seed: SeedArgs,

        /// Scheduling ticks to run
        #[arg(long, default_value_t = 1)]
        cycles: u32,

        /// Print JSON lines instead of a table
        #[arg(long)]
        json: bool,

        /// Dump Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Seed an in-memory store and run the scan queue worker until interrupted
    Run {
        #[command(flatten)]
        seed: SeedArgs,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Print JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<RangeKvConfig> {
    match path {
        Some(path) => RangeKvConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => RangeKvConfig::load().context("failed to load config"),
    }
}

fn init_logging(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let subscriber = fmt().with_env_filter(env_filter).with_target(false);
    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Score { seed, json } => run_score(&config, &seed, json),

        Commands::Simulate {
            seed,
            cycles,
            json,
            metrics,
        } => {
            let options = SimulateOptions {
                seed,
                cycles,
                json,
                metrics,
            };
            run_simulate(&config, &options).await
        }

        Commands::Run {
            seed,
            duration_secs,
            json,
        } => {
            let options = RunOptions {
                seed,
                json,
                duration: duration_secs.map(Duration::from_secs),
            };
            run_worker(&config, &options).await
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
