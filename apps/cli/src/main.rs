//! Tuneforge CLI - Command-line interface for fine-tuning job orchestration
//!
//! This CLI provides a `tuneforge` command for validating datasets, quoting
//! fine-tuning runs and driving them through the simulated trainer.

mod commands;
mod config;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{dataset, estimate, train};

/// Tuneforge CLI - Fine-tuning job orchestration
#[derive(Parser, Debug)]
#[command(
    name = "tuneforge",
    author,
    version,
    about = "Tuneforge - Fine-tuning job orchestration and dataset validation",
    long_about = "Tuneforge validates training datasets, estimates the cost of fine-tuning runs\nand executes them under a concurrency cap with live progress reporting."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dataset inspection and cleanup
    #[command(subcommand)]
    Dataset(DatasetCommand),

    /// Estimate the cost and duration of a run
    ///
    /// Validates the run's dataset and prints the cost breakdown without
    /// starting any training.
    Estimate {
        /// Path to a run file (TOML)
        run: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute one or more runs
    ///
    /// Runs are queued in the order given. Ctrl-C cancels every job at its
    /// next step boundary.
    Train {
        /// Paths to run files (TOML)
        #[arg(required = true)]
        runs: Vec<PathBuf>,

        /// Output final jobs as JSON
        #[arg(long)]
        json: bool,

        /// Maximum number of jobs running at once (at least 1)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_concurrent: Option<u32>,

        /// Steps per epoch of the simulated trainer
        #[arg(long)]
        steps_per_epoch: Option<u32>,

        /// Delay per simulated step, in milliseconds
        #[arg(long)]
        step_delay_ms: Option<u64>,

        /// Persist checkpoint manifests under this directory
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum DatasetCommand {
    /// Validate a dataset file and print its statistics
    Validate {
        /// Dataset file
        path: PathBuf,

        /// Format (jsonl, json, csv, text); inferred from the extension if omitted
        #[arg(short, long)]
        format: Option<String>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop incomplete records, trim values and write JSONL
    Clean {
        /// Dataset file
        path: PathBuf,

        /// Format (jsonl, json, csv, text); inferred from the extension if omitted
        #[arg(short, long)]
        format: Option<String>,

        /// Output file; stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let cli_config = config::TuneforgeConfig::discover_and_load();

    // Initialize tracing. Logs share stdout with command output, so the
    // default stays quiet.
    let level_name = args.log_level.clone().or_else(|| cli_config.log_level.clone());
    let level = match level_name.as_deref().unwrap_or("warn") {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber =
        FmtSubscriber::builder().with_max_level(level).without_time().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // If no command provided, show help
    let command = if let Some(cmd) = args.command {
        cmd
    } else {
        Args::command().print_help()?;
        return Ok(());
    };

    let default_json = cli_config.output.is_json();

    match command {
        Command::Dataset(DatasetCommand::Validate { path, format, json }) => {
            dataset::validate(&path, format.as_deref(), json || default_json).await?;
        }
        Command::Dataset(DatasetCommand::Clean { path, format, output }) => {
            dataset::clean(&path, format.as_deref(), output.as_deref()).await?;
        }
        Command::Estimate { run, json } => {
            estimate::execute(&run, json || default_json).await?;
        }
        Command::Train { runs, json, max_concurrent, steps_per_epoch, step_delay_ms, checkpoint_dir } => {
            let overrides = train::TrainOverrides {
                max_concurrent: max_concurrent.and_then(|n| usize::try_from(n).ok()),
                steps_per_epoch,
                step_delay_ms,
                checkpoint_dir,
            };
            train::execute(runs, json || default_json, overrides, &cli_config.training).await?;
        }
    }

    Ok(())
}
