mod config;
mod pipeline;
pub mod results;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use moldata::DatasetKind;
use tracing_subscriber::EnvFilter;

use config::CliOverrides;
use pipeline::{PropertiesArgs, SummaryArgs, TrainArgs};

/// burn-mdnet: train molecular property models with burn.
#[derive(Parser)]
#[command(name = "burn-mdnet", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for training and dataset inspection.
#[derive(Subcommand)]
enum Command {
    /// Train a property model on a Parquet dataset.
    Train {
        /// Path to the run config TOML file.
        #[arg(long, default_value = "configs/qm9.toml")]
        config: PathBuf,
        /// Directory for weights, metrics and the run summary.
        #[arg(long, default_value = "runs/latest")]
        output_dir: PathBuf,
        /// Override the property (name or alias, e.g. "U0") or MD17 molecule.
        #[arg(long)]
        dataset_arg: Option<String>,
        /// Override the number of epochs.
        #[arg(long)]
        num_epochs: Option<usize>,
        /// Override the training batch size.
        #[arg(long)]
        batch_size: Option<usize>,
        /// Override the base learning rate.
        #[arg(long)]
        lr: Option<f64>,
        /// Override the shuffle seed.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print statistics from a molecule Parquet file.
    Summary {
        /// Path to the molecule Parquet file.
        #[arg(long)]
        input: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
    /// List trainable properties and the aliases each dataset accepts.
    Properties {
        /// Only show aliases for this dataset (qm9, qm9sp, md17, ani1, custom).
        #[arg(long)]
        kind: Option<DatasetKind>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            config,
            output_dir,
            dataset_arg,
            num_epochs,
            batch_size,
            lr,
            seed,
        } => pipeline::run_train(TrainArgs {
            config,
            output_dir,
            overrides: CliOverrides {
                dataset_arg,
                num_epochs,
                batch_size,
                lr,
                seed,
            },
        })
        .map(|_| ()),
        Command::Summary { input, json } => pipeline::run_summary(SummaryArgs { input, json }),
        Command::Properties { kind } => pipeline::run_properties(PropertiesArgs { kind }),
    }
}
