/// Training pipeline and dataset inspection utilities.

use std::path::PathBuf;
use std::time::Instant;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::config::Config;
use burn::data::dataset::Dataset;
use burn::module::{AutodiffModule, Module};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use indicatif::{ProgressBar, ProgressStyle};

use moldata::{
    random_split, AliasSet, DatasetKind, MoleculeDataset, MoleculeReader, MoleculeRecord, Subset,
    MD17_MOLECULES, QM9_PROPERTIES,
};
use potential::{fit, EpochMetrics, TrainingData};

use crate::config::{
    apply_cli_overrides, build_model_config, build_trainer_config, load_train_toml, CliOverrides,
};
use crate::results::{unix_timestamp, MetricsLog, RunSummary};

type TrainBackend = Autodiff<NdArray<f32>>;

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Path to the run config TOML file.
    pub config: PathBuf,
    /// Directory for weights, configs, metrics and the run summary.
    pub output_dir: PathBuf,
    /// CLI flags that override the TOML.
    pub overrides: CliOverrides,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    /// Path to a molecule Parquet file.
    pub input: PathBuf,
    /// Output as JSON instead of human-readable text.
    pub json: bool,
}

/// Arguments for the `properties` subcommand.
#[derive(Debug)]
pub struct PropertiesArgs {
    /// Restrict the alias listing to one adapter.
    pub kind: Option<DatasetKind>,
}

/// Train the reference model on a dataset and export the weights.
///
/// Writes into `output_dir`:
/// - `model.mpk`: trained weights (burn named MessagePack)
/// - `model_config.json`, `trainer_config.json`: configs to rebuild the model
/// - `metrics.jsonl`: one line of epoch metrics per epoch
/// - `summary.json`: the returned [`RunSummary`]
pub fn run_train(args: TrainArgs) -> anyhow::Result<RunSummary> {
    let start = Instant::now();

    // 1. Load config and merge CLI overrides
    let mut toml = load_train_toml(&args.config)?;
    apply_cli_overrides(&mut toml, &args.overrides);
    let trainer_config = build_trainer_config(&toml.trainer, &args.overrides);
    let model_config = build_model_config(&toml.model);
    toml.module.validate()?;

    // 2. Open the dataset and split it
    let dataset = MoleculeDataset::open(
        toml.dataset.kind,
        &toml.dataset.root,
        None,
        toml.dataset.dataset_arg.as_deref(),
    )?;
    let splits = random_split(
        dataset.len(),
        toml.dataset.train_size,
        toml.dataset.val_size,
        toml.dataset.test_size,
        toml.dataset.split_seed,
    )?;
    if splits.val.is_empty() {
        anyhow::bail!("Validation split is empty; set dataset.val_size");
    }
    let train = Subset::new(&dataset, splits.train);
    let val = Subset::new(&dataset, splits.val);
    let test = Subset::new(&dataset, splits.test);

    // 3. Build the model, seeding the atom-reference prior when the label has one
    let device = Default::default();
    let model = match dataset.atomref(model_config.max_z) {
        Some(atomref) => {
            tracing::info!(label = dataset.label().unwrap_or("-"), "Using atom-reference prior");
            model_config.init_with_atomref::<TrainBackend>(&atomref, &device)
        }
        None => model_config.init::<TrainBackend>(&device),
    };

    std::fs::create_dir_all(&args.output_dir)?;
    model_config.save(args.output_dir.join("model_config.json"))?;
    trainer_config.save(args.output_dir.join("trainer_config.json"))?;

    // 4. Train with a progress bar over epochs
    let mut metrics_log = MetricsLog::create(&args.output_dir.join("metrics.jsonl"))?;
    let mut log_error: Option<anyhow::Error> = None;

    let pb = ProgressBar::new(trainer_config.num_epochs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} epochs ({eta}) {msg}")?
            .progress_chars("=> "),
    );

    let test_data: Option<&dyn Dataset<MoleculeRecord>> = if test.is_empty() { None } else { Some(&test) };
    let outcome = fit::<TrainBackend, _, _>(
        &trainer_config,
        &toml.module,
        model,
        TrainingData {
            train: &train,
            val: &val,
            test: test_data,
        },
        &device,
        |metrics: &EpochMetrics| {
            if let Some(val_loss) = metrics.val_loss() {
                pb.set_message(format!("val_loss={val_loss:.4e}"));
            }
            pb.inc(1);
            if log_error.is_none() {
                if let Err(e) = metrics_log.append(metrics) {
                    log_error = Some(e);
                }
            }
        },
    )?;
    pb.finish_with_message("done");

    if let Some(e) = log_error {
        tracing::warn!(error = %e, path = %metrics_log.path().display(), "Metrics log is incomplete");
    }

    // 5. Export weights
    let model_stem = args.output_dir.join("model");
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    outcome
        .model
        .valid()
        .save_file(model_stem.clone(), &recorder)
        .map_err(|e| anyhow::anyhow!("Failed to save model: {e}"))?;
    let model_path = model_stem.with_extension("mpk");

    // 6. Summarize
    let final_val_loss = outcome.epochs.last().and_then(|m| m.val_loss());
    let final_test_loss = outcome.epochs.iter().rev().find_map(|m| m.get("test_loss"));
    let summary = RunSummary {
        timestamp: unix_timestamp(),
        dataset: dataset.kind().to_string(),
        label: dataset.label().map(str::to_string),
        train_size: train.len(),
        val_size: val.len(),
        test_size: test.len(),
        epochs: outcome.epochs.len(),
        global_steps: outcome.global_steps,
        best_val_loss: outcome.best_val_loss,
        final_val_loss,
        final_test_loss,
        final_lr: outcome.final_lr,
        stopped_early: outcome.stopped_early,
        model_path: model_path.display().to_string(),
        elapsed_secs: start.elapsed().as_secs_f64(),
    };
    summary.save(&args.output_dir.join("summary.json"))?;

    println!("\n--- Training Summary ---");
    println!("Dataset: {} ({})", summary.dataset, summary.label.as_deref().unwrap_or("unlabeled"));
    println!("Splits: {}/{}/{}", summary.train_size, summary.val_size, summary.test_size);
    println!("Epochs: {}{}", summary.epochs, if summary.stopped_early { " (early stop)" } else { "" });
    println!("Steps: {}", summary.global_steps);
    if let Some(best) = summary.best_val_loss {
        println!("Best val_loss: {best:.4e}");
    }
    if let Some(loss) = summary.final_test_loss {
        println!("Last test_loss: {loss:.4e}");
    }
    println!("Final lr: {:.3e}", summary.final_lr);
    println!("Model: {}", summary.model_path);
    println!("Elapsed: {:.1}s", summary.elapsed_secs);

    Ok(summary)
}

/// Print statistics from a molecule Parquet file.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let summary = MoleculeReader::read_summary(&args.input)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("--- Molecule Summary ---");
    println!("File: {}", args.input.display());
    println!("Molecules: {}", summary.total_records);
    println!("Atoms: {} (mean {:.1}, max {})", summary.total_atoms, summary.mean_atoms(), summary.max_atoms);
    match summary.target_width {
        Some(width) => println!("Target width: {width}"),
        None => println!("Target width: -"),
    }
    println!("With forces: {}", summary.with_forces);
    println!("With denoising target: {}", summary.with_pos_target);
    for (kind, count) in &summary.spectra {
        println!("Spectrum {kind}: {count}");
    }

    Ok(())
}

/// Print the property table and the aliases each adapter accepts.
pub fn run_properties(args: PropertiesArgs) -> anyhow::Result<()> {
    println!("--- Properties ---");
    for (column, name) in QM9_PROPERTIES.iter().enumerate() {
        println!("{column:>2}  {name}");
    }

    let kinds: Vec<DatasetKind> = match args.kind {
        Some(kind) => vec![kind],
        None => DatasetKind::ALL.to_vec(),
    };
    for kind in kinds {
        println!("\n--- Aliases ({kind}) ---");
        match (kind, kind.alias_set()) {
            (_, Some(set)) => print_aliases(set),
            (DatasetKind::Md17, None) => println!("molecules: {}", MD17_MOLECULES.join(", ")),
            (_, None) => println!("(unlabeled: targets are read as stored)"),
        }
    }

    Ok(())
}

fn print_aliases(set: AliasSet) {
    for (alias, canonical) in set.aliases() {
        println!("{alias:>6} -> {canonical}");
    }
}
