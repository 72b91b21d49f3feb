//! TOML config loading for the training CLI.
//!
//! Deserializes a run config such as `configs/qm9.toml`, which has
//! `[dataset]`, `[model]`, `[module]` and `[trainer]` sections, then merges
//! it with CLI overrides.

use std::path::{Path, PathBuf};

use moldata::{DatasetKind, SplitSize};
use potential::{AtomwiseModelConfig, ModuleConfig, TrainerConfig};
use serde::Deserialize;

/// Top-level structure matching `configs/qm9.toml`.
#[derive(Debug, Deserialize)]
pub struct TrainToml {
    /// Which dataset to open and how to split it.
    pub dataset: DatasetSection,
    /// Reference model shape.
    #[serde(default)]
    pub model: ModelOverrides,
    /// Loss weights, schedules and EMA factors.
    #[serde(default)]
    pub module: ModuleConfig,
    /// Epoch loop overrides.
    #[serde(default)]
    pub trainer: TrainerOverrides,
}

/// `[dataset]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetSection {
    /// Adapter to open: `qm9`, `qm9sp` or `custom`.
    pub kind: DatasetKind,
    /// Dataset root; the processed file lives under `<root>/processed/`.
    pub root: PathBuf,
    /// Property name or alias for labeled adapters.
    #[serde(default)]
    pub dataset_arg: Option<String>,
    /// Integer count or fraction in `[0, 1]`.
    #[serde(default)]
    pub train_size: Option<SplitSize>,
    #[serde(default)]
    pub val_size: Option<SplitSize>,
    #[serde(default)]
    pub test_size: Option<SplitSize>,
    /// Seed for the split shuffle.
    #[serde(default = "default_split_seed")]
    pub split_seed: u64,
}

fn default_split_seed() -> u64 {
    1
}

/// Optional overrides for `AtomwiseModelConfig` fields.
#[derive(Debug, Default, Deserialize)]
pub struct ModelOverrides {
    pub max_z: Option<usize>,
    pub hidden_channels: Option<usize>,
    pub force_head: Option<bool>,
    pub noise_head: Option<bool>,
    pub spectrum_dims: Option<Vec<usize>>,
    pub feature_dim: Option<usize>,
    pub reconstruct: Option<bool>,
    pub pos_target_std: Option<f64>,
}

/// Optional overrides for `TrainerConfig` fields.
///
/// All fields are `Option` so a TOML file only has to name what it changes;
/// the rest keep the `TrainerConfig` defaults.
#[derive(Debug, Default, Deserialize)]
pub struct TrainerOverrides {
    pub num_epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub inference_batch_size: Option<usize>,
    pub seed: Option<u64>,
    pub early_stopping_patience: Option<usize>,
    pub sanity_val_batches: Option<usize>,
    pub log_every: Option<usize>,
}

/// Flags from the `train` subcommand that take priority over the TOML.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub dataset_arg: Option<String>,
    pub num_epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub lr: Option<f64>,
    pub seed: Option<u64>,
}

/// Load and deserialize a `TrainToml` from a TOML file.
pub fn load_train_toml(path: &Path) -> anyhow::Result<TrainToml> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    let config: TrainToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), dataset = %config.dataset.kind, "Loaded train config");
    Ok(config)
}

/// Build an `AtomwiseModelConfig` from defaults and TOML overrides.
pub fn build_model_config(overrides: &ModelOverrides) -> AtomwiseModelConfig {
    let mut config = AtomwiseModelConfig::new();
    if let Some(n) = overrides.max_z {
        config.max_z = n;
    }
    if let Some(n) = overrides.hidden_channels {
        config.hidden_channels = n;
    }
    if let Some(b) = overrides.force_head {
        config.force_head = b;
    }
    if let Some(b) = overrides.noise_head {
        config.noise_head = b;
    }
    if let Some(dims) = &overrides.spectrum_dims {
        config.spectrum_dims = dims.clone();
    }
    if let Some(n) = overrides.feature_dim {
        config.feature_dim = n;
    }
    if let Some(b) = overrides.reconstruct {
        config.reconstruct = b;
    }
    if let Some(std) = overrides.pos_target_std {
        config.pos_target_std = std;
    }
    config
}

/// Build a `TrainerConfig` from defaults, TOML overrides, and CLI flags.
///
/// Priority chain: `TrainerConfig` defaults < TOML values < CLI flags.
pub fn build_trainer_config(overrides: &TrainerOverrides, cli: &CliOverrides) -> TrainerConfig {
    let mut config = TrainerConfig::new();

    if let Some(n) = overrides.num_epochs {
        config.num_epochs = n;
    }
    if let Some(n) = overrides.batch_size {
        config.batch_size = n;
    }
    if let Some(n) = overrides.inference_batch_size {
        config.inference_batch_size = n;
    }
    if let Some(n) = overrides.seed {
        config.seed = n;
    }
    if let Some(n) = overrides.early_stopping_patience {
        config.early_stopping_patience = n;
    }
    if let Some(n) = overrides.sanity_val_batches {
        config.sanity_val_batches = n;
    }
    if let Some(n) = overrides.log_every {
        config.log_every = n;
    }

    if let Some(n) = cli.num_epochs {
        config.num_epochs = n;
    }
    if let Some(n) = cli.batch_size {
        config.batch_size = n;
    }
    if let Some(n) = cli.seed {
        config.seed = n;
    }

    config
}

/// Apply CLI flags that touch the `[module]` and `[dataset]` sections.
pub fn apply_cli_overrides(toml: &mut TrainToml, cli: &CliOverrides) {
    if let Some(lr) = cli.lr {
        toml.module.lr = lr;
    }
    if let Some(arg) = &cli.dataset_arg {
        toml.dataset.dataset_arg = Some(arg.clone());
    }
}
