//! Epoch-based training loop with validation, periodic testing and
//! learning-rate control.
//!
//! Each optimizer step: the controller adjusts the rate (warm-up or plateau
//! decay), the composer computes the train loss, AdamW steps, then the
//! per-step schedule advances. Each epoch ends with a validation pass, an
//! optional test pass, epoch metrics, and the per-epoch schedule.

use std::time::Instant;

use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use moldata::MoleculeRecord;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::ModuleConfig;
use crate::model::PropertyModel;
use crate::training::batch::MoleculeBatch;
use crate::training::composer::LossComposer;
use crate::training::history::{EpochMetrics, Stage};
use crate::training::scheduler::{LrController, LrSchedule};

/// Configuration for the training loop.
#[derive(Config, Debug)]
pub struct TrainerConfig {
    #[config(default = 300)]
    pub num_epochs: usize,
    /// Molecules per training batch.
    #[config(default = 32)]
    pub batch_size: usize,
    /// Molecules per validation/test batch.
    #[config(default = 64)]
    pub inference_batch_size: usize,
    /// Seed for batch shuffling.
    #[config(default = 1)]
    pub seed: u64,
    /// Epochs without validation improvement before stopping. Zero disables.
    #[config(default = 30)]
    pub early_stopping_patience: usize,
    /// Validation batches run once before training. Zero skips the check.
    #[config(default = 2)]
    pub sanity_val_batches: usize,
    /// Optimizer steps between per-step metric logs. Zero disables them.
    #[config(default = 50)]
    pub log_every: usize,
}

/// Which evaluation pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalPass {
    Validation,
    Test,
}

impl EvalPass {
    pub fn stage(self) -> Stage {
        match self {
            Self::Validation => Stage::Val,
            Self::Test => Stage::Test,
        }
    }
}

/// Whether the test split runs at the end of `epoch` (0-based).
pub fn test_due(epoch: usize, test_interval: usize) -> bool {
    test_interval > 0 && (epoch + 1) % test_interval == 0
}

/// Datasets for one run.
pub struct TrainingData<'a> {
    pub train: &'a dyn Dataset<MoleculeRecord>,
    pub val: &'a dyn Dataset<MoleculeRecord>,
    pub test: Option<&'a dyn Dataset<MoleculeRecord>>,
}

/// Stops training once the validation loss stops improving.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Record a validation loss; returns `true` when training should stop.
    pub fn update(&mut self, val_loss: f64) -> bool {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.patience > 0 && self.wait >= self.patience
    }

    pub fn best(&self) -> Option<f64> {
        self.best.is_finite().then_some(self.best)
    }
}

/// Result of [`fit`].
#[derive(Debug)]
pub struct FitOutcome<M> {
    pub model: M,
    /// Metrics of every completed epoch, in order.
    pub epochs: Vec<EpochMetrics>,
    pub best_val_loss: Option<f64>,
    pub global_steps: usize,
    pub final_lr: f64,
    pub stopped_early: bool,
}

/// Fetch records for `indices`.
///
/// Fails on an index the dataset cannot serve and on an atomic number the
/// model has no embedding row for.
fn fetch(
    dataset: &dyn Dataset<MoleculeRecord>,
    indices: &[usize],
    max_z: Option<usize>,
) -> anyhow::Result<Vec<MoleculeRecord>> {
    let mut records = Vec::with_capacity(indices.len());
    for &index in indices {
        let Some(record) = dataset.get(index) else {
            anyhow::bail!("Dataset has no record at index {index} (len {})", dataset.len());
        };
        if let Some(max_z) = max_z {
            if let Some(&z) = record.atomic_numbers.iter().find(|&&z| z as usize >= max_z) {
                anyhow::bail!(
                    "Record {index} has atomic number {z}, but the model only embeds atomic numbers below {max_z}; raise max_z"
                );
            }
        }
        records.push(record);
    }
    Ok(records)
}

/// Run one evaluation pass over `dataset`. Returns the number of batches.
fn evaluate<B: Backend, M: PropertyModel<B>>(
    composer: &mut LossComposer,
    model: &M,
    dataset: &dyn Dataset<MoleculeRecord>,
    pass: EvalPass,
    batch_size: usize,
    max_batches: Option<usize>,
    device: &B::Device,
) -> anyhow::Result<usize> {
    let max_z = model.max_z();
    let order: Vec<usize> = (0..dataset.len()).collect();
    let mut n_batches = 0;
    for chunk in order.chunks(batch_size.max(1)) {
        if max_batches.is_some_and(|max| n_batches >= max) {
            break;
        }
        let records = fetch(dataset, chunk, max_z)?;
        let batch = MoleculeBatch::<B>::collate(&records, device)?;
        composer.step(model, &batch, pass.stage());
        n_batches += 1;
    }
    Ok(n_batches)
}

/// Train `model` on `data`.
///
/// `on_epoch` receives the metrics of every completed epoch.
///
/// # Errors
/// Fails on an invalid configuration, an empty training or validation set,
/// an atomic number outside the model's embedding, or a batch that cannot
/// be collated.
pub fn fit<B, M, F>(
    config: &TrainerConfig,
    module_config: &ModuleConfig,
    mut model: M,
    data: TrainingData<'_>,
    device: &B::Device,
    mut on_epoch: F,
) -> anyhow::Result<FitOutcome<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + PropertyModel<B>,
    M::InnerModule: PropertyModel<B::InnerBackend>,
    F: FnMut(&EpochMetrics),
{
    module_config.validate()?;
    if data.train.is_empty() {
        anyhow::bail!("Training set is empty");
    }
    if data.val.is_empty() {
        anyhow::bail!("Validation set is empty");
    }
    let max_z = model.max_z();

    let mut optimizer = AdamWConfig::new()
        .with_weight_decay(module_config.weight_decay as f32)
        .init();
    let mut composer = LossComposer::new(module_config.clone());
    let mut controller = LrController::new(module_config);
    let mut schedule = LrSchedule::new(module_config);
    let mut early_stopping = EarlyStopping::new(config.early_stopping_patience);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut lr = module_config.lr;
    let mut global_step = 0usize;
    let mut epochs = Vec::with_capacity(config.num_epochs);
    let mut stopped_early = false;
    let train_start = Instant::now();

    tracing::info!(
        train = data.train.len(),
        val = data.val.len(),
        test = data.test.map(|t| t.len()).unwrap_or(0),
        epochs = config.num_epochs,
        batch_size = config.batch_size,
        schedule = %schedule.kind(),
        lr,
        "Starting training"
    );

    if config.sanity_val_batches > 0 {
        let n = evaluate(
            &mut composer,
            &model.valid(),
            data.val,
            EvalPass::Validation,
            config.inference_batch_size,
            Some(config.sanity_val_batches),
            device,
        )?;
        composer.validation_epoch_end(0, lr, true);
        tracing::info!(batches = n, "Sanity validation passed");
    }

    for epoch in 0..config.num_epochs {
        let mut order: Vec<usize> = (0..data.train.len()).collect();
        order.shuffle(&mut rng);

        for chunk in order.chunks(config.batch_size.max(1)) {
            let records = fetch(data.train, chunk, max_z)?;
            let batch = MoleculeBatch::<B>::collate(&records, device)?;

            lr = controller.optimizer_step(global_step, lr).apply(lr);
            let loss = composer.step(&model, &batch, Stage::Train);
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);

            if config.log_every > 0 && global_step % config.log_every == 0 {
                composer.step_metrics(global_step, lr, &batch);
            }
            global_step += 1;
            lr = schedule.step_batch(lr);
        }

        let valid_model = model.valid();
        evaluate(
            &mut composer,
            &valid_model,
            data.val,
            EvalPass::Validation,
            config.inference_batch_size,
            None,
            device,
        )?;
        if let Some(test) = data.test {
            if test_due(epoch, module_config.test_interval) {
                evaluate(
                    &mut composer,
                    &valid_model,
                    test,
                    EvalPass::Test,
                    config.inference_batch_size,
                    None,
                    device,
                )?;
            }
        }

        let Some(metrics) = composer.validation_epoch_end(epoch, lr, false) else {
            continue;
        };
        let val_loss = metrics.val_loss();
        if let Some(v) = val_loss {
            controller.record_val_loss(v);
        }
        lr = schedule.step_epoch(val_loss, lr);

        on_epoch(&metrics);
        epochs.push(metrics);

        if let Some(v) = val_loss {
            if early_stopping.update(v) {
                tracing::info!(epoch, best = early_stopping.best(), "Early stopping: validation loss stopped improving");
                stopped_early = true;
                break;
            }
        }
    }

    tracing::info!(
        epochs = epochs.len(),
        global_steps = global_step,
        best_val_loss = early_stopping.best(),
        elapsed_secs = format!("{:.1}", train_start.elapsed().as_secs_f64()),
        "Training loop finished"
    );

    Ok(FitOutcome {
        model,
        epochs,
        best_val_loss: early_stopping.best(),
        global_steps: global_step,
        final_lr: lr,
        stopped_early,
    })
}
