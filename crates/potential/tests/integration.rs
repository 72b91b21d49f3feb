//! Integration tests for the potential crate.
//!
//! These exercise cross-module paths: Parquet → dataset adapter → batch →
//! composer → optimizer, the full `fit` loop on a labeled dataset, and model
//! export through burn's recorder. All use the NdArray backend and synthetic
//! molecules.

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use tempfile::TempDir;

use moldata::{
    random_split, DatasetKind, MoleculeDataset, MoleculeRecord, MoleculeWriter, SpectrumKind, SplitSize,
    Subset,
};
use potential::{
    fit, AtomwiseModel, AtomwiseModelConfig, EpochMetrics, LossComposer, LossTerm, LrScheduleKind,
    ModuleConfig, MoleculeBatch, PropertyModel, Stage, TrainerConfig, TrainingData,
};

type TestBackend = NdArray<f32>;
type TestAutodiffBackend = Autodiff<NdArray<f32>>;

/// Water-like molecule with a 12-column QM9 row; column 7 (U0) tracks geometry.
fn qm9_record(i: usize) -> MoleculeRecord {
    let r = 0.9 + 0.01 * i as f32;
    let mut y: Vec<f32> = (0..12).map(|c| c as f32).collect();
    y[7] = -2.0 * r;
    MoleculeRecord::new(vec![8, 1, 1], vec![[0.0; 3], [r, 0.0, 0.0], [-0.24, r, 0.0]]).with_y(y)
}

fn small_model(config: AtomwiseModelConfig) -> AtomwiseModelConfig {
    config.with_max_z(10).with_hidden_channels(16)
}

/// Repeated optimizer steps on one batch drive the energy loss down.
#[test]
fn test_composer_optimizer_reduces_loss() {
    let device = Default::default();
    let mut model = small_model(AtomwiseModelConfig::new())
        .with_force_head(false)
        .init::<TestAutodiffBackend>(&device);
    let records: Vec<MoleculeRecord> = (0..8)
        .map(|i| {
            let r = 0.6 + 0.1 * i as f32;
            MoleculeRecord::new(vec![1, 1], vec![[0.0; 3], [r, 0.0, 0.0]]).with_y(vec![3.0 * r - 1.0])
        })
        .collect();
    let batch = MoleculeBatch::<TestAutodiffBackend>::collate(&records, &device).unwrap();

    let mut composer = LossComposer::new(ModuleConfig::default());
    let mut optimizer = AdamWConfig::new().init();

    let mut losses = Vec::new();
    for _ in 0..60 {
        let loss = composer.step(&model, &batch, Stage::Train);
        losses.push(loss.clone().into_scalar().elem::<f32>());
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(1e-2, model, grads);
    }

    let first = losses[0];
    let last = *losses.last().unwrap();
    assert!(last < first * 0.5, "loss should drop: first={first}, last={last}");
    assert_eq!(composer.history().get(Stage::Train, LossTerm::Total).len(), 60);
}

/// Parquet → QM9 adapter → splits → fit → export → reload.
#[test]
fn test_fit_on_qm9_parquet_and_export() {
    let tmp = TempDir::new().unwrap();
    let mut writer = MoleculeWriter::new(DatasetKind::Qm9.processed_path(tmp.path()));
    writer.record_all((0..24).map(qm9_record).collect());
    writer.finish().unwrap();

    let dataset = MoleculeDataset::qm9(tmp.path(), None, Some("U0")).unwrap();
    assert_eq!(dataset.get(0).unwrap().y.unwrap().len(), 1);
    let splits = random_split(
        dataset.len(),
        Some(SplitSize::Count(16)),
        Some(SplitSize::Count(4)),
        None,
        0,
    )
    .unwrap();
    let train = Subset::new(&dataset, splits.train);
    let val = Subset::new(&dataset, splits.val);
    let test = Subset::new(&dataset, splits.test);

    let device = Default::default();
    let model_config = small_model(AtomwiseModelConfig::new()).with_force_head(false);
    let atomref = dataset.atomref(model_config.max_z).unwrap();
    let model = model_config.init_with_atomref::<TestAutodiffBackend>(&atomref, &device);

    let module_config = ModuleConfig {
        lr: 1e-3,
        lr_schedule: LrScheduleKind::Cosine,
        lr_cosine_length: 50,
        test_interval: 1,
        ema_alpha_y: 0.5,
        ..ModuleConfig::default()
    };
    let trainer_config = TrainerConfig::new()
        .with_num_epochs(3)
        .with_batch_size(5)
        .with_inference_batch_size(3);

    let mut logged: Vec<EpochMetrics> = Vec::new();
    let outcome = fit(
        &trainer_config,
        &module_config,
        model,
        TrainingData {
            train: &train,
            val: &val,
            test: Some(&test),
        },
        &device,
        |m: &EpochMetrics| logged.push(m.clone()),
    )
    .unwrap();

    // 16 molecules in batches of 5: 4 steps per epoch
    assert_eq!(outcome.global_steps, 12);
    assert_eq!(logged.len(), 3);
    for metrics in &logged {
        for key in ["epoch", "lr", "train_loss", "val_loss", "test_loss", "train_loss_y", "val_loss_y", "test_loss_y"] {
            assert!(metrics.contains(key), "missing {key} in {metrics}");
        }
        assert!(!metrics.contains("train_loss_dy"));
    }
    // cosine annealing lowered the rate from its base
    assert!(outcome.final_lr < module_config.lr);

    // Export the trained weights and load them into a fresh model.
    let path = tmp.path().join("model");
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let trained = outcome.model.valid();
    trained.clone().save_file(&path, &recorder).unwrap();
    let reloaded: AtomwiseModel<TestBackend> = model_config
        .init_with_atomref::<TestBackend>(&atomref, &device)
        .load_file(&path, &recorder, &device)
        .unwrap();

    let records: Vec<MoleculeRecord> = (0..3).map(|i| dataset.get(i).unwrap()).collect();
    let batch = MoleculeBatch::<TestBackend>::collate(&records, &device).unwrap();
    let a: Vec<f32> = trained
        .forward(batch.z.clone(), batch.pos.clone(), None, batch.batch.clone(), 3)
        .pred
        .into_data()
        .to_vec()
        .unwrap();
    let b: Vec<f32> = reloaded
        .forward(batch.z, batch.pos, None, batch.batch, 3)
        .pred
        .into_data()
        .to_vec()
        .unwrap();
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() <= 1e-5 * x.abs().max(1.0), "reloaded model differs: {x} vs {y}");
    }
}

/// Energy, force, denoising, contrastive and reconstruction terms all fire
/// on a fully populated batch, and the total backpropagates.
#[test]
fn test_all_terms_on_full_batch() {
    let device = Default::default();
    let model = small_model(AtomwiseModelConfig::new())
        .with_noise_head(true)
        .with_spectrum_dims(vec![6, 8, 8])
        .with_reconstruct(true)
        .init::<TestAutodiffBackend>(&device);

    let records: Vec<MoleculeRecord> = (0..4)
        .map(|i| {
            let r = 0.7 + 0.1 * i as f32;
            MoleculeRecord::new(vec![6, 1], vec![[0.0; 3], [r, 0.0, 0.0]])
                .with_y(vec![-r])
                .with_dy(vec![[r, 0.0, 0.0], [-r, 0.0, 0.0]])
                .with_pos_target(vec![[0.01, 0.0, 0.0], [-0.01, 0.0, 0.0]])
                .with_spectrum(SpectrumKind::Uv, (0..6).map(|k| (k as f32 * r).sin()).collect())
                .with_spectrum(SpectrumKind::Ir, (0..8).map(|k| (k as f32 + r).cos()).collect())
                .with_spectrum(SpectrumKind::Raman, vec![r; 8])
        })
        .collect();
    let batch = MoleculeBatch::<TestAutodiffBackend>::collate(&records, &device).unwrap();

    let mut composer = LossComposer::new(ModuleConfig {
        derivative: true,
        denoising_weight: 0.1,
        contrastive_weight: 0.2,
        reconstruct_weight: 0.3,
        ..ModuleConfig::default()
    });
    let loss = composer.step(&model, &batch, Stage::Train);
    let value: f32 = loss.clone().into_scalar().elem();
    assert!(value.is_finite() && value > 0.0);

    for term in [LossTerm::Y, LossTerm::Dy, LossTerm::Pos, LossTerm::Contrast, LossTerm::Reconstruct] {
        assert_eq!(composer.history().get(Stage::Train, term).len(), 1, "{term:?} not recorded");
    }

    let mut optimizer = AdamWConfig::new().init();
    let grads = GradientsParams::from_grads(loss.backward(), &model);
    let model = optimizer.step(1e-3, model, grads);
    let again: f32 = composer.step(&model, &batch, Stage::Train).into_scalar().elem();
    assert!(again.is_finite());
    assert_eq!(composer.history().get(Stage::Train, LossTerm::Total).len(), 2);

    let metrics = composer.validation_epoch_end(0, 1e-4, false).unwrap();
    for key in ["train_loss_y", "train_loss_dy", "train_loss_pos", "train_loss_contrast", "train_loss_reconstruct"] {
        assert!(metrics.contains(key), "missing {key}");
    }
}

/// NMR spectra select the second triple; only UV turns contrast on.
#[test]
fn test_nmr_triple_without_uv_skips_contrast() {
    let device = Default::default();
    let model = small_model(AtomwiseModelConfig::new())
        .with_spectrum_dims(vec![4, 5, 5])
        .init::<TestBackend>(&device);
    let record = MoleculeRecord::new(vec![6], vec![[0.0; 3]])
        .with_y(vec![1.0])
        .with_spectrum(SpectrumKind::Ir, vec![0.1; 4])
        .with_spectrum(SpectrumKind::HNmr, vec![0.2; 5])
        .with_spectrum(SpectrumKind::CNmr, vec![0.3; 5]);
    let batch = MoleculeBatch::<TestBackend>::collate(&[record.clone(), record], &device).unwrap();
    assert_eq!(batch.spectra_input().unwrap().kinds[1], SpectrumKind::HNmr);

    let mut composer = LossComposer::new(ModuleConfig {
        contrastive_weight: 1.0,
        ..ModuleConfig::default()
    });
    composer.step(&model, &batch, Stage::Val);
    assert!(composer.history().get(Stage::Val, LossTerm::Contrast).is_empty());
    assert_eq!(composer.history().get(Stage::Val, LossTerm::Y).len(), 1);
}
