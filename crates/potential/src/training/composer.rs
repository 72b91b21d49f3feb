//! Multi-term loss for one batch, plus the per-stage bookkeeping behind
//! step and epoch metrics.
//!
//! A term is active only when the batch carries its target, its weight is
//! positive, and the model produced the output it compares against. The
//! energy and force terms are exponentially smoothed on train and val.

use std::collections::BTreeMap;

use burn::prelude::*;
use moldata::SpectrumKind;

use crate::config::ModuleConfig;
use crate::model::PropertyModel;
use crate::training::batch::MoleculeBatch;
use crate::training::ema::EmaState;
use crate::training::history::{history_key, EpochMetrics, LossHistory, LossTerm, Stage};
use crate::training::loss::{contrastive_loss, CONTRASTIVE_TEMPERATURE};

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().into_scalar().elem()
}

/// Zero-weighted sum of `other`, shaped to broadcast onto a rank-2 tensor.
fn zero_of<B: Backend>(other: &Tensor<B, 2>) -> Tensor<B, 2> {
    other.clone().sum().unsqueeze::<2>() * 0.0
}

/// Computes step losses and owns the loss history and smoothing state.
#[derive(Debug, Clone)]
pub struct LossComposer {
    config: ModuleConfig,
    history: LossHistory,
    ema: EmaState,
}

impl LossComposer {
    pub fn new(config: ModuleConfig) -> Self {
        Self {
            config,
            history: LossHistory::new(),
            ema: EmaState::new(),
        }
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn history(&self) -> &LossHistory {
        &self.history
    }

    pub fn ema(&self) -> &EmaState {
        &self.ema
    }

    /// Forward `batch` through `model` and return the weighted step loss.
    ///
    /// Train and val use MSE, test uses MAE. Every active term and the total
    /// are appended to the history under `stage` as detached scalars.
    pub fn step<B: Backend, M: PropertyModel<B>>(
        &mut self,
        model: &M,
        batch: &MoleculeBatch<B>,
        stage: Stage,
    ) -> Tensor<B, 1> {
        let cfg = &self.config;
        let loss_kind = stage.loss_kind();

        let out = model.forward(
            batch.z.clone(),
            batch.pos.clone(),
            batch.spectra_input(),
            batch.batch.clone(),
            batch.num_graphs,
        );
        let device = out.pred.device();
        let mut total = Tensor::<B, 1>::zeros([1], &device);

        let reconstruct = match out.reconstruct_loss {
            Some(loss) if cfg.reconstruct_weight > 0.0 => {
                self.history.append(stage, LossTerm::Reconstruct, scalar(&loss));
                Some(loss)
            }
            _ => None,
        };

        let denoising_on =
            batch.pos_target.is_some() && cfg.denoising_weight > 0.0 && out.noise_pred.is_some();
        let contrastive_on = batch.has_spectrum(SpectrumKind::Uv)
            && cfg.contrastive_weight > 0.0
            && out.spectrum_feature.is_some()
            && out.molecule_feature.is_some();
        let keep_alive = cfg.keep_unused_outputs;

        let mut pred = out.pred;
        let mut noise_pred = out.noise_pred;

        if cfg.derivative {
            match (out.deriv, &batch.dy) {
                (Some(mut deriv), Some(dy)) => {
                    if keep_alive && batch.y.is_none() {
                        deriv = deriv + zero_of(&pred);
                    }
                    let raw = loss_kind.apply(deriv, dy.clone());
                    let loss_dy = self.ema.apply(stage, LossTerm::Dy, cfg.ema_alpha_dy, raw);
                    if cfg.force_weight > 0.0 {
                        self.history.append(stage, LossTerm::Dy, scalar(&loss_dy));
                    }
                    total = total + loss_dy * cfg.force_weight;
                }
                (None, Some(_)) => {
                    tracing::debug!(%stage, "Model produced no derivative, skipping force term")
                }
                _ => {}
            }
        }

        if let Some(y) = &batch.y {
            if y.dims()[1] != pred.dims()[1] {
                tracing::warn!(
                    %stage,
                    target_width = y.dims()[1],
                    pred_width = pred.dims()[1],
                    "Target width does not match prediction, skipping energy term"
                );
            } else {
                if keep_alive && !denoising_on {
                    if let Some(noise) = &noise_pred {
                        pred = pred + zero_of(noise);
                    }
                }
                let raw = loss_kind.apply(pred.clone(), y.clone());
                let loss_y = self.ema.apply(stage, LossTerm::Y, cfg.ema_alpha_y, raw);
                if cfg.energy_weight > 0.0 {
                    self.history.append(stage, LossTerm::Y, scalar(&loss_y));
                }
                total = total + loss_y * cfg.energy_weight;
            }
        }

        if denoising_on {
            if let (Some(mut noise), Some(pos_target)) = (noise_pred.take(), &batch.pos_target) {
                if keep_alive && batch.y.is_none() {
                    noise = noise + zero_of(&pred);
                }
                let target = model.normalize_pos_target(pos_target.clone());
                let loss_pos = loss_kind.apply(noise, target);
                self.history.append(stage, LossTerm::Pos, scalar(&loss_pos));
                total = total + loss_pos * cfg.denoising_weight;
            }
        }

        if contrastive_on {
            if let (Some(molecule), Some(spectrum)) = (out.molecule_feature, out.spectrum_feature) {
                let loss_ctr = contrastive_loss(molecule, spectrum, CONTRASTIVE_TEMPERATURE);
                self.history.append(stage, LossTerm::Contrast, scalar(&loss_ctr));
                total = total + loss_ctr * cfg.contrastive_weight;
            }
        }

        if let Some(loss) = reconstruct {
            total = total + loss * cfg.reconstruct_weight;
        }

        self.history.append(stage, LossTerm::Total, scalar(&total));
        total
    }

    /// Per-step training metrics from the latest train values.
    pub fn step_metrics<B: Backend>(
        &self,
        global_step: usize,
        lr: f64,
        batch: &MoleculeBatch<B>,
    ) -> BTreeMap<String, f64> {
        let mut metrics: BTreeMap<String, f64> = LossTerm::ALL
            .iter()
            .filter_map(|&term| {
                let last = self.history.last(Stage::Train, term)?;
                Some((format!("{}_per_step", history_key(Stage::Train, term)), last))
            })
            .collect();
        metrics.insert("lr_per_step".to_string(), lr);
        metrics.insert("step".to_string(), global_step as f64);
        metrics.insert("batch_pos_mean".to_string(), batch.pos_mean());

        tracing::debug!(
            step = global_step,
            lr,
            loss = metrics.get("train_per_step").copied().unwrap_or(f64::NAN),
            "Train step"
        );
        metrics
    }

    /// Close an epoch: build the epoch metrics and reset the history.
    ///
    /// Returns `None` during the sanity check, which still resets.
    pub fn validation_epoch_end(&mut self, epoch: usize, lr: f64, sanity_check: bool) -> Option<EpochMetrics> {
        let metrics = (!sanity_check).then(|| self.epoch_metrics(epoch, lr));
        if let Some(metrics) = &metrics {
            tracing::info!(epoch, "{metrics}");
        }
        self.history.reset();
        metrics
    }

    fn epoch_metrics(&self, epoch: usize, lr: f64) -> EpochMetrics {
        let mut metrics = EpochMetrics::new();
        metrics.insert("epoch", epoch as f64);
        metrics.insert("lr", lr);
        for stage in Stage::ALL {
            if let Some(mean) = self.history.mean(stage, LossTerm::Total) {
                metrics.insert(format!("{stage}_loss"), mean);
            }
            for term in LossTerm::ALL {
                if let (Some(suffix), Some(mean)) = (term.suffix(), self.history.mean(stage, term)) {
                    metrics.insert(format!("{stage}_loss_{suffix}"), mean);
                }
            }
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;
    use moldata::MoleculeRecord;

    use crate::model::ModelOutput;
    use crate::training::batch::SpectraInput;
    use crate::training::loss::{contrastive_loss, mse_loss};

    type TestBackend = NdArray<f32>;

    /// Model with fixed outputs, for checking the loss arithmetic.
    #[derive(Default)]
    struct FixedModel {
        pred: Vec<f32>,
        deriv: Option<Vec<f32>>,
        noise: Option<Vec<f32>>,
        features: Option<(Vec<f32>, Vec<f32>)>,
        reconstruct: Option<f32>,
        pos_scale: f32,
    }

    fn t2<B: Backend>(values: &[f32], cols: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(values.to_vec(), [values.len() / cols, cols]), device)
    }

    impl<B: Backend> PropertyModel<B> for FixedModel {
        fn forward(
            &self,
            z: Tensor<B, 1, Int>,
            _pos: Tensor<B, 2>,
            _spectra: Option<SpectraInput<B>>,
            _batch: Tensor<B, 1, Int>,
            _num_graphs: usize,
        ) -> ModelOutput<B> {
            let device = z.device();
            let mut out = ModelOutput::prediction(t2(&self.pred, 1, &device));
            out.deriv = self.deriv.as_ref().map(|d| t2(d, 3, &device));
            out.noise_pred = self.noise.as_ref().map(|n| t2(n, 3, &device));
            if let Some((mol, spec)) = &self.features {
                out.molecule_feature = Some(t2(mol, 2, &device));
                out.spectrum_feature = Some(t2(spec, 2, &device));
            }
            out.reconstruct_loss = self
                .reconstruct
                .map(|r| Tensor::from_data(TensorData::from([r]), &device));
            out
        }

        fn normalize_pos_target(&self, pos_target: Tensor<B, 2>) -> Tensor<B, 2> {
            pos_target * self.pos_scale
        }
    }

    /// Two hydrogen atoms per molecule.
    fn batch(records: Vec<MoleculeRecord>) -> MoleculeBatch<TestBackend> {
        MoleculeBatch::collate(&records, &Default::default()).unwrap()
    }

    fn h2(y: f32) -> MoleculeRecord {
        MoleculeRecord::new(vec![1, 1], vec![[0.0; 3], [0.74, 0.0, 0.0]]).with_y(vec![y])
    }

    fn value(t: Tensor<TestBackend, 1>) -> f64 {
        t.into_scalar().elem::<f32>() as f64
    }

    fn config(f: impl FnOnce(&mut ModuleConfig)) -> ModuleConfig {
        let mut cfg = ModuleConfig::default();
        f(&mut cfg);
        cfg
    }

    #[test]
    fn test_energy_only_step() {
        let mut composer = LossComposer::new(config(|c| c.energy_weight = 0.5));
        let model = FixedModel {
            pred: vec![1.0, 3.0],
            ..Default::default()
        };
        let b = batch(vec![h2(0.0), h2(1.0)]);

        // mse = (1 + 4) / 2 = 2.5
        let loss = value(composer.step(&model, &b, Stage::Train));
        assert!((loss - 1.25).abs() < 1e-6, "loss = {loss}");

        let history = composer.history();
        assert_eq!(history.get(Stage::Train, LossTerm::Y).len(), 1);
        assert!((history.get(Stage::Train, LossTerm::Y)[0] - 2.5).abs() < 1e-6);
        assert_eq!(history.get(Stage::Train, LossTerm::Total).len(), 1);
        assert!(history.get(Stage::Train, LossTerm::Dy).is_empty());
        assert!(history.get(Stage::Val, LossTerm::Total).is_empty());
    }

    #[test]
    fn test_energy_and_force_terms() {
        let mut composer = LossComposer::new(config(|c| {
            c.derivative = true;
            c.energy_weight = 1.0;
            c.force_weight = 10.0;
        }));
        let model = FixedModel {
            pred: vec![0.0],
            deriv: Some(vec![1.0, 0.0, 0.0, -1.0, 0.0, 0.0]),
            ..Default::default()
        };
        let b = batch(vec![h2(2.0).with_dy(vec![[0.0; 3], [0.0; 3]])]);

        // y: (0 - 2)^2 = 4; dy: (1 + 1) / 6
        let loss = value(composer.step(&model, &b, Stage::Val));
        let expected = 4.0 + 10.0 * (2.0 / 6.0);
        assert!((loss - expected).abs() < 1e-5, "{loss} vs {expected}");

        let history = composer.history();
        assert_eq!(history.get(Stage::Val, LossTerm::Y).len(), 1);
        assert_eq!(history.get(Stage::Val, LossTerm::Dy).len(), 1);
    }

    #[test]
    fn test_force_term_needs_derivative_flag_and_weight() {
        let model = FixedModel {
            pred: vec![2.0],
            deriv: Some(vec![1.0; 6]),
            ..Default::default()
        };
        let b = batch(vec![h2(2.0).with_dy(vec![[0.0; 3], [0.0; 3]])]);

        let mut off = LossComposer::new(config(|c| c.derivative = false));
        assert!(value(off.step(&model, &b, Stage::Train)).abs() < 1e-9);
        assert!(off.history().get(Stage::Train, LossTerm::Dy).is_empty());

        // zero weight: computed but not recorded, contributes nothing
        let mut unweighted = LossComposer::new(config(|c| {
            c.derivative = true;
            c.force_weight = 0.0;
        }));
        assert!(value(unweighted.step(&model, &b, Stage::Train)).abs() < 1e-9);
        assert!(unweighted.history().get(Stage::Train, LossTerm::Dy).is_empty());
    }

    #[test]
    fn test_ema_smooths_train_but_not_test() {
        let mut composer = LossComposer::new(config(|c| c.ema_alpha_y = 0.5));
        let b = batch(vec![h2(0.0)]);
        let at = |p: f32| FixedModel {
            pred: vec![p],
            ..Default::default()
        };

        // raw train losses 4 then 16: second is 0.5·16 + 0.5·4
        assert!((value(composer.step(&at(2.0), &b, Stage::Train)) - 4.0).abs() < 1e-6);
        assert!((value(composer.step(&at(4.0), &b, Stage::Train)) - 10.0).abs() < 1e-5);
        assert_eq!(composer.ema().get(Stage::Train, LossTerm::Y), Some(10.0));

        // test uses MAE with no smoothing
        assert!((value(composer.step(&at(4.0), &b, Stage::Test)) - 4.0).abs() < 1e-6);
        assert!((value(composer.step(&at(1.0), &b, Stage::Test)) - 1.0).abs() < 1e-6);
        assert!(composer.ema().get(Stage::Test, LossTerm::Y).is_none());
    }

    #[test]
    fn test_ema_smooths_energy_and_force_separately() {
        let mut composer = LossComposer::new(config(|c| {
            c.derivative = true;
            c.energy_weight = 1.0;
            c.force_weight = 2.0;
            c.ema_alpha_y = 0.5;
            c.ema_alpha_dy = 0.25;
        }));
        let b = batch(vec![h2(0.0).with_dy(vec![[0.0; 3], [0.0; 3]])]);
        let at = |p: f32, d: f32| FixedModel {
            pred: vec![p],
            deriv: Some(vec![d; 6]),
            ..Default::default()
        };

        // first step seeds both: y = 4, dy = 1
        let first = value(composer.step(&at(2.0, 1.0), &b, Stage::Train));
        assert!((first - (4.0 + 2.0 * 1.0)).abs() < 1e-5, "first = {first}");

        // raw y = 16, raw dy = 9
        // y: 0.5·16 + 0.5·4 = 10; dy: 0.25·9 + 0.75·1 = 3
        let second = value(composer.step(&at(4.0, 3.0), &b, Stage::Train));
        assert!((second - (10.0 + 2.0 * 3.0)).abs() < 1e-5, "second = {second}");

        let y = composer.ema().get(Stage::Train, LossTerm::Y).unwrap();
        let dy = composer.ema().get(Stage::Train, LossTerm::Dy).unwrap();
        assert!((y - 10.0).abs() < 1e-5, "y = {y}");
        assert!((dy - 3.0).abs() < 1e-5, "dy = {dy}");

        let history = composer.history();
        assert!((history.get(Stage::Train, LossTerm::Dy)[1] - 3.0).abs() < 1e-5);
        assert!((history.get(Stage::Train, LossTerm::Total)[1] - 16.0).abs() < 1e-4);
    }

    #[test]
    fn test_denoising_uses_normalized_target() {
        let mut composer = LossComposer::new(config(|c| {
            c.energy_weight = 0.0;
            c.denoising_weight = 1.0;
        }));
        let model = FixedModel {
            pred: vec![0.0],
            noise: Some(vec![1.0; 6]),
            pos_scale: 0.5,
            ..Default::default()
        };
        let b = batch(vec![
            MoleculeRecord::new(vec![1, 1], vec![[0.0; 3], [0.74, 0.0, 0.0]]).with_pos_target(vec![[2.0; 3]; 2])
        ]);
        // normalized target is 1.0 everywhere, matching the prediction
        assert!(value(composer.step(&model, &b, Stage::Train)).abs() < 1e-6);
        assert_eq!(composer.history().get(Stage::Train, LossTerm::Pos).len(), 1);

        // without a noise prediction the term is off
        let mut composer = LossComposer::new(config(|c| c.denoising_weight = 1.0));
        let silent = FixedModel {
            pred: vec![0.0],
            ..Default::default()
        };
        composer.step(&silent, &b, Stage::Train);
        assert!(composer.history().get(Stage::Train, LossTerm::Pos).is_empty());
    }

    #[test]
    fn test_contrastive_and_reconstruct_terms() {
        let mut composer = LossComposer::new(config(|c| {
            c.energy_weight = 0.0;
            c.contrastive_weight = 2.0;
            c.reconstruct_weight = 3.0;
        }));
        let mol = vec![1.0, 0.0, 0.0, 1.0];
        let spec = vec![0.0, 1.0, 1.0, 0.0];
        let model = FixedModel {
            pred: vec![0.0, 0.0],
            features: Some((mol.clone(), spec.clone())),
            reconstruct: Some(0.25),
            ..Default::default()
        };
        let with_uv = |y| h2(y).with_spectrum(SpectrumKind::Uv, vec![0.0; 4]);
        let b = batch(vec![with_uv(0.0), with_uv(0.0)]);

        let device = Default::default();
        let expected_ctr = value(contrastive_loss(
            t2::<TestBackend>(&mol, 2, &device),
            t2::<TestBackend>(&spec, 2, &device),
            CONTRASTIVE_TEMPERATURE,
        ));
        let loss = value(composer.step(&model, &b, Stage::Train));
        assert!((loss - (2.0 * expected_ctr + 0.75)).abs() < 1e-3, "{loss}");
        assert_eq!(composer.history().get(Stage::Train, LossTerm::Contrast).len(), 1);
        assert_eq!(composer.history().get(Stage::Train, LossTerm::Reconstruct), &[0.25]);

        // no uv on the batch: contrastive off, reconstruct still on
        let mut composer = LossComposer::new(composer.config().clone());
        composer.step(&model, &batch(vec![h2(0.0), h2(0.0)]), Stage::Train);
        assert!(composer.history().get(Stage::Train, LossTerm::Contrast).is_empty());
        assert_eq!(composer.history().get(Stage::Train, LossTerm::Reconstruct).len(), 1);
    }

    #[test]
    fn test_keep_unused_outputs_does_not_change_value() {
        let model = FixedModel {
            pred: vec![3.0],
            deriv: Some(vec![0.5; 6]),
            noise: Some(vec![7.0; 6]),
            ..Default::default()
        };
        let b = batch(vec![h2(1.0).with_dy(vec![[0.0; 3]; 2])]);
        let run = |keep| {
            let mut composer = LossComposer::new(config(|c| {
                c.derivative = true;
                c.keep_unused_outputs = keep;
            }));
            value(composer.step(&model, &b, Stage::Train))
        };
        assert!((run(false) - run(true)).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_target_width_skips_energy() {
        let mut composer = LossComposer::new(ModuleConfig::default());
        let model = FixedModel {
            pred: vec![0.0],
            ..Default::default()
        };
        let wide = MoleculeRecord::new(vec![1], vec![[0.0; 3]]).with_y(vec![1.0, 2.0]);
        let loss = value(composer.step(&model, &batch(vec![wide]), Stage::Train));
        assert_eq!(loss, 0.0);
        assert!(composer.history().get(Stage::Train, LossTerm::Y).is_empty());
    }

    #[test]
    fn test_step_metrics_keys() {
        let mut composer = LossComposer::new(ModuleConfig::default());
        let model = FixedModel {
            pred: vec![1.0],
            ..Default::default()
        };
        let b = batch(vec![h2(0.0)]);
        composer.step(&model, &b, Stage::Train);
        composer.step(&model, &b, Stage::Val);

        let metrics = composer.step_metrics(7, 1e-4, &b);
        assert_eq!(metrics.get("train_per_step"), Some(&1.0));
        assert_eq!(metrics.get("train_y_per_step"), Some(&1.0));
        assert_eq!(metrics.get("step"), Some(&7.0));
        assert_eq!(metrics.get("lr_per_step"), Some(&1e-4));
        assert!((metrics["batch_pos_mean"] - 0.74 / 6.0).abs() < 1e-6);
        assert!(!metrics.contains_key("val_per_step"));
        assert!(!metrics.contains_key("train_dy_per_step"));
    }

    #[test]
    fn test_validation_epoch_end() {
        let mut composer = LossComposer::new(ModuleConfig::default());
        let b = batch(vec![h2(0.0)]);
        let at = |p: f32| FixedModel {
            pred: vec![p],
            ..Default::default()
        };
        composer.step(&at(1.0), &b, Stage::Train);
        composer.step(&at(3.0), &b, Stage::Train);
        composer.step(&at(2.0), &b, Stage::Val);

        let metrics = composer.validation_epoch_end(4, 1e-3, false).unwrap();
        assert_eq!(metrics.epoch(), Some(4));
        assert_eq!(metrics.get("lr"), Some(1e-3));
        assert!((metrics.get("train_loss").unwrap() - 5.0).abs() < 1e-6);
        assert!((metrics.val_loss().unwrap() - 4.0).abs() < 1e-6);
        assert!(metrics.contains("train_loss_y"));
        assert!(metrics.contains("val_loss_y"));
        assert!(!metrics.contains("test_loss"));
        assert!(!metrics.contains("train_loss_dy"));
        assert!(composer.history().is_empty(), "history resets at epoch end");

        composer.step(&at(2.0), &b, Stage::Test);
        assert!(composer.validation_epoch_end(0, 1e-3, true).is_none());
        assert!(composer.history().is_empty(), "sanity check still resets");
    }

    #[test]
    fn test_mse_helper_matches_stage_loss() {
        let device = Default::default();
        let a = t2::<TestBackend>(&[1.0, 2.0], 1, &device);
        let b = t2::<TestBackend>(&[0.0, 0.0], 1, &device);
        assert!((value(mse_loss(a.clone(), b.clone())) - value(Stage::Val.loss_kind().apply(a, b))).abs() < 1e-9);
    }
}
