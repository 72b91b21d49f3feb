//! Regression and contrastive losses for property training.
//!
//! All functions are generic over `B: Backend` and return a scalar tensor of
//! shape `(1,)`.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Default InfoNCE temperature for molecule/spectrum pairs.
pub const CONTRASTIVE_TEMPERATURE: f64 = 0.07;

/// Element-wise regression loss applied by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    /// Mean squared error.
    Mse,
    /// Mean absolute error.
    L1,
}

impl LossKind {
    pub fn apply<B: Backend, const D: usize>(self, pred: Tensor<B, D>, target: Tensor<B, D>) -> Tensor<B, 1> {
        match self {
            Self::Mse => mse_loss(pred, target),
            Self::L1 => l1_loss(pred, target),
        }
    }
}

/// Mean squared error over every element.
pub fn mse_loss<B: Backend, const D: usize>(pred: Tensor<B, D>, target: Tensor<B, D>) -> Tensor<B, 1> {
    (pred - target).powf_scalar(2.0).mean()
}

/// Mean absolute error over every element.
pub fn l1_loss<B: Backend, const D: usize>(pred: Tensor<B, D>, target: Tensor<B, D>) -> Tensor<B, 1> {
    (pred - target).abs().mean()
}

/// Row-wise L2 normalization with a small floor on the norm.
fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-8);
    x / norm
}

/// InfoNCE over cosine similarities between molecule and spectrum embeddings.
///
/// Row `i` of both inputs describes the same molecule, so the diagonal of the
/// `(batch, batch)` similarity matrix holds the positives and every other
/// column in a row is a distractor.
///
/// # Arguments
/// - `molecule`: shape `(batch, d)`
/// - `spectrum`: shape `(batch, d)`
pub fn contrastive_loss<B: Backend>(
    molecule: Tensor<B, 2>,
    spectrum: Tensor<B, 2>,
    temperature: f64,
) -> Tensor<B, 1> {
    let device = molecule.device();
    let [batch_size, _d] = molecule.dims();

    let logits = l2_normalize(molecule).matmul(l2_normalize(spectrum).transpose()) / temperature;
    let labels = Tensor::<B, 1, Int>::arange(0..batch_size as i64, &device);

    CrossEntropyLossConfig::new()
        .init(&device)
        .forward(logits, labels)
}
