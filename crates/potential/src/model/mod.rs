//! Model seam for property training and a reference atomwise model.
//!
//! The loss composer only talks to [`PropertyModel`]; any burn module that
//! maps atoms, positions and optional spectra to a [`ModelOutput`] can be
//! trained.

pub mod atomwise;

use burn::prelude::*;

use crate::training::batch::SpectraInput;

/// Everything a forward pass may produce.
///
/// Only `pred` is mandatory. Absent optional outputs disable the loss terms
/// that depend on them.
#[derive(Debug, Clone)]
pub struct ModelOutput<B: Backend> {
    /// Per-molecule prediction, shape `(num_graphs, 1)`.
    pub pred: Tensor<B, 2>,
    /// Per-atom noise prediction, shape `(n_atoms, 3)`.
    pub noise_pred: Option<Tensor<B, 2>>,
    /// Per-atom derivative (force) prediction, shape `(n_atoms, 3)`.
    pub deriv: Option<Tensor<B, 2>>,
    /// Spectrum embedding, shape `(num_graphs, d)`.
    pub spectrum_feature: Option<Tensor<B, 2>>,
    /// Molecule embedding matched against `spectrum_feature`, shape `(num_graphs, d)`.
    pub molecule_feature: Option<Tensor<B, 2>>,
    /// Auxiliary reconstruction loss computed inside the model.
    pub reconstruct_loss: Option<Tensor<B, 1>>,
}

impl<B: Backend> ModelOutput<B> {
    /// Output with a prediction only.
    pub fn prediction(pred: Tensor<B, 2>) -> Self {
        Self {
            pred,
            noise_pred: None,
            deriv: None,
            spectrum_feature: None,
            molecule_feature: None,
            reconstruct_loss: None,
        }
    }
}

/// A trainable molecular property model.
pub trait PropertyModel<B: Backend> {
    /// Run the model over a batch.
    ///
    /// - `z`: atomic numbers, shape `(n_atoms,)`
    /// - `pos`: positions, shape `(n_atoms, 3)`
    /// - `spectra`: auxiliary spectral input, when the batch has a full triple
    /// - `batch`: molecule index of every atom, shape `(n_atoms,)`
    /// - `num_graphs`: number of molecules
    fn forward(
        &self,
        z: Tensor<B, 1, Int>,
        pos: Tensor<B, 2>,
        spectra: Option<SpectraInput<B>>,
        batch: Tensor<B, 1, Int>,
        num_graphs: usize,
    ) -> ModelOutput<B>;

    /// Number of atom types the model can embed; atomic numbers must stay
    /// below it. `None` when any atomic number is accepted.
    fn max_z(&self) -> Option<usize> {
        None
    }

    /// Map a denoising target into the space the noise head predicts in.
    fn normalize_pos_target(&self, pos_target: Tensor<B, 2>) -> Tensor<B, 2> {
        pos_target
    }
}
