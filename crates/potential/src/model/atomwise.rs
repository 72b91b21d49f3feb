use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::silu;
use burn::tensor::TensorData;

use crate::model::{ModelOutput, PropertyModel};
use crate::training::batch::SpectraInput;
use crate::training::loss::mse_loss;

/// Configuration for the [`AtomwiseModel`].
///
/// ```text
/// z → Embedding(max_z→hidden) ⊕ pos
///   → Linear(hidden+3→hidden) → SiLU → Linear(hidden→hidden) → SiLU = h
/// h → Linear(hidden→1) (+ atomref[z]) → sum per molecule → pred
/// h → Linear(hidden→3) → deriv / noise_pred
/// sum per molecule of h → Linear(hidden→feature) → molecule_feature
/// concat(spectra) → Linear(Σdims→feature) → spectrum_feature
/// molecule_feature → Linear(feature→Σdims) → reconstruct_loss
/// ```
#[derive(Config, Debug)]
pub struct AtomwiseModelConfig {
    /// Size of the atom-type vocabulary.
    #[config(default = 100)]
    pub max_z: usize,
    #[config(default = 64)]
    pub hidden_channels: usize,
    /// Predict per-atom derivatives.
    #[config(default = true)]
    pub force_head: bool,
    /// Predict per-atom noise for denoising.
    #[config(default = false)]
    pub noise_head: bool,
    /// Lengths of the three spectra the encoder accepts. Empty disables the
    /// spectral heads.
    #[config(default = "Vec::new()")]
    pub spectrum_dims: Vec<usize>,
    /// Width of the shared molecule/spectrum embedding.
    #[config(default = 32)]
    pub feature_dim: usize,
    /// Also decode spectra from the molecule embedding.
    #[config(default = false)]
    pub reconstruct: bool,
    /// Standard deviation the denoising target is divided by.
    #[config(default = 1.0)]
    pub pos_target_std: f64,
}

/// Per-atom MLP with sum pooling and optional auxiliary heads.
#[derive(Module, Debug)]
pub struct AtomwiseModel<B: Backend> {
    embedding: Embedding<B>,
    input: Linear<B>,
    hidden: Linear<B>,
    energy_out: Linear<B>,
    force_out: Option<Linear<B>>,
    noise_out: Option<Linear<B>>,
    /// Frozen per-element reference values added to atom energies.
    atomref: Option<Embedding<B>>,
    molecule_proj: Option<Linear<B>>,
    spectrum_encoder: Option<Linear<B>>,
    spectrum_decoder: Option<Linear<B>>,
    spectrum_width: usize,
    pos_target_std: f64,
}

impl AtomwiseModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AtomwiseModel<B> {
        let hidden = self.hidden_channels;
        let spectrum_width: usize = if self.spectrum_dims.len() == 3 {
            self.spectrum_dims.iter().sum()
        } else {
            0
        };
        let spectral = spectrum_width > 0;

        AtomwiseModel {
            embedding: EmbeddingConfig::new(self.max_z, hidden).init(device),
            input: LinearConfig::new(hidden + 3, hidden).init(device),
            hidden: LinearConfig::new(hidden, hidden).init(device),
            energy_out: LinearConfig::new(hidden, 1).init(device),
            force_out: self.force_head.then(|| LinearConfig::new(hidden, 3).init(device)),
            noise_out: self.noise_head.then(|| LinearConfig::new(hidden, 3).init(device)),
            atomref: None,
            molecule_proj: spectral.then(|| LinearConfig::new(hidden, self.feature_dim).init(device)),
            spectrum_encoder: spectral.then(|| LinearConfig::new(spectrum_width, self.feature_dim).init(device)),
            spectrum_decoder: (spectral && self.reconstruct)
                .then(|| LinearConfig::new(self.feature_dim, spectrum_width).init(device)),
            spectrum_width,
            pos_target_std: self.pos_target_std,
        }
    }

    /// Initialize with a frozen atomref prior of `max_z` entries.
    ///
    /// Shorter tables are zero-padded and longer ones truncated.
    pub fn init_with_atomref<B: Backend>(&self, atomref: &[f32], device: &B::Device) -> AtomwiseModel<B> {
        let mut table = vec![0.0f32; self.max_z];
        let n = atomref.len().min(self.max_z);
        table[..n].copy_from_slice(&atomref[..n]);

        let mut prior = EmbeddingConfig::new(self.max_z, 1).init::<B>(device);
        prior.weight = burn::module::Param::from_tensor(Tensor::from_data(
            TensorData::new(table, [self.max_z, 1]),
            device,
        ));

        let mut model = self.init(device);
        model.atomref = Some(prior.no_grad());
        model
    }
}

impl<B: Backend> AtomwiseModel<B> {
    /// Look up a per-atom embedding table, returning `(n_atoms, d)`.
    fn lookup(table: &Embedding<B>, z: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        table.forward(z.unsqueeze_dim::<2>(0)).squeeze::<2>(0)
    }

    /// Sum per-atom rows into per-molecule rows.
    fn pool(values: Tensor<B, 2>, batch: Tensor<B, 1, Int>, num_graphs: usize) -> Tensor<B, 2> {
        let [_, width] = values.dims();
        Tensor::zeros([num_graphs, width], &values.device()).select_assign(0, batch, values)
    }

    pub fn has_atomref(&self) -> bool {
        self.atomref.is_some()
    }

    fn encode_spectra(
        &self,
        spectra: Option<SpectraInput<B>>,
    ) -> Option<(&Linear<B>, &Linear<B>, Tensor<B, 2>)> {
        let (proj, encoder) = (self.molecule_proj.as_ref()?, self.spectrum_encoder.as_ref()?);
        let spectra = Tensor::cat(spectra?.tensors.to_vec(), 1);
        let width = spectra.dims()[1];
        if width != self.spectrum_width {
            tracing::warn!(
                width,
                expected = self.spectrum_width,
                "Spectra width does not match the encoder, skipping spectral heads"
            );
            return None;
        }
        Some((proj, encoder, spectra))
    }
}

impl<B: Backend> PropertyModel<B> for AtomwiseModel<B> {
    fn forward(
        &self,
        z: Tensor<B, 1, Int>,
        pos: Tensor<B, 2>,
        spectra: Option<SpectraInput<B>>,
        batch: Tensor<B, 1, Int>,
        num_graphs: usize,
    ) -> ModelOutput<B> {
        let h = Self::lookup(&self.embedding, z.clone());
        let h = silu(self.input.forward(Tensor::cat(vec![h, pos], 1)));
        let h = silu(self.hidden.forward(h));

        let mut atom_energy = self.energy_out.forward(h.clone());
        if let Some(atomref) = &self.atomref {
            atom_energy = atom_energy + Self::lookup(atomref, z);
        }
        let pred = Self::pool(atom_energy, batch.clone(), num_graphs);

        let mut output = ModelOutput::prediction(pred);
        output.deriv = self.force_out.as_ref().map(|head| head.forward(h.clone()));
        output.noise_pred = self.noise_out.as_ref().map(|head| head.forward(h.clone()));

        if let Some((proj, encoder, spectra)) = self.encode_spectra(spectra) {
            let molecule = proj.forward(Self::pool(h, batch, num_graphs));
            output.spectrum_feature = Some(encoder.forward(spectra.clone()));
            output.reconstruct_loss = self
                .spectrum_decoder
                .as_ref()
                .map(|decoder| mse_loss(decoder.forward(molecule.clone()), spectra));
            output.molecule_feature = Some(molecule);
        }
        output
    }

    fn max_z(&self) -> Option<usize> {
        Some(self.embedding.weight.dims()[0])
    }

    fn normalize_pos_target(&self, pos_target: Tensor<B, 2>) -> Tensor<B, 2> {
        pos_target / self.pos_target_std
    }
}
