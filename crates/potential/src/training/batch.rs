//! Collation of molecule records into graph-style burn batches.
//!
//! Atoms from every molecule are concatenated along the first axis and a
//! `batch` index maps each atom back to its molecule. Per-molecule fields
//! (`y`, spectra) get one row per molecule.

use std::collections::BTreeMap;

use burn::prelude::*;
use burn::tensor::TensorData;
use moldata::{DatasetError, MoleculeRecord, SpectrumKind};

/// Field triples the model accepts as auxiliary spectral input, tried in order.
pub const SPECTRA_TRIPLES: [[SpectrumKind; 3]; 2] = [
    [SpectrumKind::Uv, SpectrumKind::Ir, SpectrumKind::Raman],
    [SpectrumKind::Ir, SpectrumKind::HNmr, SpectrumKind::CNmr],
];

/// Spectra handed to the model, in the order of the matched triple.
#[derive(Debug, Clone)]
pub struct SpectraInput<B: Backend> {
    pub kinds: [SpectrumKind; 3],
    pub tensors: [Tensor<B, 2>; 3],
}

/// A collated batch of molecules.
#[derive(Debug, Clone)]
pub struct MoleculeBatch<B: Backend> {
    /// Atomic numbers, shape `(n_atoms,)`.
    pub z: Tensor<B, 1, Int>,
    /// Positions, shape `(n_atoms, 3)`.
    pub pos: Tensor<B, 2>,
    /// Molecule index of every atom, shape `(n_atoms,)`.
    pub batch: Tensor<B, 1, Int>,
    /// Number of molecules in the batch.
    pub num_graphs: usize,
    /// Targets, shape `(num_graphs, width)`.
    pub y: Option<Tensor<B, 2>>,
    /// Forces, shape `(n_atoms, 3)`.
    pub dy: Option<Tensor<B, 2>>,
    /// Denoising target, shape `(n_atoms, 3)`.
    pub pos_target: Option<Tensor<B, 2>>,
    /// Spectra, shape `(num_graphs, len)` each.
    pub spectra: BTreeMap<SpectrumKind, Tensor<B, 2>>,
}

fn atom_rows<B: Backend>(rows: Vec<&[[f32; 3]]>, device: &B::Device) -> Tensor<B, 2> {
    let n: usize = rows.iter().map(|r| r.len()).sum();
    let flat: Vec<f32> = rows
        .iter()
        .flat_map(|r| r.iter().flat_map(|p| p.iter().copied()))
        .collect();
    Tensor::from_data(TensorData::new(flat, [n, 3]), device)
}

fn molecule_rows<B: Backend>(rows: Vec<&[f32]>, width: usize, device: &B::Device) -> Tensor<B, 2> {
    let n = rows.len();
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::from_data(TensorData::new(flat, [n, width]), device)
}

/// Collect a per-record field that must be present on every record.
///
/// Returns `None` when no record has it; logs and returns `None` when only
/// some records do.
fn all_or_none<'a, T: ?Sized>(
    records: &'a [MoleculeRecord],
    field: &str,
    get: impl Fn(&'a MoleculeRecord) -> Option<&'a T>,
) -> Option<Vec<&'a T>> {
    let values: Vec<&T> = records.iter().filter_map(&get).collect();
    if values.is_empty() {
        return None;
    }
    if values.len() != records.len() {
        tracing::warn!(
            field,
            present = values.len(),
            batch = records.len(),
            "Field present on only part of the batch, dropping it"
        );
        return None;
    }
    Some(values)
}

fn uniform_width(rows: &[&[f32]], field: &str) -> anyhow::Result<usize> {
    let width = rows[0].len();
    if let Some(bad) = rows.iter().find(|r| r.len() != width) {
        anyhow::bail!(
            "Field {field} has rows of width {width} and {} in the same batch",
            bad.len()
        );
    }
    Ok(width)
}

impl<B: Backend> MoleculeBatch<B> {
    /// Collate records into a batch on `device`.
    ///
    /// # Errors
    /// Fails on an empty slice or on per-molecule fields of mixed width.
    pub fn collate(records: &[MoleculeRecord], device: &B::Device) -> anyhow::Result<Self> {
        if records.is_empty() {
            anyhow::bail!("Cannot collate an empty batch");
        }

        let n_atoms: usize = records.iter().map(|r| r.num_atoms()).sum();
        let z: Vec<i64> = records
            .iter()
            .flat_map(|r| r.atomic_numbers.iter().map(|&z| z as i64))
            .collect();
        let batch_index: Vec<i64> = records
            .iter()
            .enumerate()
            .flat_map(|(i, r)| std::iter::repeat(i as i64).take(r.num_atoms()))
            .collect();

        let pos = atom_rows::<B>(records.iter().map(|r| r.positions.as_slice()).collect(), device);

        let y = match all_or_none(records, "y", |r| r.y.as_deref()) {
            Some(rows) => {
                let width = uniform_width(&rows, "y")?;
                Some(molecule_rows::<B>(rows, width, device))
            }
            None => None,
        };
        let dy = all_or_none(records, "dy", |r| r.dy.as_deref()).map(|rows| atom_rows::<B>(rows, device));
        let pos_target = all_or_none(records, "pos_target", |r| r.pos_target.as_deref())
            .map(|rows| atom_rows::<B>(rows, device));

        let mut spectra = BTreeMap::new();
        for kind in SpectrumKind::ALL {
            if let Some(rows) = all_or_none(records, kind.name(), |r| r.spectra.get(&kind).map(|v| v.as_slice())) {
                let width = uniform_width(&rows, kind.name())?;
                spectra.insert(kind, molecule_rows::<B>(rows, width, device));
            }
        }

        Ok(Self {
            z: Tensor::from_data(TensorData::new(z, [n_atoms]), device),
            pos,
            batch: Tensor::from_data(TensorData::new(batch_index, [n_atoms]), device),
            num_graphs: records.len(),
            y,
            dy,
            pos_target,
            spectra,
        })
    }

    pub fn num_atoms(&self) -> usize {
        self.z.dims()[0]
    }

    pub fn has_spectrum(&self, kind: SpectrumKind) -> bool {
        self.spectra.contains_key(&kind)
    }

    /// Auxiliary spectral input for the model, if a full triple is present.
    pub fn spectra_input(&self) -> Option<SpectraInput<B>> {
        SPECTRA_TRIPLES.iter().find_map(|triple| {
            let [a, b, c] = triple.map(|kind| self.spectra.get(&kind).cloned());
            Some(SpectraInput {
                kinds: *triple,
                tensors: [a?, b?, c?],
            })
        })
    }

    /// Replace the target matrix with a single `(num_graphs, 1)` column.
    ///
    /// A batch without targets is returned unchanged.
    pub fn select_label_column(mut self, column: usize) -> Result<Self, DatasetError> {
        if let Some(y) = self.y.take() {
            let [rows, width] = y.dims();
            if column >= width {
                return Err(DatasetError::TargetWidth { width, column });
            }
            self.y = Some(y.slice([0..rows, column..column + 1]));
        }
        Ok(self)
    }

    /// Mean coordinate value over the batch.
    pub fn pos_mean(&self) -> f64 {
        self.pos.clone().mean().into_scalar().elem()
    }
}
