//! Data types for molecule records, spectra and dataset summaries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Spectral feature attached to a molecule.
///
/// Variant names double as the batch field names (`uv`, `ir`, `raman`,
/// `h_nmr`, `c_nmr`) and the Parquet column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumKind {
    Uv,
    Ir,
    Raman,
    HNmr,
    CNmr,
}

impl SpectrumKind {
    /// Every spectrum kind, in column order.
    pub const ALL: [SpectrumKind; 5] = [
        SpectrumKind::Uv,
        SpectrumKind::Ir,
        SpectrumKind::Raman,
        SpectrumKind::HNmr,
        SpectrumKind::CNmr,
    ];

    /// Field / column name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Uv => "uv",
            Self::Ir => "ir",
            Self::Raman => "raman",
            Self::HNmr => "h_nmr",
            Self::CNmr => "c_nmr",
        }
    }
}

impl fmt::Display for SpectrumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single molecule as stored on disk and yielded by the dataset adapters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MoleculeRecord {
    /// Atomic number of every atom.
    pub atomic_numbers: Vec<u8>,
    /// Cartesian coordinates, one row per atom.
    pub positions: Vec<[f32; 3]>,
    /// Per-molecule target row. The full property row on disk, a single
    /// column once a label selector has run. `None` for unlabeled sets.
    pub y: Option<Vec<f32>>,
    /// Per-atom forces (negative energy derivative).
    pub dy: Option<Vec<[f32; 3]>>,
    /// Per-atom displacement the denoising head should recover.
    pub pos_target: Option<Vec<[f32; 3]>>,
    /// Spectral features keyed by kind.
    pub spectra: BTreeMap<SpectrumKind, Vec<f32>>,
}

impl MoleculeRecord {
    /// Create a record with coordinates only.
    pub fn new(atomic_numbers: Vec<u8>, positions: Vec<[f32; 3]>) -> Self {
        Self {
            atomic_numbers,
            positions,
            ..Self::default()
        }
    }

    /// Attach a target row.
    pub fn with_y(mut self, y: Vec<f32>) -> Self {
        self.y = Some(y);
        self
    }

    /// Attach per-atom forces.
    pub fn with_dy(mut self, dy: Vec<[f32; 3]>) -> Self {
        self.dy = Some(dy);
        self
    }

    /// Attach a denoising target.
    pub fn with_pos_target(mut self, pos_target: Vec<[f32; 3]>) -> Self {
        self.pos_target = Some(pos_target);
        self
    }

    /// Attach a spectrum.
    pub fn with_spectrum(mut self, kind: SpectrumKind, values: Vec<f32>) -> Self {
        self.spectra.insert(kind, values);
        self
    }

    pub fn num_atoms(&self) -> usize {
        self.atomic_numbers.len()
    }

    pub fn has_spectrum(&self, kind: SpectrumKind) -> bool {
        self.spectra.contains_key(&kind)
    }

    /// Check that every per-atom field has one row per atom.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.num_atoms();
        if n == 0 {
            return Err("molecule has no atoms".to_string());
        }
        if self.positions.len() != n {
            return Err(format!("{} positions for {n} atoms", self.positions.len()));
        }
        if let Some(dy) = &self.dy {
            if dy.len() != n {
                return Err(format!("{} force rows for {n} atoms", dy.len()));
            }
        }
        if let Some(pos_target) = &self.pos_target {
            if pos_target.len() != n {
                return Err(format!("{} pos_target rows for {n} atoms", pos_target.len()));
            }
        }
        Ok(())
    }
}

/// Summary statistics over a molecule Parquet file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoleculeSummary {
    /// Number of molecules.
    pub total_records: usize,
    /// Number of atoms across all molecules.
    pub total_atoms: usize,
    /// Largest molecule, in atoms.
    pub max_atoms: usize,
    /// Width of the target row, if any record carries one.
    pub target_width: Option<usize>,
    /// Records carrying forces.
    pub with_forces: usize,
    /// Records carrying a denoising target.
    pub with_pos_target: usize,
    /// Records carrying each spectrum kind.
    pub spectra: BTreeMap<SpectrumKind, usize>,
}

impl MoleculeSummary {
    /// Mean atoms per molecule, 0 for an empty file.
    pub fn mean_atoms(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        self.total_atoms as f64 / self.total_records as f64
    }
}
