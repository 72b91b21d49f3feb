//! Property label selection for QM9-style target tables.
//!
//! A QM9 record carries the full property row. Training uses a single
//! property, chosen by name (`"homo"`, `"energy_U0"`) or by a short alias
//! (`"U0"`, `"mu"`). The selector resolves the name to a fixed column and
//! slices every record down to that one column.

use crate::error::DatasetError;
use crate::types::MoleculeRecord;

/// Canonical QM9 property names, indexed by target column.
pub const QM9_PROPERTIES: [&str; 12] = [
    "dipole_moment",
    "isotropic_polarizability",
    "homo",
    "lumo",
    "gap",
    "electronic_spatial_extent",
    "zpve",
    "energy_U0",
    "energy_U",
    "enthalpy_H",
    "free_energy",
    "heat_capacity",
];

/// Largest atomic number covered by a reference table.
pub const DEFAULT_MAX_Z: usize = 100;

/// Atoms with a reference energy in QM9: H, C, N, O, F.
const ATOMREF_ELEMENTS: [usize; 5] = [1, 6, 7, 8, 9];

/// Single-atom reference values per target column, in eV.
const QM9_ATOMREFS: [(usize, [f32; 5]); 6] = [
    (6, [0.0, 0.0, 0.0, 0.0, 0.0]),
    (7, [-13.613_122, -1029.863_1, -1485.302_5, -2042.611_2, -2713.484_9]),
    (8, [-13.574_59, -1029.824_6, -1485.264, -2042.572_7, -2713.446_3]),
    (9, [-13.548_876, -1029.798_9, -1485.238_3, -2042.547, -2713.420_7]),
    (10, [-13.903_032, -1030.258_9, -1485.711_7, -2043.018_1, -2713.888]),
    (11, [0.0, 0.0, 0.0, 0.0, 0.0]),
];

/// Which short aliases a dataset accepts on top of the canonical names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasSet {
    /// Plain QM9: `mu`, `alpha`, `r2`, `U0`, `U`, `H`, `G`, `cv`.
    Qm9,
    /// QM9 with spectra: only `alpha`, `U0`, `U`.
    Qm9Spectra,
}

impl AliasSet {
    /// Alias → canonical name pairs accepted by this set.
    pub fn aliases(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Qm9 => &[
                ("mu", "dipole_moment"),
                ("alpha", "isotropic_polarizability"),
                ("r2", "electronic_spatial_extent"),
                ("U0", "energy_U0"),
                ("U", "energy_U"),
                ("H", "enthalpy_H"),
                ("G", "free_energy"),
                ("cv", "heat_capacity"),
            ],
            Self::Qm9Spectra => &[
                ("alpha", "isotropic_polarizability"),
                ("U0", "energy_U0"),
                ("U", "energy_U"),
            ],
        }
    }

    /// Resolve a user-supplied name to a canonical property name.
    pub fn resolve(self, name: &str) -> Option<&'static str> {
        let canonical = self
            .aliases()
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(name);
        QM9_PROPERTIES.iter().copied().find(|p| *p == canonical)
    }
}

fn available_properties() -> String {
    QM9_PROPERTIES.join(", ")
}

/// Resolved property label: canonical name plus target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelSelector {
    label: &'static str,
    column: usize,
}

impl LabelSelector {
    /// Resolve `dataset_arg` against the canonical names and `aliases`.
    ///
    /// # Errors
    /// `MissingProperty` when no name is given, `UnknownProperty` when the
    /// name matches neither a canonical name nor an alias.
    pub fn new(dataset_arg: Option<&str>, aliases: AliasSet) -> Result<Self, DatasetError> {
        let name = dataset_arg.ok_or_else(|| DatasetError::MissingProperty {
            available: available_properties(),
        })?;
        let label = aliases
            .resolve(name)
            .ok_or_else(|| DatasetError::UnknownProperty {
                name: name.to_string(),
                available: available_properties(),
            })?;
        let column = QM9_PROPERTIES
            .iter()
            .position(|p| *p == label)
            .ok_or_else(|| DatasetError::UnknownProperty {
                name: name.to_string(),
                available: available_properties(),
            })?;
        Ok(Self { label, column })
    }

    /// Canonical property name.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Target column index.
    pub fn column(&self) -> usize {
        self.column
    }

    /// Pick the selected column out of a full target row.
    pub fn select(&self, row: &[f32]) -> Result<f32, DatasetError> {
        row.get(self.column)
            .copied()
            .ok_or(DatasetError::TargetWidth {
                width: row.len(),
                column: self.column,
            })
    }

    /// Replace the record's target row with the single selected column.
    pub fn filter(&self, mut record: MoleculeRecord) -> Result<MoleculeRecord, DatasetError> {
        let row = record.y.as_deref().ok_or(DatasetError::MissingTarget)?;
        let value = self.select(row)?;
        record.y = Some(vec![value]);
        Ok(record)
    }

    /// Per-atom reference values for the selected property, sized `max_z`.
    ///
    /// Returns `None` for properties without single-atom references.
    pub fn atomref(&self, max_z: usize) -> Option<Vec<f32>> {
        qm9_atomref(self.column).map(|table| resize_atomref(table, max_z))
    }
}

/// Natural QM9 reference table for a target column (length [`DEFAULT_MAX_Z`]).
pub fn qm9_atomref(column: usize) -> Option<Vec<f32>> {
    let (_, values) = QM9_ATOMREFS.iter().find(|(c, _)| *c == column)?;
    let mut table = vec![0.0; DEFAULT_MAX_Z];
    for (&z, &v) in ATOMREF_ELEMENTS.iter().zip(values.iter()) {
        table[z] = v;
    }
    Some(table)
}

/// Zero-pad or truncate a reference table to exactly `max_z` entries.
pub fn resize_atomref(mut table: Vec<f32>, max_z: usize) -> Vec<f32> {
    table.resize(max_z, 0.0);
    table
}
