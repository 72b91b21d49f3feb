//! Dataset adapters over molecule Parquet files.
//!
//! Every adapter reads `<root>/processed/<file>.parquet` into memory and
//! exposes burn's random-access [`Dataset`] contract. Items pass through the
//! optional user transform first, then through the label filter.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;
use crate::label::{AliasSet, LabelSelector};
use crate::reader::MoleculeReader;
use crate::types::MoleculeRecord;

/// User-supplied per-item transform, applied before label selection.
pub type Transform = Box<dyn Fn(MoleculeRecord) -> MoleculeRecord + Send + Sync>;

/// Molecules available in MD17, selected by `dataset_arg`.
pub const MD17_MOLECULES: [&str; 18] = [
    "benzene",
    "uracil",
    "naphthalene",
    "aspirin",
    "salicylic_acid",
    "malonaldehyde",
    "ethanol",
    "toluene",
    "revised_benzene",
    "revised_uracil",
    "revised_naphthalene",
    "revised_aspirin",
    "revised_salicylic_acid",
    "revised_malonaldehyde",
    "revised_ethanol",
    "revised_toluene",
    "revised_azobenzene",
    "revised_paracetamol",
];

/// Known dataset adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// QM9 property table.
    Qm9,
    /// QM9 with UV/IR/Raman spectra.
    Qm9sp,
    /// MD17 trajectories, one molecule per file.
    Md17,
    /// ANI-1 conformer energies.
    Ani1,
    /// Energies and/or forces with no label selection.
    Custom,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 5] = [Self::Qm9, Self::Qm9sp, Self::Md17, Self::Ani1, Self::Custom];

    /// Processed file name under `<root>/processed/`.
    ///
    /// For MD17 this is the directory holding one `<molecule>.parquet` per
    /// molecule; see [`md17_path`].
    pub fn processed_file_name(self) -> &'static str {
        match self {
            Self::Qm9 => "qm9.parquet",
            Self::Qm9sp => "data_with_uv_ir_raman.parquet",
            Self::Md17 => "md17",
            Self::Ani1 => "ani1.parquet",
            Self::Custom => "custom.parquet",
        }
    }

    /// Alias set for label selection, `None` for unlabeled adapters.
    pub fn alias_set(self) -> Option<AliasSet> {
        match self {
            Self::Qm9 => Some(AliasSet::Qm9),
            Self::Qm9sp => Some(AliasSet::Qm9Spectra),
            Self::Md17 | Self::Ani1 | Self::Custom => None,
        }
    }

    /// Path of the processed file for a dataset root.
    pub fn processed_path(self, root: &Path) -> PathBuf {
        root.join("processed").join(self.processed_file_name())
    }

    /// Path the adapter reads for `dataset_arg`.
    ///
    /// MD17 resolves the molecule name; other kinds ignore the argument here.
    pub fn source_path(self, root: &Path, dataset_arg: Option<&str>) -> Result<PathBuf, DatasetError> {
        match self {
            Self::Md17 => Ok(md17_path(root, resolve_md17_molecule(dataset_arg)?)),
            _ => Ok(self.processed_path(root)),
        }
    }
}

/// Resolve an MD17 molecule name.
///
/// # Errors
/// `MissingMolecule` without a name, `UnknownMolecule` for a name outside
/// [`MD17_MOLECULES`]. Both list the available molecules.
pub fn resolve_md17_molecule(dataset_arg: Option<&str>) -> Result<&'static str, DatasetError> {
    let available = || MD17_MOLECULES.join(", ");
    let name = dataset_arg.ok_or_else(|| DatasetError::MissingMolecule { available: available() })?;
    MD17_MOLECULES
        .iter()
        .copied()
        .find(|m| *m == name)
        .ok_or_else(|| DatasetError::UnknownMolecule {
            name: name.to_string(),
            available: available(),
        })
}

/// `<root>/processed/md17/<molecule>.parquet`.
pub fn md17_path(root: &Path, molecule: &str) -> PathBuf {
    DatasetKind::Md17.processed_path(root).join(format!("{molecule}.parquet"))
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Qm9 => write!(f, "qm9"),
            Self::Qm9sp => write!(f, "qm9sp"),
            Self::Md17 => write!(f, "md17"),
            Self::Ani1 => write!(f, "ani1"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for DatasetKind {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qm9" => Ok(Self::Qm9),
            "qm9sp" => Ok(Self::Qm9sp),
            "md17" => Ok(Self::Md17),
            "ani1" => Ok(Self::Ani1),
            "custom" => Ok(Self::Custom),
            _ => Err(DatasetError::UnknownKind(s.to_string())),
        }
    }
}

/// In-memory molecule dataset with an optional transform and label filter.
pub struct MoleculeDataset {
    kind: DatasetKind,
    records: Vec<MoleculeRecord>,
    transform: Option<Transform>,
    selector: Option<LabelSelector>,
}

impl fmt::Debug for MoleculeDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MoleculeDataset")
            .field("kind", &self.kind)
            .field("len", &self.records.len())
            .field("has_transform", &self.transform.is_some())
            .field("selector", &self.selector)
            .finish()
    }
}

impl MoleculeDataset {
    /// Open the adapter for `kind` under `root`.
    ///
    /// The property or molecule name is resolved before any file is read,
    /// so a bad `dataset_arg` fails without touching the disk.
    pub fn open(
        kind: DatasetKind,
        root: &Path,
        transform: Option<Transform>,
        dataset_arg: Option<&str>,
    ) -> anyhow::Result<Self> {
        let selector = kind
            .alias_set()
            .map(|aliases| LabelSelector::new(dataset_arg, aliases))
            .transpose()?;

        let path = kind.source_path(root, dataset_arg)?;
        let records = MoleculeReader::read_all(&path)?;
        let dataset = Self::from_records(kind, records, transform, selector)?;

        tracing::info!(
            dataset = %kind,
            label = dataset.label().unwrap_or("-"),
            len = dataset.records.len(),
            path = %path.display(),
            "Opened molecule dataset"
        );
        Ok(dataset)
    }

    /// QM9 with the full alias set.
    pub fn qm9(root: &Path, transform: Option<Transform>, dataset_arg: Option<&str>) -> anyhow::Result<Self> {
        Self::open(DatasetKind::Qm9, root, transform, dataset_arg)
    }

    /// QM9 with spectra and the reduced alias set.
    pub fn qm9_spectra(
        root: &Path,
        transform: Option<Transform>,
        dataset_arg: Option<&str>,
    ) -> anyhow::Result<Self> {
        Self::open(DatasetKind::Qm9sp, root, transform, dataset_arg)
    }

    /// One MD17 molecule; `molecule` is required.
    pub fn md17(root: &Path, transform: Option<Transform>, molecule: Option<&str>) -> anyhow::Result<Self> {
        Self::open(DatasetKind::Md17, root, transform, molecule)
    }

    /// ANI-1 energies.
    pub fn ani1(root: &Path, transform: Option<Transform>) -> anyhow::Result<Self> {
        Self::open(DatasetKind::Ani1, root, transform, None)
    }

    /// Custom energy/force set. `dataset_arg` is ignored.
    pub fn custom(root: &Path, transform: Option<Transform>) -> anyhow::Result<Self> {
        Self::open(DatasetKind::Custom, root, transform, None)
    }

    /// Build a dataset from records already in memory.
    ///
    /// Records are validated up front. Labeled sets check that every record
    /// (after the transform) yields the selected column, so [`Dataset::get`]
    /// only returns `None` past the end. Unlabeled sets must carry width-1
    /// energies when they carry energies at all.
    pub fn from_records(
        kind: DatasetKind,
        records: Vec<MoleculeRecord>,
        transform: Option<Transform>,
        selector: Option<LabelSelector>,
    ) -> Result<Self, DatasetError> {
        for (index, record) in records.iter().enumerate() {
            record
                .validate()
                .map_err(|reason| DatasetError::Malformed { index, reason })?;
            match &selector {
                Some(selector) => {
                    let checked = match &transform {
                        Some(transform) => selector.filter(transform(record.clone())).map(|_| ()),
                        None => record
                            .y
                            .as_deref()
                            .ok_or(DatasetError::MissingTarget)
                            .and_then(|row| selector.select(row))
                            .map(|_| ()),
                    };
                    checked.map_err(|source| DatasetError::Label {
                        index,
                        source: Box::new(source),
                    })?;
                }
                None => {
                    if let Some(y) = &record.y {
                        if y.len() != 1 {
                            return Err(DatasetError::Malformed {
                                index,
                                reason: format!("energy row has {} values, expected 1", y.len()),
                            });
                        }
                    }
                }
            }
        }
        Ok(Self {
            kind,
            records,
            transform,
            selector,
        })
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    /// Canonical name of the selected property, if this set is labeled.
    pub fn label(&self) -> Option<&'static str> {
        self.selector.as_ref().map(|s| s.label())
    }

    pub fn selector(&self) -> Option<&LabelSelector> {
        self.selector.as_ref()
    }

    /// Per-atom reference values for the selected property.
    ///
    /// `None` for unlabeled sets and for properties without references.
    pub fn atomref(&self, max_z: usize) -> Option<Vec<f32>> {
        self.selector.as_ref().and_then(|s| s.atomref(max_z))
    }
}

impl Dataset<MoleculeRecord> for MoleculeDataset {
    fn get(&self, index: usize) -> Option<MoleculeRecord> {
        let record = self.records.get(index)?.clone();
        let record = match &self.transform {
            Some(transform) => transform(record),
            None => record,
        };
        match &self.selector {
            None => Some(record),
            Some(selector) => match selector.filter(record) {
                Ok(record) => Some(record),
                // checked at construction, unless the transform is not deterministic
                Err(e) => {
                    tracing::error!(index, error = %e, "Record lost its label after construction");
                    None
                }
            },
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qm9_record(offset: f32) -> MoleculeRecord {
        MoleculeRecord::new(vec![6, 1], vec![[0.0; 3], [1.09, 0.0, 0.0]])
            .with_y((0..19).map(|i| offset + i as f32).collect())
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("qm9".parse::<DatasetKind>().unwrap(), DatasetKind::Qm9);
        assert_eq!("QM9SP".parse::<DatasetKind>().unwrap(), DatasetKind::Qm9sp);
        assert_eq!("custom".parse::<DatasetKind>().unwrap(), DatasetKind::Custom);
        assert_eq!("MD17".parse::<DatasetKind>().unwrap(), DatasetKind::Md17);
        assert_eq!("ani1".parse::<DatasetKind>().unwrap(), DatasetKind::Ani1);
        for kind in DatasetKind::ALL {
            assert_eq!(kind.to_string().parse::<DatasetKind>().unwrap(), kind);
        }
        let err = "md22".parse::<DatasetKind>().unwrap_err();
        assert!(err.to_string().contains("md22"));
    }

    #[test]
    fn test_get_applies_label_filter() {
        let selector = LabelSelector::new(Some("gap"), AliasSet::Qm9).unwrap();
        let ds = MoleculeDataset::from_records(
            DatasetKind::Qm9,
            vec![qm9_record(0.0), qm9_record(100.0)],
            None,
            Some(selector),
        )
        .unwrap();

        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(0).unwrap().y, Some(vec![4.0]));
        assert_eq!(ds.get(1).unwrap().y, Some(vec![104.0]));
        assert!(ds.get(2).is_none());
    }

    #[test]
    fn test_transform_runs_before_filter() {
        let selector = LabelSelector::new(Some("mu"), AliasSet::Qm9).unwrap();
        // Reverse the row: the filter must see the transformed row.
        let transform: Transform = Box::new(|mut r: MoleculeRecord| {
            if let Some(y) = r.y.as_mut() {
                y.reverse();
            }
            r
        });
        let ds = MoleculeDataset::from_records(
            DatasetKind::Qm9,
            vec![qm9_record(0.0)],
            Some(transform),
            Some(selector),
        )
        .unwrap();
        assert_eq!(ds.get(0).unwrap().y, Some(vec![18.0]));
    }

    #[test]
    fn test_custom_requires_scalar_energy() {
        let ok = MoleculeRecord::new(vec![8], vec![[0.0; 3]]).with_y(vec![-75.0]);
        assert!(MoleculeDataset::from_records(DatasetKind::Custom, vec![ok], None, None).is_ok());

        let wide = MoleculeRecord::new(vec![8], vec![[0.0; 3]]).with_y(vec![1.0, 2.0]);
        let err = MoleculeDataset::from_records(DatasetKind::Custom, vec![wide], None, None).unwrap_err();
        assert!(matches!(err, DatasetError::Malformed { index: 0, .. }));
    }

    #[test]
    fn test_bad_property_fails_before_reading() {
        let missing_root = Path::new("/nonexistent/qm9");
        let err = MoleculeDataset::qm9(missing_root, None, Some("not_a_property")).unwrap_err();
        let err = err.downcast::<DatasetError>().unwrap();
        assert!(matches!(err, DatasetError::UnknownProperty { .. }));

        let err = MoleculeDataset::qm9(missing_root, None, None).unwrap_err();
        assert!(matches!(
            err.downcast::<DatasetError>().unwrap(),
            DatasetError::MissingProperty { .. }
        ));
    }

    #[test]
    fn test_atomref_passthrough() {
        let selector = LabelSelector::new(Some("U0"), AliasSet::Qm9).unwrap();
        let ds = MoleculeDataset::from_records(DatasetKind::Qm9, vec![qm9_record(0.0)], None, Some(selector))
            .unwrap();
        assert_eq!(ds.atomref(100).unwrap().len(), 100);

        let custom = MoleculeDataset::from_records(DatasetKind::Custom, vec![], None, None).unwrap();
        assert!(custom.atomref(100).is_none());
    }

    #[test]
    fn test_narrow_row_fails_at_construction() {
        let selector = LabelSelector::new(Some("cv"), AliasSet::Qm9).unwrap();
        let narrow = MoleculeRecord::new(vec![6], vec![[0.0; 3]]).with_y(vec![0.0; 5]);
        let err = MoleculeDataset::from_records(
            DatasetKind::Qm9,
            vec![qm9_record(0.0), narrow, qm9_record(1.0)],
            None,
            Some(selector),
        )
        .unwrap_err();
        match err {
            DatasetError::Label { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(*source, DatasetError::TargetWidth { width: 5, column: 11 }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unlabeled_record_fails_at_construction() {
        let selector = LabelSelector::new(Some("U0"), AliasSet::Qm9).unwrap();
        let bare = MoleculeRecord::new(vec![1], vec![[0.0; 3]]);
        let err = MoleculeDataset::from_records(DatasetKind::Qm9, vec![bare], None, Some(selector)).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::Label { index: 0, ref source } if matches!(**source, DatasetError::MissingTarget)
        ));
        assert!(err.to_string().starts_with("Record 0:"));
    }

    #[test]
    fn test_transform_output_is_checked_at_construction() {
        let selector = LabelSelector::new(Some("cv"), AliasSet::Qm9).unwrap();
        let truncate: Transform = Box::new(|mut r: MoleculeRecord| {
            if let Some(y) = r.y.as_mut() {
                y.truncate(3);
            }
            r
        });
        let result = MoleculeDataset::from_records(DatasetKind::Qm9, vec![qm9_record(0.0)], Some(truncate), Some(selector));
        assert!(matches!(result, Err(DatasetError::Label { index: 0, .. })));
    }

    #[test]
    fn test_every_counted_record_is_served() {
        let selector = LabelSelector::new(Some("cv"), AliasSet::Qm9).unwrap();
        let ds = MoleculeDataset::from_records(
            DatasetKind::Qm9,
            (0..3).map(|i| qm9_record(i as f32)).collect(),
            None,
            Some(selector),
        )
        .unwrap();
        assert_eq!(ds.iter().count(), ds.len());
    }

    #[test]
    fn test_md17_molecule_resolution() {
        assert_eq!(resolve_md17_molecule(Some("aspirin")).unwrap(), "aspirin");
        assert_eq!(resolve_md17_molecule(Some("revised_ethanol")).unwrap(), "revised_ethanol");

        let err = resolve_md17_molecule(None).unwrap_err();
        assert!(matches!(err, DatasetError::MissingMolecule { .. }));
        assert!(err.to_string().contains("benzene"));

        let err = resolve_md17_molecule(Some("caffeine")).unwrap_err();
        assert!(matches!(err, DatasetError::UnknownMolecule { ref name, .. } if name == "caffeine"));
    }

    #[test]
    fn test_source_paths() {
        let root = Path::new("/data");
        assert_eq!(
            DatasetKind::Md17.source_path(root, Some("toluene")).unwrap(),
            PathBuf::from("/data/processed/md17/toluene.parquet")
        );
        assert_eq!(
            DatasetKind::Ani1.source_path(root, Some("ignored")).unwrap(),
            PathBuf::from("/data/processed/ani1.parquet")
        );
        assert!(DatasetKind::Md17.source_path(root, None).is_err());
    }

    #[test]
    fn test_bad_molecule_fails_before_reading() {
        let err = MoleculeDataset::md17(Path::new("/nonexistent/md17"), None, Some("caffeine")).unwrap_err();
        assert!(matches!(
            err.downcast::<DatasetError>().unwrap(),
            DatasetError::UnknownMolecule { .. }
        ));
    }
}
