//! Molecule datasets for property prediction.
//!
//! Provides the on-disk record type, Parquet reading/writing, property label
//! selection for QM9-style target tables, dataset adapters implementing
//! burn's `Dataset` contract, and deterministic train/val/test splits.

pub mod dataset;
pub mod error;
pub mod label;
pub mod reader;
pub mod splits;
pub mod types;
pub mod writer;

pub use dataset::{md17_path, resolve_md17_molecule, DatasetKind, MoleculeDataset, Transform, MD17_MOLECULES};
pub use error::DatasetError;
pub use label::{AliasSet, LabelSelector, DEFAULT_MAX_Z, QM9_PROPERTIES};
pub use reader::MoleculeReader;
pub use splits::{random_split, SplitSize, Splits, Subset};
pub use types::{MoleculeRecord, MoleculeSummary, SpectrumKind};
pub use writer::MoleculeWriter;
