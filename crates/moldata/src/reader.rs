//! Reads MoleculeRecords from Parquet files.

use crate::types::{MoleculeRecord, MoleculeSummary, SpectrumKind};
use arrow::array::*;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Static methods for reading molecule data from Parquet files.
pub struct MoleculeReader;

impl MoleculeReader {
    /// Read all molecule records from a Parquet file.
    pub fn read_all(path: &Path) -> anyhow::Result<Vec<MoleculeRecord>> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut records = Vec::new();
        for batch_result in reader {
            let batch = batch_result?;
            let mut batch_records = extract_records_from_batch(&batch)?;
            records.append(&mut batch_records);
        }

        tracing::debug!(
            count = records.len(),
            path = %path.display(),
            "Read molecule records"
        );

        Ok(records)
    }

    /// Read molecule records from multiple Parquet files.
    pub fn read_multiple(paths: &[PathBuf]) -> anyhow::Result<Vec<MoleculeRecord>> {
        let mut all_records = Vec::new();
        for path in paths {
            let mut records = Self::read_all(path)?;
            all_records.append(&mut records);
        }
        Ok(all_records)
    }

    /// Compute summary statistics from a molecule Parquet file.
    pub fn read_summary(path: &Path) -> anyhow::Result<MoleculeSummary> {
        let records = Self::read_all(path)?;
        Ok(summarize(&records))
    }
}

/// Summary statistics over in-memory records.
pub fn summarize(records: &[MoleculeRecord]) -> MoleculeSummary {
    let mut summary = MoleculeSummary {
        total_records: records.len(),
        ..Default::default()
    };
    for record in records {
        let n = record.num_atoms();
        summary.total_atoms += n;
        summary.max_atoms = summary.max_atoms.max(n);
        if summary.target_width.is_none() {
            summary.target_width = record.y.as_ref().map(|y| y.len());
        }
        if record.dy.is_some() {
            summary.with_forces += 1;
        }
        if record.pos_target.is_some() {
            summary.with_pos_target += 1;
        }
        for kind in record.spectra.keys() {
            *summary.spectra.entry(*kind).or_default() += 1;
        }
    }
    summary
}

fn list_column<'a>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a ListArray> {
    optional_list_column(batch, name)?
        .ok_or_else(|| anyhow::anyhow!("Column {name} is missing"))
}

/// Look up a list column that older files may not carry.
fn optional_list_column<'a>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<Option<&'a ListArray>> {
    match batch.column_by_name(name) {
        None => Ok(None),
        Some(column) => column
            .as_any()
            .downcast_ref::<ListArray>()
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("Column {name} is not ListArray")),
    }
}

fn floats_at(list: &ListArray, row: usize, name: &str) -> anyhow::Result<Option<Vec<f32>>> {
    if list.is_null(row) {
        return Ok(None);
    }
    let values = list.value(row);
    let floats = values
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow::anyhow!("Column {name} items are not Float32"))?;
    Ok(Some(floats.values().to_vec()))
}

fn unflatten(values: Vec<f32>, name: &str, row: usize) -> anyhow::Result<Vec<[f32; 3]>> {
    if values.len() % 3 != 0 {
        anyhow::bail!(
            "Column {name} row {row} has {} values, not a multiple of 3",
            values.len()
        );
    }
    Ok(values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
}

/// Extract molecule records from a single Arrow RecordBatch.
fn extract_records_from_batch(batch: &RecordBatch) -> anyhow::Result<Vec<MoleculeRecord>> {
    let atomic_numbers = list_column(batch, "atomic_numbers")?;
    let positions = list_column(batch, "positions")?;
    let y = optional_list_column(batch, "y")?;
    let dy = optional_list_column(batch, "dy")?;
    let pos_target = optional_list_column(batch, "pos_target")?;
    let mut spectra = Vec::new();
    for kind in SpectrumKind::ALL {
        if let Some(column) = optional_list_column(batch, kind.name())? {
            spectra.push((kind, column));
        }
    }

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let z_values = atomic_numbers.value(row);
        let z = z_values
            .as_any()
            .downcast_ref::<UInt8Array>()
            .ok_or_else(|| anyhow::anyhow!("Column atomic_numbers items are not UInt8"))?
            .values()
            .to_vec();
        let pos = floats_at(positions, row, "positions")?
            .ok_or_else(|| anyhow::anyhow!("Row {row} has null positions"))?;

        let mut record = MoleculeRecord::new(z, unflatten(pos, "positions", row)?);
        if let Some(column) = y {
            record.y = floats_at(column, row, "y")?;
        }
        if let Some(column) = dy {
            record.dy = floats_at(column, row, "dy")?
                .map(|v| unflatten(v, "dy", row))
                .transpose()?;
        }
        if let Some(column) = pos_target {
            record.pos_target = floats_at(column, row, "pos_target")?
                .map(|v| unflatten(v, "pos_target", row))
                .transpose()?;
        }
        let mut row_spectra = BTreeMap::new();
        for (kind, column) in &spectra {
            if let Some(values) = floats_at(column, row, kind.name())? {
                row_spectra.insert(*kind, values);
            }
        }
        record.spectra = row_spectra;

        records.push(record);
    }

    Ok(records)
}
