//! Writes MoleculeRecords to Parquet files using Arrow.

use crate::types::{MoleculeRecord, SpectrumKind};
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::path::PathBuf;
use std::sync::Arc;

fn list_of(item: DataType) -> DataType {
    DataType::List(Arc::new(Field::new("item", item, true)))
}

/// Arrow schema for molecule Parquet files.
///
/// Per-atom 3-vectors (`positions`, `dy`, `pos_target`) are stored flattened,
/// three floats per atom. Spectra get one nullable column per kind.
pub fn molecule_schema() -> Schema {
    let mut fields = vec![
        Field::new("atomic_numbers", list_of(DataType::UInt8), false),
        Field::new("positions", list_of(DataType::Float32), false),
        Field::new("y", list_of(DataType::Float32), true),
        Field::new("dy", list_of(DataType::Float32), true),
        Field::new("pos_target", list_of(DataType::Float32), true),
    ];
    for kind in SpectrumKind::ALL {
        fields.push(Field::new(kind.name(), list_of(DataType::Float32), true));
    }
    Schema::new(fields)
}

/// Buffers molecule records and writes them to a Parquet file.
pub struct MoleculeWriter {
    records: Vec<MoleculeRecord>,
    output_path: PathBuf,
}

impl MoleculeWriter {
    /// Create a new writer that will write to the given path.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            records: Vec::new(),
            output_path,
        }
    }

    /// Buffer a single record.
    pub fn record(&mut self, record: MoleculeRecord) {
        self.records.push(record);
    }

    /// Buffer multiple records.
    pub fn record_all(&mut self, records: Vec<MoleculeRecord>) {
        self.records.extend(records);
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write all buffered records to the Parquet file and return the output path.
    ///
    /// Parent directories are created as needed.
    pub fn finish(self) -> anyhow::Result<PathBuf> {
        for (index, record) in self.records.iter().enumerate() {
            record
                .validate()
                .map_err(|reason| anyhow::anyhow!("Refusing to write record {index}: {reason}"))?;
        }

        let schema = Arc::new(molecule_schema());
        let batch = if self.records.is_empty() {
            RecordBatch::new_empty(schema.clone())
        } else {
            build_record_batch(&self.records, schema.clone())?
        };

        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(&self.output_path)?;
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;

        tracing::info!(
            records = self.records.len(),
            path = %self.output_path.display(),
            "Wrote molecule Parquet file"
        );

        Ok(self.output_path)
    }
}

fn flatten(rows: &[[f32; 3]]) -> Vec<f32> {
    rows.iter().flat_map(|row| row.iter().copied()).collect()
}

fn append_floats(builder: &mut ListBuilder<Float32Builder>, values: Option<&[f32]>) {
    match values {
        Some(values) => {
            builder.values().append_slice(values);
            builder.append(true);
        }
        None => builder.append_null(),
    }
}

/// Build an Arrow RecordBatch from molecule records.
fn build_record_batch(records: &[MoleculeRecord], schema: Arc<Schema>) -> anyhow::Result<RecordBatch> {
    let mut atomic_numbers = ListBuilder::new(UInt8Builder::new());
    let mut positions = ListBuilder::new(Float32Builder::new());
    let mut y = ListBuilder::new(Float32Builder::new());
    let mut dy = ListBuilder::new(Float32Builder::new());
    let mut pos_target = ListBuilder::new(Float32Builder::new());
    let mut spectra: Vec<ListBuilder<Float32Builder>> = SpectrumKind::ALL
        .iter()
        .map(|_| ListBuilder::new(Float32Builder::new()))
        .collect();

    for record in records {
        atomic_numbers.values().append_slice(&record.atomic_numbers);
        atomic_numbers.append(true);

        append_floats(&mut positions, Some(flatten(&record.positions).as_slice()));
        append_floats(&mut y, record.y.as_deref());
        append_floats(&mut dy, record.dy.as_deref().map(flatten).as_deref());
        append_floats(&mut pos_target, record.pos_target.as_deref().map(flatten).as_deref());

        for (builder, kind) in spectra.iter_mut().zip(SpectrumKind::ALL) {
            append_floats(builder, record.spectra.get(&kind).map(|v| v.as_slice()));
        }
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(atomic_numbers.finish()),
        Arc::new(positions.finish()),
        Arc::new(y.finish()),
        Arc::new(dy.finish()),
        Arc::new(pos_target.finish()),
    ];
    for mut builder in spectra {
        columns.push(Arc::new(builder.finish()));
    }

    Ok(RecordBatch::try_new(schema, columns)?)
}
