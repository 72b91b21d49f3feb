//! Result types for training runs and per-epoch metric logs.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use potential::EpochMetrics;
use serde::{Deserialize, Serialize};

/// Summary of a finished training run, written next to the weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// ISO 8601-ish UTC timestamp (seconds since the epoch) of when the run ended.
    pub timestamp: String,
    /// Dataset adapter name.
    pub dataset: String,
    /// Canonical property name, if the dataset is labeled.
    pub label: Option<String>,
    /// Molecules per split.
    pub train_size: usize,
    pub val_size: usize,
    pub test_size: usize,
    /// Completed epochs.
    pub epochs: usize,
    /// Optimizer steps taken.
    pub global_steps: usize,
    /// Lowest validation loss seen.
    pub best_val_loss: Option<f64>,
    /// Validation loss of the last epoch.
    pub final_val_loss: Option<f64>,
    /// Test loss of the last epoch that ran a test pass.
    #[serde(default)]
    pub final_test_loss: Option<f64>,
    /// Learning rate at the end of training.
    pub final_lr: f64,
    /// Whether early stopping ended the run.
    pub stopped_early: bool,
    /// Path of the exported model weights.
    pub model_path: String,
    /// Wall-clock training time in seconds.
    pub elapsed_secs: f64,
}

impl RunSummary {
    /// Write the summary as pretty JSON.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
        Ok(())
    }

    /// Load a summary written by [`RunSummary::save`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Append-only JSONL log with one [`EpochMetrics`] object per line.
pub struct MetricsLog {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl MetricsLog {
    /// Create (truncating) the log at `path`.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {e}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    /// Append one epoch and flush, so a killed run keeps what it logged.
    pub fn append(&mut self, metrics: &EpochMetrics) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, metrics)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.lines += 1;
        Ok(())
    }

    /// Number of epochs written.
    pub fn len(&self) -> usize {
        self.lines
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every epoch back from a JSONL log.
    pub fn read_all(path: &Path) -> anyhow::Result<Vec<EpochMetrics>> {
        let file = File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;
        let mut epochs = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let metrics: EpochMetrics = serde_json::from_str(&line)
                .map_err(|e| anyhow::anyhow!("{}:{}: {e}", path.display(), i + 1))?;
            epochs.push(metrics);
        }
        Ok(epochs)
    }
}

/// Seconds since the Unix epoch, formatted for [`RunSummary::timestamp`].
pub fn unix_timestamp() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{secs}")
}
