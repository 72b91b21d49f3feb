//! Per-stage loss bookkeeping and the epoch metrics built from it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::training::loss::LossKind;

/// Which pass a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Train,
    Val,
    Test,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Train, Stage::Val, Stage::Test];

    pub fn name(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }

    /// Train and val regress with MSE; test reports MAE.
    pub fn loss_kind(self) -> LossKind {
        match self {
            Self::Train | Self::Val => LossKind::Mse,
            Self::Test => LossKind::L1,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One component of the step loss, or the weighted total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossTerm {
    Total,
    Y,
    Dy,
    Pos,
    Contrast,
    Reconstruct,
}

impl LossTerm {
    pub const ALL: [LossTerm; 6] = [
        LossTerm::Total,
        LossTerm::Y,
        LossTerm::Dy,
        LossTerm::Pos,
        LossTerm::Contrast,
        LossTerm::Reconstruct,
    ];

    /// Suffix used in history keys, `None` for the total.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Total => None,
            Self::Y => Some("y"),
            Self::Dy => Some("dy"),
            Self::Pos => Some("pos"),
            Self::Contrast => Some("contrast"),
            Self::Reconstruct => Some("reconstruct"),
        }
    }
}

/// History key: `train`, `val_dy`, `test_contrast`, ...
pub fn history_key(stage: Stage, term: LossTerm) -> String {
    match term.suffix() {
        None => stage.name().to_string(),
        Some(suffix) => format!("{}_{suffix}", stage.name()),
    }
}

/// Detached scalar losses appended per batch, keyed by stage and term.
#[derive(Debug, Clone, Default)]
pub struct LossHistory {
    values: HashMap<(Stage, LossTerm), Vec<f64>>,
}

impl LossHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, stage: Stage, term: LossTerm, value: f64) {
        self.values.entry((stage, term)).or_default().push(value);
    }

    /// Values recorded this epoch; empty when none were.
    pub fn get(&self, stage: Stage, term: LossTerm) -> &[f64] {
        self.values.get(&(stage, term)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last(&self, stage: Stage, term: LossTerm) -> Option<f64> {
        self.get(stage, term).last().copied()
    }

    /// Mean of the recorded values, `None` when the list is empty.
    pub fn mean(&self, stage: Stage, term: LossTerm) -> Option<f64> {
        let values = self.get(stage, term);
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(Vec::is_empty)
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }
}

/// Metrics logged once per epoch, serialized as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochMetrics {
    values: BTreeMap<String, f64>,
}

impl EpochMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn epoch(&self) -> Option<usize> {
        self.get("epoch").map(|e| e as usize)
    }

    pub fn val_loss(&self) -> Option<f64> {
        self.get("val_loss")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for EpochMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.values {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{key}={value:.4e}")?;
        }
        Ok(())
    }
}
