//! Train/validation/test splits over a dataset.

use burn::data::dataset::Dataset;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;
use crate::types::MoleculeRecord;

/// Size of one split: an absolute count or a fraction of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SplitSize {
    Count(usize),
    Fraction(f64),
}

impl SplitSize {
    fn resolve(self, len: usize) -> Result<usize, DatasetError> {
        match self {
            Self::Count(n) => Ok(n),
            Self::Fraction(f) if (0.0..=1.0).contains(&f) => Ok((len as f64 * f).round() as usize),
            Self::Fraction(f) => Err(DatasetError::InvalidSplit(format!(
                "fraction {f} is outside [0, 1]"
            ))),
        }
    }
}

/// Index lists for the three splits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Splits {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..len` with `seed` and cut it into train/val/test.
///
/// At most one size may be `None`; it takes whatever the other two leave.
/// When all three are given they may sum to less than `len`, and the
/// remaining indices are unused.
pub fn random_split(
    len: usize,
    train: Option<SplitSize>,
    val: Option<SplitSize>,
    test: Option<SplitSize>,
    seed: u64,
) -> Result<Splits, DatasetError> {
    let sizes = [train, val, test];
    let missing = sizes.iter().filter(|s| s.is_none()).count();
    if missing > 1 {
        return Err(DatasetError::InvalidSplit(
            "at most one of train/val/test size may be omitted".to_string(),
        ));
    }

    let mut resolved = [0usize; 3];
    for (slot, size) in resolved.iter_mut().zip(sizes) {
        if let Some(size) = size {
            *slot = size.resolve(len)?;
        }
    }
    let given: usize = resolved.iter().sum();
    if given > len {
        return Err(DatasetError::InvalidSplit(format!(
            "split sizes {resolved:?} exceed dataset length {len}"
        )));
    }
    if let Some(pos) = sizes.iter().position(|s| s.is_none()) {
        resolved[pos] = len - given;
    }

    let mut order: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let [n_train, n_val, n_test] = resolved;
    let splits = Splits {
        train: order[..n_train].to_vec(),
        val: order[n_train..n_train + n_val].to_vec(),
        test: order[n_train + n_val..n_train + n_val + n_test].to_vec(),
    };

    tracing::info!(
        train = splits.train.len(),
        val = splits.val.len(),
        test = splits.test.len(),
        seed,
        "Split dataset"
    );
    Ok(splits)
}

/// A view over selected indices of another dataset.
pub struct Subset<'a> {
    dataset: &'a dyn Dataset<MoleculeRecord>,
    indices: Vec<usize>,
}

impl<'a> Subset<'a> {
    pub fn new(dataset: &'a dyn Dataset<MoleculeRecord>, indices: Vec<usize>) -> Self {
        Self { dataset, indices }
    }
}

impl Dataset<MoleculeRecord> for Subset<'_> {
    fn get(&self, index: usize) -> Option<MoleculeRecord> {
        self.dataset.get(*self.indices.get(index)?)
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}
