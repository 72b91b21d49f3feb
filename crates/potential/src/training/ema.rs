//! Exponential smoothing of per-batch losses.
//!
//! Smoothing keeps the autodiff graph of the current batch: the raw loss
//! tensor is scaled by `alpha` and the previous smoothed value enters as a
//! detached constant.

use std::collections::HashMap;

use burn::prelude::*;

use crate::training::history::{LossTerm, Stage};

/// `alpha·raw + (1 − alpha)·previous`, seeding with `raw` when there is no
/// previous value.
pub fn smooth(alpha: f64, raw: f64, previous: Option<f64>) -> f64 {
    match previous {
        Some(prev) => alpha * raw + (1.0 - alpha) * prev,
        None => raw,
    }
}

/// Smoothing state for the train and val stages.
#[derive(Debug, Clone, Default)]
pub struct EmaState {
    values: HashMap<(Stage, LossTerm), f64>,
}

impl EmaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smooth `raw` for `(stage, term)` and remember the result.
    ///
    /// Test losses and `alpha >= 1` pass through untouched and leave no state.
    pub fn apply<B: Backend>(
        &mut self,
        stage: Stage,
        term: LossTerm,
        alpha: f64,
        raw: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        if stage == Stage::Test || alpha >= 1.0 {
            return raw;
        }
        let raw_value: f64 = raw.clone().into_scalar().elem();
        let previous = *self.values.entry((stage, term)).or_insert(raw_value);
        let smoothed = raw * alpha + (1.0 - alpha) * previous;
        let value: f64 = smoothed.clone().into_scalar().elem();
        self.values.insert((stage, term), value);
        smoothed
    }

    pub fn get(&self, stage: Stage, term: LossTerm) -> Option<f64> {
        self.values.get(&(stage, term)).copied()
    }
}
