//! Training pipeline: batch collation, losses with smoothing, loss history,
//! learning-rate control, the loss composer, and the AdamW training loop.

pub mod batch;
pub mod composer;
pub mod ema;
pub mod history;
pub mod loss;
pub mod scheduler;
pub mod trainer;
