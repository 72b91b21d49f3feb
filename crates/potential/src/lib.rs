//! Property training on molecular graphs.
//!
//! Collates molecule records into burn batches, composes the multi-term
//! loss (energy, force, denoising, contrastive, reconstruction), controls
//! the learning rate (warm-up, plateau decay, cosine schedules), and runs
//! the AdamW training loop over any model implementing [`PropertyModel`].

pub mod config;
pub mod model;
pub mod training;

pub use config::{ConfigError, ModuleConfig};
pub use model::atomwise::{AtomwiseModel, AtomwiseModelConfig};
pub use model::{ModelOutput, PropertyModel};
pub use training::batch::{MoleculeBatch, SpectraInput, SPECTRA_TRIPLES};
pub use training::composer::LossComposer;
pub use training::history::{EpochMetrics, LossHistory, LossTerm, Stage};
pub use training::loss::LossKind;
pub use training::scheduler::{LrController, LrPhase, LrSchedule, LrScheduleKind, LrUpdate, PlateauScheduler};
pub use training::trainer::{fit, test_due, EvalPass, FitOutcome, TrainerConfig, TrainingData};
