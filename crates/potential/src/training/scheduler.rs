//! Learning-rate control: warm-up, plateau decay, and the configurable schedules.
//!
//! Two independent mechanisms adjust the learning rate:
//!
//! - [`LrController`] runs before every optimizer step. During warm-up it
//!   sets the rate outright; afterwards, when plateau control is on, it
//!   consumes the latest validation loss and may scale the rate down.
//! - [`LrSchedule`] is the configured schedule. The cosine variants step
//!   after every optimizer step; reduce-on-plateau steps once per epoch on
//!   the validation loss.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ModuleConfig};

/// Relative improvement a metric needs to count as better.
pub const PLATEAU_THRESHOLD: f64 = 1e-4;

/// Floor of the cosine schedules.
pub const COSINE_ETA_MIN: f64 = 1e-7;

/// Smallest learning-rate change reduce-on-plateau will apply.
const PLATEAU_EPS: f64 = 1e-8;

/// Plateau detector on a minimized metric.
///
/// Returns the decay factor once the metric has failed to improve for more
/// than `patience` consecutive updates, and 1.0 otherwise.
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    factor: f64,
    patience: usize,
    threshold: f64,
    best: f64,
    num_bad_epochs: usize,
}

impl PlateauScheduler {
    pub fn new(factor: f64, patience: usize) -> Self {
        Self {
            factor,
            patience,
            threshold: PLATEAU_THRESHOLD,
            best: f64::INFINITY,
            num_bad_epochs: 0,
        }
    }

    /// Relative-threshold comparison in `min` mode.
    pub fn is_better(&self, current: f64) -> bool {
        current < self.best * (1.0 - self.threshold)
    }

    pub fn step(&mut self, metric: f64) -> f64 {
        if self.is_better(metric) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.num_bad_epochs > self.patience {
            self.num_bad_epochs = 0;
            return self.factor;
        }
        1.0
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn num_bad_epochs(&self) -> usize {
        self.num_bad_epochs
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

/// Which regime the controller is in at a given step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrPhase {
    WarmingUp,
    /// Plateau control disabled.
    Normal,
    /// Plateau control enabled and tracking validation loss.
    Watching,
}

/// How the controller changes the learning rate for one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LrUpdate {
    /// Replace the rate.
    Set(f64),
    /// Multiply the rate.
    Scale(f64),
}

impl LrUpdate {
    pub fn apply(self, current_lr: f64) -> f64 {
        match self {
            Self::Set(lr) => lr,
            Self::Scale(scale) => current_lr * scale,
        }
    }
}

/// Per-step warm-up and plateau control.
#[derive(Debug, Clone)]
pub struct LrController {
    base_lr: f64,
    warmup_steps: usize,
    reduce_lr_when_bad: bool,
    plateau: PlateauScheduler,
    pending_val_loss: Option<f64>,
}

impl LrController {
    pub fn new(config: &ModuleConfig) -> Self {
        Self {
            base_lr: config.lr,
            warmup_steps: config.lr_warmup_steps,
            reduce_lr_when_bad: config.reduce_lr_when_bad,
            plateau: PlateauScheduler::new(config.lr_factor, config.lr_patience),
            pending_val_loss: None,
        }
    }

    pub fn phase(&self, global_step: usize) -> LrPhase {
        if global_step < self.warmup_steps {
            LrPhase::WarmingUp
        } else if self.reduce_lr_when_bad {
            LrPhase::Watching
        } else {
            LrPhase::Normal
        }
    }

    /// Store the validation loss for the next optimizer step to consume.
    pub fn record_val_loss(&mut self, val_loss: f64) {
        self.pending_val_loss = Some(val_loss);
    }

    pub fn pending_val_loss(&self) -> Option<f64> {
        self.pending_val_loss
    }

    pub fn plateau(&self) -> &PlateauScheduler {
        &self.plateau
    }

    /// Learning-rate change to apply before optimizer step `global_step`.
    ///
    /// Warm-up preempts plateau control. Plateau control only consumes a
    /// pending validation loss while `current_lr` is above 10% of the base
    /// rate.
    pub fn optimizer_step(&mut self, global_step: usize, current_lr: f64) -> LrUpdate {
        match self.phase(global_step) {
            LrPhase::WarmingUp => {
                let scale = ((global_step + 1) as f64 / self.warmup_steps as f64).min(1.0);
                LrUpdate::Set(self.base_lr * scale)
            }
            LrPhase::Watching => match self.pending_val_loss {
                Some(val_loss) if current_lr > self.base_lr * 0.1 => {
                    self.pending_val_loss = None;
                    let scale = self.plateau.step(val_loss);
                    if scale != 1.0 {
                        tracing::info!(
                            global_step,
                            val_loss,
                            scale,
                            lr = current_lr * scale,
                            "Validation loss plateaued, decaying learning rate"
                        );
                    }
                    LrUpdate::Scale(scale)
                }
                _ => LrUpdate::Scale(1.0),
            },
            LrPhase::Normal => LrUpdate::Scale(1.0),
        }
    }
}

/// Configurable schedule name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LrScheduleKind {
    Cosine,
    CosineWarmup,
    ReduceOnPlateau,
}

impl fmt::Display for LrScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::CosineWarmup => write!(f, "cosine_warmup"),
            Self::ReduceOnPlateau => write!(f, "reduce_on_plateau"),
        }
    }
}

impl FromStr for LrScheduleKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Self::Cosine),
            "cosine_warmup" => Ok(Self::CosineWarmup),
            "reduce_on_plateau" => Ok(Self::ReduceOnPlateau),
            _ => Err(ConfigError::UnknownSchedule(s.to_string())),
        }
    }
}

/// Stateful schedule built from a [`ModuleConfig`].
#[derive(Debug, Clone)]
pub enum LrSchedule {
    /// Cosine annealing from the base rate to `eta_min` over `t_max` steps,
    /// computed recursively from the current rate.
    Cosine {
        base_lr: f64,
        t_max: usize,
        eta_min: f64,
        last_step: usize,
    },
    /// Cosine annealing with warm restarts; each period is `t_mult` times
    /// longer than the last.
    CosineWarmRestarts {
        base_lr: f64,
        t_i: usize,
        t_mult: usize,
        t_cur: usize,
        eta_min: f64,
    },
    /// Decay by `factor` when validation loss plateaus, never below `min_lr`.
    ReduceOnPlateau { plateau: PlateauScheduler, min_lr: f64 },
}

impl LrSchedule {
    pub fn new(config: &ModuleConfig) -> Self {
        match config.lr_schedule {
            LrScheduleKind::Cosine => Self::Cosine {
                base_lr: config.lr,
                t_max: config.lr_cosine_length,
                eta_min: COSINE_ETA_MIN,
                last_step: 0,
            },
            LrScheduleKind::CosineWarmup => Self::CosineWarmRestarts {
                base_lr: config.lr,
                t_i: config.lr_cosine_length,
                t_mult: 2,
                t_cur: 0,
                eta_min: COSINE_ETA_MIN,
            },
            LrScheduleKind::ReduceOnPlateau => Self::ReduceOnPlateau {
                plateau: PlateauScheduler::new(config.lr_factor, config.lr_patience),
                min_lr: config.lr_min,
            },
        }
    }

    pub fn kind(&self) -> LrScheduleKind {
        match self {
            Self::Cosine { .. } => LrScheduleKind::Cosine,
            Self::CosineWarmRestarts { .. } => LrScheduleKind::CosineWarmup,
            Self::ReduceOnPlateau { .. } => LrScheduleKind::ReduceOnPlateau,
        }
    }

    /// Advance after an optimizer step. Returns the rate for the next step.
    pub fn step_batch(&mut self, current_lr: f64) -> f64 {
        match self {
            Self::Cosine {
                base_lr,
                t_max,
                eta_min,
                last_step,
            } => {
                *last_step += 1;
                let t = *t_max as f64;
                let step = *last_step as i64;
                if (step - 1 - *t_max as i64).rem_euclid(2 * *t_max as i64) == 0 {
                    current_lr + (*base_lr - *eta_min) * (1.0 - (PI / t).cos()) / 2.0
                } else {
                    let num = 1.0 + (PI * step as f64 / t).cos();
                    let den = 1.0 + (PI * (step - 1) as f64 / t).cos();
                    num / den * (current_lr - *eta_min) + *eta_min
                }
            }
            Self::CosineWarmRestarts {
                base_lr,
                t_i,
                t_mult,
                t_cur,
                eta_min,
            } => {
                *t_cur += 1;
                if *t_cur >= *t_i {
                    *t_cur -= *t_i;
                    *t_i *= *t_mult;
                }
                *eta_min + (*base_lr - *eta_min) * (1.0 + (PI * *t_cur as f64 / *t_i as f64).cos()) / 2.0
            }
            Self::ReduceOnPlateau { .. } => current_lr,
        }
    }

    /// Advance at an epoch boundary. Returns the rate for the next epoch.
    ///
    /// Only reduce-on-plateau reacts, and only when a validation loss exists.
    pub fn step_epoch(&mut self, val_loss: Option<f64>, current_lr: f64) -> f64 {
        let (Self::ReduceOnPlateau { plateau, min_lr }, Some(val_loss)) = (self, val_loss) else {
            return current_lr;
        };
        let factor = plateau.step(val_loss);
        if factor == 1.0 {
            return current_lr;
        }
        let new_lr = (current_lr * factor).max(*min_lr);
        if current_lr - new_lr > PLATEAU_EPS {
            tracing::info!(from = current_lr, to = new_lr, "Reducing learning rate on plateau");
            new_lr
        } else {
            current_lr
        }
    }
}
