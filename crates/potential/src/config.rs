//! Training-module hyperparameters loaded from TOML.

use serde::{Deserialize, Serialize};

use crate::training::scheduler::LrScheduleKind;

/// Errors raised while validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown lr_schedule: {0} (expected cosine, cosine_warmup or reduce_on_plateau)")]
    UnknownSchedule(String),

    #[error("{name} must be in [0, 1], got {value}")]
    AlphaOutOfRange { name: &'static str, value: f64 },

    #[error("{name} must be non-negative, got {value}")]
    Negative { name: &'static str, value: f64 },

    #[error("{name} must be positive")]
    NotPositive { name: &'static str },
}

/// Loss weights, smoothing and learning-rate control for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Base learning rate for AdamW.
    #[serde(default = "default_lr")]
    pub lr: f64,

    /// Decay factor for plateau control and the reduce-on-plateau schedule.
    #[serde(default = "default_lr_factor")]
    pub lr_factor: f64,

    /// Bad epochs tolerated before decaying.
    #[serde(default = "default_lr_patience")]
    pub lr_patience: usize,

    /// Optimizer steps of linear warm-up. Zero disables warm-up.
    #[serde(default)]
    pub lr_warmup_steps: usize,

    #[serde(default = "default_lr_schedule")]
    pub lr_schedule: LrScheduleKind,

    /// Period of the cosine schedules, in optimizer steps.
    #[serde(default = "default_lr_cosine_length")]
    pub lr_cosine_length: usize,

    /// Floor for the reduce-on-plateau schedule.
    #[serde(default = "default_lr_min")]
    pub lr_min: f64,

    #[serde(default)]
    pub weight_decay: f64,

    /// Train on the derivative (force) output as well as the prediction.
    #[serde(default)]
    pub derivative: bool,

    #[serde(default = "default_weight")]
    pub energy_weight: f64,

    #[serde(default = "default_weight")]
    pub force_weight: f64,

    #[serde(default)]
    pub denoising_weight: f64,

    #[serde(default)]
    pub contrastive_weight: f64,

    #[serde(default)]
    pub reconstruct_weight: f64,

    /// Smoothing weight of the energy loss. 1.0 disables smoothing.
    #[serde(default = "default_alpha")]
    pub ema_alpha_y: f64,

    /// Smoothing weight of the force loss. 1.0 disables smoothing.
    #[serde(default = "default_alpha")]
    pub ema_alpha_dy: f64,

    /// Decay the learning rate when validation loss stops improving.
    #[serde(default)]
    pub reduce_lr_when_bad: bool,

    /// Run the test split every this many epochs. Zero disables it.
    #[serde(default = "default_test_interval")]
    pub test_interval: usize,

    /// Add zero-weighted sums of unused model outputs to the step loss.
    #[serde(default)]
    pub keep_unused_outputs: bool,
}

fn default_lr() -> f64 {
    1e-4
}
fn default_lr_factor() -> f64 {
    0.8
}
fn default_lr_patience() -> usize {
    10
}
fn default_lr_schedule() -> LrScheduleKind {
    LrScheduleKind::ReduceOnPlateau
}
fn default_lr_cosine_length() -> usize {
    400_000
}
fn default_lr_min() -> f64 {
    1e-6
}
fn default_weight() -> f64 {
    1.0
}
fn default_alpha() -> f64 {
    1.0
}
fn default_test_interval() -> usize {
    10
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            lr: default_lr(),
            lr_factor: default_lr_factor(),
            lr_patience: default_lr_patience(),
            lr_warmup_steps: 0,
            lr_schedule: default_lr_schedule(),
            lr_cosine_length: default_lr_cosine_length(),
            lr_min: default_lr_min(),
            weight_decay: 0.0,
            derivative: false,
            energy_weight: default_weight(),
            force_weight: default_weight(),
            denoising_weight: 0.0,
            contrastive_weight: 0.0,
            reconstruct_weight: 0.0,
            ema_alpha_y: default_alpha(),
            ema_alpha_dy: default_alpha(),
            reduce_lr_when_bad: false,
            test_interval: default_test_interval(),
            keep_unused_outputs: false,
        }
    }
}

impl ModuleConfig {
    /// Reject values that would make training meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lr <= 0.0 {
            return Err(ConfigError::NotPositive { name: "lr" });
        }
        if self.lr_cosine_length == 0 {
            return Err(ConfigError::NotPositive { name: "lr_cosine_length" });
        }
        for (name, value) in [("ema_alpha_y", self.ema_alpha_y), ("ema_alpha_dy", self.ema_alpha_dy)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::AlphaOutOfRange { name, value });
            }
        }
        for (name, value) in [
            ("energy_weight", self.energy_weight),
            ("force_weight", self.force_weight),
            ("denoising_weight", self.denoising_weight),
            ("contrastive_weight", self.contrastive_weight),
            ("reconstruct_weight", self.reconstruct_weight),
            ("weight_decay", self.weight_decay),
            ("lr_min", self.lr_min),
        ] {
            if value < 0.0 {
                return Err(ConfigError::Negative { name, value });
            }
        }
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            tracing::warn!(
                lr_factor = self.lr_factor,
                "lr_factor outside (0, 1); plateau decay will not shrink the learning rate"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cfg = ModuleConfig::default();
        assert!((cfg.lr - 1e-4).abs() < 1e-12);
        assert_eq!(cfg.lr_schedule, LrScheduleKind::ReduceOnPlateau);
        assert_eq!(cfg.lr_warmup_steps, 0);
        assert_eq!(cfg.test_interval, 10);
        assert!(!cfg.derivative);
        assert!(!cfg.keep_unused_outputs);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: ModuleConfig = toml::from_str(
            r#"
lr = 5e-4
lr_schedule = "cosine_warmup"
derivative = true
force_weight = 0.5
ema_alpha_dy = 0.1
"#,
        )
        .unwrap();
        assert!((cfg.lr - 5e-4).abs() < 1e-12);
        assert_eq!(cfg.lr_schedule, LrScheduleKind::CosineWarmup);
        assert!(cfg.derivative);
        assert!((cfg.force_weight - 0.5).abs() < 1e-12);
        assert!((cfg.energy_weight - 1.0).abs() < 1e-12);
        assert_eq!(cfg.lr_patience, 10);
    }

    #[test]
    fn test_unknown_schedule_rejected_at_parse() {
        let err = toml::from_str::<ModuleConfig>(r#"lr_schedule = "linear""#).unwrap_err();
        assert!(err.to_string().contains("linear"), "unexpected error: {err}");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = ModuleConfig {
            ema_alpha_y: 1.5,
            ..ModuleConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::AlphaOutOfRange { name: "ema_alpha_y", .. })));

        let cfg = ModuleConfig {
            force_weight: -1.0,
            ..ModuleConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Negative { name: "force_weight", .. })));

        let cfg = ModuleConfig {
            lr: 0.0,
            ..ModuleConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::NotPositive { name: "lr" })));
    }
}
