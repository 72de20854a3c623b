//! Learning-rate schedules.
//!
//! At train time the framework evaluates the schedule itself from the
//! dictionary produced by [`LrSchedule::to_framework_value`]. The evaluator
//! here gives the same numbers for previews, progress lines, and backends
//! that have no scheduler of their own.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::f64::consts::PI;

/// Epoch boundaries of the step schedule.
pub const STEP_DECAY_EPOCHS: [u64; 3] = [30, 60, 80];
/// Multipliers applied once each boundary in [`STEP_DECAY_EPOCHS`] is passed.
pub const STEP_DECAY_SCALES: [f64; 3] = [0.1, 0.01, 0.001];
/// Floor of the classification polynomial schedule.
pub const POLYNOMIAL_END_LR: f64 = 1e-5;

pub const BERT_DECAY_BATCHES: u64 = 100_000;
pub const BERT_WARMUP_BATCHES: u64 = 1000;

/// Decay strategy selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LrDecayKind {
    Cosine,
    /// Piecewise scaling at fixed epochs.
    Step,
    Polynomial,
    Exponential,
    #[value(name = "none")]
    #[serde(rename = "none")]
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WarmupConf {
    Linear { warmup_batches: u64, start_multiplier: f64 },
}

impl WarmupConf {
    #[must_use]
    pub fn warmup_batches(&self) -> u64 {
        match self {
            Self::Linear { warmup_batches, .. } => *warmup_batches,
        }
    }

    fn multiplier(&self, step: u64) -> f64 {
        match self {
            Self::Linear { warmup_batches, start_multiplier } => {
                let progress = step as f64 / *warmup_batches as f64;
                start_multiplier + (1.0 - start_multiplier) * progress
            }
        }
    }

    #[must_use]
    pub fn to_framework_value(&self) -> Value {
        match self {
            Self::Linear { warmup_batches, start_multiplier } => json!({
                "linear_conf": {
                    "warmup_batches": warmup_batches,
                    "start_multiplier": start_multiplier,
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearningRateDecay {
    Cosine { decay_batches: u64, alpha: f64 },
    Polynomial { decay_batches: u64, end_learning_rate: f64, power: f64, cycle: bool },
    Exponential { decay_batches: u64, decay_rate: f64, staircase: bool },
    PiecewiseScaling { boundaries: Vec<u64>, scales: Vec<f64> },
}

impl LearningRateDecay {
    /// Learning rate `t` batches after warmup ended.
    fn decayed(&self, base_lr: f64, t: u64) -> f64 {
        match self {
            Self::Cosine { decay_batches, alpha } => {
                if *decay_batches == 0 {
                    return base_lr * alpha;
                }
                let t = t.min(*decay_batches) as f64;
                let cosine = 0.5 * (1.0 + (PI * t / *decay_batches as f64).cos());
                base_lr * ((1.0 - alpha) * cosine + alpha)
            }
            Self::Polynomial { decay_batches, end_learning_rate, power, cycle } => {
                if *decay_batches == 0 {
                    return *end_learning_rate;
                }
                let (t, horizon) = if *cycle {
                    let cycles = t.div_ceil(*decay_batches).max(1);
                    (t, decay_batches * cycles)
                } else {
                    (t.min(*decay_batches), *decay_batches)
                };
                let remaining = 1.0 - t as f64 / horizon as f64;
                (base_lr - end_learning_rate) * remaining.powf(*power) + end_learning_rate
            }
            Self::Exponential { decay_batches, decay_rate, staircase } => {
                if *decay_batches == 0 {
                    return base_lr;
                }
                let mut exponent = t as f64 / *decay_batches as f64;
                if *staircase {
                    exponent = exponent.floor();
                }
                base_lr * decay_rate.powf(exponent)
            }
            Self::PiecewiseScaling { boundaries, scales } => {
                let passed = boundaries.iter().filter(|b| t >= **b).count();
                match passed.checked_sub(1).and_then(|i| scales.get(i)) {
                    Some(scale) => base_lr * scale,
                    None => base_lr,
                }
            }
        }
    }

    fn validate(&self) -> TrainingResult<()> {
        match self {
            Self::Cosine { alpha, .. } => require_unit("cosine alpha", *alpha),
            Self::Polynomial { end_learning_rate, power, .. } => {
                require_non_negative("end_learning_rate", *end_learning_rate)?;
                require_non_negative("polynomial power", *power)
            }
            Self::Exponential { decay_rate, .. } => {
                if !decay_rate.is_finite() || *decay_rate <= 0.0 {
                    return Err(TrainingError::invalid("lr_decay_rate must be > 0"));
                }
                Ok(())
            }
            Self::PiecewiseScaling { boundaries, scales } => {
                if boundaries.len() != scales.len() {
                    return Err(TrainingError::invalid(format!(
                        "piecewise schedule has {} boundaries but {} scales",
                        boundaries.len(),
                        scales.len()
                    )));
                }
                if boundaries.windows(2).any(|w| w[0] > w[1]) {
                    return Err(TrainingError::invalid("piecewise boundaries must be ascending"));
                }
                scales.iter().try_for_each(|s| require_non_negative("piecewise scale", *s))
            }
        }
    }

    #[must_use]
    pub fn to_framework_value(&self) -> Value {
        match self {
            Self::Cosine { decay_batches, alpha } => json!({
                "cosine_conf": { "decay_batches": decay_batches, "alpha": alpha }
            }),
            Self::Polynomial { decay_batches, end_learning_rate, power, cycle } => json!({
                "polynomial_conf": {
                    "decay_batches": decay_batches,
                    "end_learning_rate": end_learning_rate,
                    "power": power,
                    "cycle": cycle,
                }
            }),
            Self::Exponential { decay_batches, decay_rate, staircase } => json!({
                "exponential_conf": {
                    "decay_batches": decay_batches,
                    "decay_rate": decay_rate,
                    "staircase": staircase,
                }
            }),
            Self::PiecewiseScaling { boundaries, scales } => json!({
                "piecewise_scaling_conf": { "boundaries": boundaries, "scales": scales }
            }),
        }
    }
}

/// Batch counts derived from the dataset size and epoch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub batches_per_epoch: u64,
    pub warmup_batches: u64,
    pub num_train_batches: u64,
    pub decay_batches: u64,
    pub exponential_decay_batches: u64,
}

impl BatchPlan {
    pub fn new(
        num_examples: u64,
        train_batch_size: u64,
        num_epochs: u64,
        warmup_epochs: u64,
        lr_decay_epochs: u64,
    ) -> TrainingResult<Self> {
        if train_batch_size == 0 {
            return Err(TrainingError::invalid("train batch size must be >= 1"));
        }
        let batches_per_epoch = num_examples.div_ceil(train_batch_size);
        let warmup_batches = batches_per_epoch * warmup_epochs;
        let num_train_batches = batches_per_epoch * num_epochs;
        let decay_batches = num_train_batches.checked_sub(warmup_batches).ok_or_else(|| {
            TrainingError::invalid(format!(
                "warmup_epochs ({warmup_epochs}) exceeds num_epochs ({num_epochs})"
            ))
        })?;
        Ok(Self {
            batches_per_epoch,
            warmup_batches,
            num_train_batches,
            decay_batches,
            exponential_decay_batches: batches_per_epoch * lr_decay_epochs,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrSchedule {
    pub base_lr: f64,
    pub decay: Option<LearningRateDecay>,
    pub warmup: Option<WarmupConf>,
}

impl LrSchedule {
    #[must_use]
    pub fn constant(base_lr: f64) -> Self {
        Self { base_lr, decay: None, warmup: None }
    }

    /// Schedule used by the classification launcher.
    #[must_use]
    pub fn build(kind: LrDecayKind, base_lr: f64, plan: &BatchPlan, lr_decay_rate: f64) -> Self {
        let decay = match kind {
            LrDecayKind::Cosine => {
                Some(LearningRateDecay::Cosine { decay_batches: plan.decay_batches, alpha: 0.0 })
            }
            LrDecayKind::Step => Some(LearningRateDecay::PiecewiseScaling {
                boundaries: STEP_DECAY_EPOCHS.iter().map(|e| e * plan.batches_per_epoch).collect(),
                scales: STEP_DECAY_SCALES.to_vec(),
            }),
            LrDecayKind::Polynomial => Some(LearningRateDecay::Polynomial {
                decay_batches: plan.decay_batches,
                end_learning_rate: POLYNOMIAL_END_LR,
                power: 1.0,
                cycle: false,
            }),
            LrDecayKind::Exponential => Some(LearningRateDecay::Exponential {
                decay_batches: plan.exponential_decay_batches,
                decay_rate: lr_decay_rate,
                staircase: false,
            }),
            LrDecayKind::Constant => None,
        };
        let warmup = (plan.warmup_batches > 0).then_some(WarmupConf::Linear {
            warmup_batches: plan.warmup_batches,
            start_multiplier: 0.0,
        });
        Self { base_lr, decay, warmup }
    }

    /// Polynomial decay to zero with a linear warmup, as used for BERT.
    #[must_use]
    pub fn bert_default(base_lr: f64) -> Self {
        Self {
            base_lr,
            decay: Some(LearningRateDecay::Polynomial {
                decay_batches: BERT_DECAY_BATCHES,
                end_learning_rate: 0.0,
                power: 1.0,
                cycle: false,
            }),
            warmup: Some(WarmupConf::Linear {
                warmup_batches: BERT_WARMUP_BATCHES,
                start_multiplier: 0.0,
            }),
        }
    }

    #[must_use]
    pub fn warmup_batches(&self) -> u64 {
        self.warmup.as_ref().map_or(0, WarmupConf::warmup_batches)
    }

    /// Learning rate used for the update at `step` (0-based).
    #[must_use]
    pub fn learning_rate(&self, step: u64) -> f64 {
        if let Some(warmup) = &self.warmup {
            if step < warmup.warmup_batches() {
                return self.base_lr * warmup.multiplier(step);
            }
        }
        let t = step - self.warmup_batches();
        self.decay.as_ref().map_or(self.base_lr, |decay| decay.decayed(self.base_lr, t))
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if !self.base_lr.is_finite() || self.base_lr <= 0.0 {
            return Err(TrainingError::invalid("learning_rate must be > 0"));
        }
        if let Some(WarmupConf::Linear { start_multiplier, .. }) = &self.warmup {
            require_unit("warmup start_multiplier", *start_multiplier)?;
        }
        if let Some(decay) = &self.decay {
            decay.validate()?;
        }
        Ok(())
    }

    /// Nested dictionary in the shape the framework's model-update conf expects.
    #[must_use]
    pub fn to_framework_value(&self) -> Value {
        let mut conf = serde_json::Map::new();
        if let Some(decay) = &self.decay {
            conf.insert("learning_rate_decay".to_string(), decay.to_framework_value());
        }
        if let Some(warmup) = &self.warmup {
            conf.insert("warmup_conf".to_string(), warmup.to_framework_value());
        }
        Value::Object(conf)
    }
}

fn require_non_negative(name: &str, value: f64) -> TrainingResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TrainingError::invalid(format!("{name} must be a finite value >= 0")))
    }
}

fn require_unit(name: &str, value: f64) -> TrainingResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TrainingError::invalid(format!("{name} must be within [0, 1]")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn imagenet_plan() -> BatchPlan {
        // 1000 examples at batch 100 -> 10 batches per epoch.
        BatchPlan::new(1000, 100, 10, 2, 2).unwrap()
    }

    #[test]
    fn test_batch_plan_rounds_epoch_up() {
        let plan = BatchPlan::new(1_281_167, 256, 90, 5, 2).unwrap();
        assert_eq!(plan.batches_per_epoch, 5005);
        assert_eq!(plan.warmup_batches, 5005 * 5);
        assert_eq!(plan.num_train_batches, 5005 * 90);
        assert_eq!(plan.decay_batches, 5005 * 85);
        assert_eq!(plan.exponential_decay_batches, 5005 * 2);
    }

    #[test]
    fn test_batch_plan_rejects_warmup_longer_than_training() {
        assert!(BatchPlan::new(1000, 100, 2, 3, 1).is_err());
        assert!(BatchPlan::new(1000, 0, 2, 1, 1).is_err());
    }

    #[test]
    fn test_linear_warmup_from_zero() {
        let s = LrSchedule::build(LrDecayKind::Cosine, 0.1, &imagenet_plan(), 0.94);
        assert!(close(s.learning_rate(0), 0.0));
        assert!(close(s.learning_rate(10), 0.05));
        // Warmup ends at batch 20 where cosine decay starts at full rate.
        assert!(close(s.learning_rate(20), 0.1));
    }

    #[test]
    fn test_cosine_reaches_zero_and_stays() {
        let s = LrSchedule::build(LrDecayKind::Cosine, 0.1, &imagenet_plan(), 0.94);
        // decay_batches = 80, halfway at t = 40.
        assert!(close(s.learning_rate(60), 0.05));
        assert!(close(s.learning_rate(100), 0.0));
        assert!(close(s.learning_rate(500), 0.0));
    }

    #[test]
    fn test_step_schedule_boundaries_are_epochs() {
        let plan = BatchPlan::new(1000, 100, 90, 0, 1).unwrap();
        let s = LrSchedule::build(LrDecayKind::Step, 1.0, &plan, 0.94);
        assert!(s.warmup.is_none());
        assert!(close(s.learning_rate(299), 1.0));
        assert!(close(s.learning_rate(300), 0.1));
        assert!(close(s.learning_rate(600), 0.01));
        assert!(close(s.learning_rate(799), 0.01));
        assert!(close(s.learning_rate(800), 0.001));
    }

    #[test]
    fn test_polynomial_ends_at_floor() {
        let s = LrSchedule::build(LrDecayKind::Polynomial, 0.1, &imagenet_plan(), 0.94);
        assert!(close(s.learning_rate(20 + 40), (0.1 - POLYNOMIAL_END_LR) * 0.5 + POLYNOMIAL_END_LR));
        assert!(close(s.learning_rate(20 + 80), POLYNOMIAL_END_LR));
        assert!(close(s.learning_rate(10_000), POLYNOMIAL_END_LR));
    }

    #[test]
    fn test_polynomial_cycle_restarts_horizon() {
        let decay = LearningRateDecay::Polynomial {
            decay_batches: 10,
            end_learning_rate: 0.0,
            power: 1.0,
            cycle: true,
        };
        // t = 15 -> horizon 20, 1 - 15/20 = 0.25.
        assert!(close(decay.decayed(1.0, 15), 0.25));
    }

    #[test]
    fn test_exponential_uses_lr_decay_epochs() {
        let s = LrSchedule::build(LrDecayKind::Exponential, 1.0, &imagenet_plan(), 0.5);
        // exponential_decay_batches = 20
        assert!(close(s.learning_rate(20 + 20), 0.5));
        assert!(close(s.learning_rate(20 + 40), 0.25));
        assert!(close(s.learning_rate(20 + 10), 0.5f64.powf(0.5)));
    }

    #[test]
    fn test_exponential_staircase() {
        let decay = LearningRateDecay::Exponential { decay_batches: 10, decay_rate: 0.5, staircase: true };
        assert!(close(decay.decayed(1.0, 9), 1.0));
        assert!(close(decay.decayed(1.0, 10), 0.5));
    }

    #[test]
    fn test_constant_schedule_only_warms_up() {
        let s = LrSchedule::build(LrDecayKind::Constant, 0.3, &imagenet_plan(), 0.94);
        assert!(s.decay.is_none());
        assert!(close(s.learning_rate(5), 0.3 * 0.25));
        assert!(close(s.learning_rate(5000), 0.3));
    }

    #[test]
    fn test_bert_default_framework_value() {
        let value = LrSchedule::bert_default(1e-4).to_framework_value();
        assert_eq!(value["learning_rate_decay"]["polynomial_conf"]["decay_batches"], 100_000);
        assert_eq!(value["learning_rate_decay"]["polynomial_conf"]["end_learning_rate"], 0.0);
        assert_eq!(value["warmup_conf"]["linear_conf"]["warmup_batches"], 1000);
        assert_eq!(value["warmup_conf"]["linear_conf"]["start_multiplier"], 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(LrSchedule::constant(0.0).validate().is_err());
        assert!(LrSchedule::constant(f64::NAN).validate().is_err());
        let s = LrSchedule {
            base_lr: 0.1,
            decay: Some(LearningRateDecay::PiecewiseScaling { boundaries: vec![10, 5], scales: vec![0.1, 0.01] }),
            warmup: None,
        };
        assert!(s.validate().is_err());
        let s = LrSchedule {
            base_lr: 0.1,
            decay: Some(LearningRateDecay::Exponential { decay_batches: 1, decay_rate: 0.0, staircase: false }),
            warmup: None,
        };
        assert!(s.validate().is_err());
    }
}
