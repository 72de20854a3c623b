//! Optimizer selection and the model-update conf handed to the framework.

use crate::error::{TrainingError, TrainingResult};
use crate::schedule::{BatchPlan, LrDecayKind, LrSchedule};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Variables whose name contains this are left out of AdamW weight decay.
pub const BN_WEIGHT_DECAY_EXCLUDE: &str = "_bn-";

pub const ADAM_BETA1: f64 = 0.9;
pub const ADAM_BETA2: f64 = 0.999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelUpdateKind {
    Sgd,
    Adam,
    Rmsprop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConf {
    Sgd {
        momentum: Option<f64>,
    },
    Adam {
        beta1: f64,
        beta2: f64,
        epsilon: f64,
        do_bias_correction: bool,
    },
    AdamW {
        beta1: f64,
        beta2: f64,
        epsilon: f64,
        weight_decay: f64,
        weight_decay_excludes: Vec<String>,
    },
    RmsProp {
        decay_rate: f64,
        epsilon: f64,
    },
}

impl OptimizerConf {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sgd { momentum: None } => "sgd",
            Self::Sgd { momentum: Some(_) } => "momentum",
            Self::Adam { .. } => "adam",
            Self::AdamW { .. } => "adamw",
            Self::RmsProp { .. } => "rmsprop",
        }
    }

    fn insert_framework_entries(&self, conf: &mut serde_json::Map<String, Value>) {
        match self {
            Self::Sgd { momentum: None } => {
                conf.insert("naive_conf".to_string(), json!({}));
            }
            Self::Sgd { momentum: Some(beta) } => {
                conf.insert("momentum_conf".to_string(), json!({ "beta": beta }));
            }
            Self::Adam { beta1, beta2, epsilon, do_bias_correction } => {
                conf.insert(
                    "adam_conf".to_string(),
                    json!({
                        "beta1": beta1,
                        "beta2": beta2,
                        "epsilon": epsilon,
                        "do_bias_correction": do_bias_correction,
                    }),
                );
            }
            Self::AdamW { beta1, beta2, epsilon, weight_decay, weight_decay_excludes } => {
                conf.insert(
                    "adam_conf".to_string(),
                    json!({ "beta1": beta1, "beta2": beta2, "epsilon": epsilon }),
                );
                conf.insert(
                    "weight_decay_conf".to_string(),
                    json!({
                        "weight_decay_rate": weight_decay,
                        "excludes": { "pattern": weight_decay_excludes },
                    }),
                );
            }
            Self::RmsProp { decay_rate, epsilon } => {
                conf.insert(
                    "rmsprop_conf".to_string(),
                    json!({ "decay_rate": decay_rate, "epsilon": epsilon }),
                );
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GradClipping {
    ByGlobalNorm { clip_norm: f64 },
}

/// Everything the framework needs to update model weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUpdateConf {
    pub optimizer: OptimizerConf,
    pub schedule: LrSchedule,
    pub grad_clipping: Option<GradClipping>,
    /// L2 penalty on weights, applied outside the optimizer.
    pub weight_l2: Option<f64>,
}

impl ModelUpdateConf {
    #[must_use]
    pub fn primary_lr(&self) -> f64 {
        self.schedule.base_lr
    }

    #[must_use]
    pub fn to_framework_value(&self) -> Value {
        let mut conf = match self.schedule.to_framework_value() {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        if let Some(GradClipping::ByGlobalNorm { clip_norm }) = &self.grad_clipping {
            conf.insert(
                "clip_conf".to_string(),
                json!({ "clip_by_global_norm": { "clip_norm": clip_norm } }),
            );
        }
        self.optimizer.insert_framework_entries(&mut conf);
        Value::Object(conf)
    }
}

/// Optimizer flags shared by the classification and schedule commands.
#[derive(Debug, Clone, Serialize, Deserialize, clap::Args)]
#[command(rename_all = "snake_case")]
pub struct OptimizerArgs {
    /// Optimizer: sgd, adam, rmsprop
    #[arg(long, value_enum, default_value_t = ModelUpdateKind::Sgd)]
    pub model_update: ModelUpdateKind,

    #[arg(long, default_value_t = 0.256)]
    pub learning_rate: f64,

    /// Weight decay
    #[arg(long, default_value_t = 1.0 / 32768.0)]
    pub wd: f64,

    /// Momentum
    #[arg(long, default_value_t = 0.875)]
    pub momentum: f64,

    /// Learning rate decay: cosine, step, polynomial, exponential, none
    #[arg(long, value_enum, default_value_t = LrDecayKind::Cosine)]
    pub lr_decay: LrDecayKind,

    /// Exponential learning rate decay rate
    #[arg(long, default_value_t = 0.94)]
    pub lr_decay_rate: f64,

    /// Exponential learning rate decay every n epochs
    #[arg(long, default_value_t = 2)]
    pub lr_decay_epochs: u64,

    /// The epochs to warm up lr to the scaled large-batch value
    #[arg(long, default_value_t = 5)]
    pub warmup_epochs: u64,

    /// Decay rate of RMSProp
    #[arg(long, default_value_t = 0.9)]
    pub decay_rate: f64,

    #[arg(long, default_value_t = 1.0)]
    pub epsilon: f64,

    /// Gradient clipping by global norm (0 disables)
    #[arg(long, default_value_t = 0.0)]
    pub gradient_clipping: f64,
}

impl Default for OptimizerArgs {
    fn default() -> Self {
        Self {
            model_update: ModelUpdateKind::Sgd,
            learning_rate: 0.256,
            wd: 1.0 / 32768.0,
            momentum: 0.875,
            lr_decay: LrDecayKind::Cosine,
            lr_decay_rate: 0.94,
            lr_decay_epochs: 2,
            warmup_epochs: 5,
            decay_rate: 0.9,
            epsilon: 1.0,
            gradient_clipping: 0.0,
        }
    }
}

impl OptimizerArgs {
    pub fn validate(&self) -> TrainingResult<()> {
        for (name, value) in [
            ("wd", self.wd),
            ("momentum", self.momentum),
            ("decay_rate", self.decay_rate),
            ("epsilon", self.epsilon),
            ("gradient_clipping", self.gradient_clipping),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(TrainingError::invalid(format!("{name} must be a finite value >= 0")));
            }
        }
        Ok(())
    }
}

/// Pick the optimizer, schedule, and clipping for a classification run.
pub fn set_up_optimizer(args: &OptimizerArgs, plan: &BatchPlan) -> TrainingResult<ModelUpdateConf> {
    args.validate()?;

    let schedule = LrSchedule::build(args.lr_decay, args.learning_rate, plan, args.lr_decay_rate);
    schedule.validate()?;

    let grad_clipping = (args.gradient_clipping > 0.0)
        .then_some(GradClipping::ByGlobalNorm { clip_norm: args.gradient_clipping });

    let (optimizer, grad_clipping) = match args.model_update {
        ModelUpdateKind::Sgd => (
            OptimizerConf::Sgd { momentum: (args.momentum > 0.0).then_some(args.momentum) },
            grad_clipping,
        ),
        ModelUpdateKind::Adam if args.wd > 0.0 && args.wd < 1.0 => (
            OptimizerConf::AdamW {
                beta1: ADAM_BETA1,
                beta2: ADAM_BETA2,
                epsilon: args.epsilon,
                weight_decay: args.wd,
                weight_decay_excludes: vec![BN_WEIGHT_DECAY_EXCLUDE.to_string()],
            },
            grad_clipping,
        ),
        ModelUpdateKind::Adam => (
            OptimizerConf::Adam {
                beta1: ADAM_BETA1,
                beta2: ADAM_BETA2,
                epsilon: args.epsilon,
                do_bias_correction: false,
            },
            grad_clipping,
        ),
        // RMSProp is never clipped.
        ModelUpdateKind::Rmsprop => {
            (OptimizerConf::RmsProp { decay_rate: args.decay_rate, epsilon: args.epsilon }, None)
        }
    };

    tracing::debug!(
        optimizer = optimizer.name(),
        warmup_batches = plan.warmup_batches,
        decay_batches = plan.decay_batches,
        "set up optimizer"
    );

    Ok(ModelUpdateConf { optimizer, schedule, grad_clipping, weight_l2: None })
}

/// The fixed BERT pretraining update: Adam, polynomial decay with warmup,
/// global-norm clipping at 1.0.
pub fn bert_model_update_conf(learning_rate: f64, weight_l2: f64) -> TrainingResult<ModelUpdateConf> {
    let schedule = LrSchedule::bert_default(learning_rate);
    schedule.validate()?;
    if !weight_l2.is_finite() || weight_l2 < 0.0 {
        return Err(TrainingError::invalid("weight_l2 must be a finite value >= 0"));
    }
    Ok(ModelUpdateConf {
        optimizer: OptimizerConf::Adam {
            beta1: ADAM_BETA1,
            beta2: ADAM_BETA2,
            epsilon: 1e-6,
            do_bias_correction: false,
        },
        schedule,
        grad_clipping: Some(GradClipping::ByGlobalNorm { clip_norm: 1.0 }),
        weight_l2: (weight_l2 > 0.0).then_some(weight_l2),
    })
}
