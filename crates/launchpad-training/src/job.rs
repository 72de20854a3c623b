use crate::data::{DType, ImageDataSource, RecordSource};
use crate::error::{TrainingError, TrainingResult};
use crate::optimizer::ModelUpdateConf;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifier for a launched run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributeStrategy {
    /// One logical model over all devices.
    Consistent,
    /// Replicated model, data-parallel.
    Mirrored,
}

/// Training half of a function config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConf {
    pub model_update: ModelUpdateConf,
}

impl TrainConf {
    #[must_use]
    pub fn to_framework_value(&self) -> Value {
        let mut value = json!({
            "primary_lr": self.model_update.primary_lr(),
            "model_update_conf": self.model_update.to_framework_value(),
        });
        if let Some(weight_l2) = self.model_update.weight_l2 {
            value["weight_l2"] = json!(weight_l2);
        }
        value
    }
}

/// Compile-time settings of a job function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub default_data_type: DType,
    pub distribute_strategy: DistributeStrategy,
    pub mixed_precision: bool,
    pub train: Option<TrainConf>,
}

impl FunctionConfig {
    #[must_use]
    pub fn training(model_update: ModelUpdateConf, mixed_precision: bool) -> Self {
        Self {
            default_data_type: DType::Float,
            distribute_strategy: DistributeStrategy::Consistent,
            mixed_precision,
            train: Some(TrainConf { model_update }),
        }
    }

    #[must_use]
    pub fn inference(mixed_precision: bool) -> Self {
        Self {
            default_data_type: DType::Float,
            distribute_strategy: DistributeStrategy::Consistent,
            mixed_precision,
            train: None,
        }
    }

    #[must_use]
    pub fn is_training(&self) -> bool {
        self.train.is_some()
    }

    #[must_use]
    pub fn to_framework_value(&self) -> Value {
        let mut value = json!({
            "default_data_type": self.default_data_type,
            "default_distribute_strategy": self.distribute_strategy,
            "enable_auto_mixed_precision": self.mixed_precision,
        });
        if let Some(train) = &self.train {
            value["train"] = train.to_framework_value();
        }
        value
    }
}

/// BERT encoder sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BertConfig {
    pub seq_length: usize,
    pub max_predictions_per_seq: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub vocab_size: usize,
    pub attention_probs_dropout_prob: f64,
    pub hidden_dropout_prob: f64,
    pub hidden_size_per_head: usize,
}

impl Default for BertConfig {
    fn default() -> Self {
        Self {
            seq_length: 512,
            max_predictions_per_seq: 80,
            num_hidden_layers: 24,
            num_attention_heads: 16,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            vocab_size: 30522,
            attention_probs_dropout_prob: 0.1,
            hidden_dropout_prob: 0.1,
            hidden_size_per_head: 64,
        }
    }
}

impl BertConfig {
    pub const HIDDEN_ACT: &'static str = "gelu";
    pub const INITIALIZER_RANGE: f64 = 0.02;

    #[must_use]
    pub fn hidden_size(&self) -> usize {
        self.hidden_size_per_head * self.num_attention_heads
    }

    #[must_use]
    pub fn intermediate_size(&self) -> usize {
        self.hidden_size() * 4
    }

    pub fn validate(&self) -> TrainingResult<()> {
        for (name, value) in [
            ("seq_length", self.seq_length),
            ("max_predictions_per_seq", self.max_predictions_per_seq),
            ("num_hidden_layers", self.num_hidden_layers),
            ("num_attention_heads", self.num_attention_heads),
            ("max_position_embeddings", self.max_position_embeddings),
            ("type_vocab_size", self.type_vocab_size),
            ("vocab_size", self.vocab_size),
            ("hidden_size_per_head", self.hidden_size_per_head),
        ] {
            if value == 0 {
                return Err(TrainingError::invalid(format!("{name} must be >= 1")));
            }
        }
        if self.seq_length > self.max_position_embeddings {
            return Err(TrainingError::invalid(format!(
                "seq_length ({}) exceeds max_position_embeddings ({})",
                self.seq_length, self.max_position_embeddings
            )));
        }
        if self.max_predictions_per_seq > self.seq_length {
            return Err(TrainingError::invalid("max_predictions_per_seq must not exceed seq_length"));
        }
        for (name, p) in [
            ("attention_probs_dropout_prob", self.attention_probs_dropout_prob),
            ("hidden_dropout_prob", self.hidden_dropout_prob),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(TrainingError::invalid(format!("{name} must be within [0, 1)")));
            }
        }
        Ok(())
    }

    /// Full model-construction request, including derived sizes.
    #[must_use]
    pub fn to_framework_value(&self) -> Value {
        json!({
            "vocab_size": self.vocab_size,
            "seq_length": self.seq_length,
            "hidden_size": self.hidden_size(),
            "num_hidden_layers": self.num_hidden_layers,
            "num_attention_heads": self.num_attention_heads,
            "intermediate_size": self.intermediate_size(),
            "hidden_act": Self::HIDDEN_ACT,
            "hidden_dropout_prob": self.hidden_dropout_prob,
            "attention_probs_dropout_prob": self.attention_probs_dropout_prob,
            "max_position_embeddings": self.max_position_embeddings,
            "type_vocab_size": self.type_vocab_size,
            "max_predictions_per_seq": self.max_predictions_per_seq,
            "initializer_range": Self::INITIALIZER_RANGE,
        })
    }
}

/// Classification models the framework can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CnnModel {
    Resnet50,
    #[value(name = "mobilenet_v2")]
    MobilenetV2,
}

impl CnnModel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resnet50 => "resnet50",
            Self::MobilenetV2 => "mobilenet_v2",
        }
    }
}

impl std::fmt::Display for CnnModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-hot label smoothing applied before softmax cross entropy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelSmoothing {
    pub classes: u32,
    pub eta: f64,
}

impl LabelSmoothing {
    pub fn new(classes: u32, eta: f64) -> TrainingResult<Self> {
        if classes == 0 {
            return Err(TrainingError::invalid("num_classes must be > 0"));
        }
        if !(0.0..1.0).contains(&eta) {
            return Err(TrainingError::invalid("label_smoothing must be within [0, 1)"));
        }
        Ok(Self { classes, eta })
    }

    #[must_use]
    pub fn on_value(&self) -> f64 {
        1.0 - self.eta + self.eta / f64::from(self.classes)
    }

    #[must_use]
    pub fn off_value(&self) -> f64 {
        self.eta / f64::from(self.classes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Masked LM + next sentence prediction. Outputs `total_loss`, `mlm_loss`, `nsp_loss`.
    Pretrain { bert: BertConfig, records: RecordSource },
    /// Outputs `loss`, `predictions`, `labels`.
    ClassifierTrain {
        model: CnnModel,
        data: ImageDataSource,
        label_smoothing: LabelSmoothing,
        need_transpose: bool,
    },
    /// Outputs `predictions`, `labels`.
    ClassifierEval { model: CnnModel, data: ImageDataSource, need_transpose: bool },
}

impl JobKind {
    #[must_use]
    pub fn batch_size(&self) -> u64 {
        match self {
            Self::Pretrain { records, .. } => records.batch_size,
            Self::ClassifierTrain { data, .. } | Self::ClassifierEval { data, .. } => data.batch_size(),
        }
    }
}

/// A named job function: what to build and how to compile it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub function_config: FunctionConfig,
    pub kind: JobKind,
}

impl JobDefinition {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.name.trim().is_empty() {
            return Err(TrainingError::invalid("job name is required"));
        }
        match &self.kind {
            JobKind::Pretrain { bert, records } => {
                bert.validate()?;
                records.validate()?;
            }
            JobKind::ClassifierTrain { data, .. } => data.validate()?,
            JobKind::ClassifierEval { data, .. } => data.validate()?,
        }
        let needs_train = matches!(self.kind, JobKind::Pretrain { .. } | JobKind::ClassifierTrain { .. });
        if needs_train != self.function_config.is_training() {
            return Err(TrainingError::invalid(format!(
                "job {} has a function config that does not match its kind",
                self.name
            )));
        }
        Ok(())
    }
}

/// Row-major `[batch, classes]` class probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub num_classes: usize,
    pub probs: Vec<f32>,
}

impl Predictions {
    #[must_use]
    pub fn rows(&self) -> usize {
        if self.num_classes == 0 { 0 } else { self.probs.len() / self.num_classes }
    }

    #[must_use]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.probs[i * self.num_classes..(i + 1) * self.num_classes]
    }
}

/// Fetched outputs of one job launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    #[serde(default)]
    pub scalars: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub predictions: Option<Predictions>,
    #[serde(default)]
    pub labels: Option<Vec<i64>>,
}

impl JobOutput {
    #[must_use]
    pub fn with_scalar(mut self, key: &str, values: Vec<f64>) -> Self {
        self.scalars.insert(key.to_string(), values);
        self
    }

    /// Mean of a scalar output, `None` if missing or empty.
    #[must_use]
    pub fn mean(&self, key: &str) -> Option<f64> {
        let values = self.scalars.get(key)?;
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
