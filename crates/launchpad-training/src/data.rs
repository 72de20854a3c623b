//! Record schemas and data sources handed to the backend's decoders.
//!
//! Decoding itself happens inside the framework; this module only describes
//! which blobs to read, their shapes, and how images are preprocessed.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Int32,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    Raw,
    Image,
}

/// One named blob in a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub codec: Codec,
}

impl RecordField {
    #[must_use]
    pub fn raw(name: &str, len: usize, dtype: DType) -> Self {
        Self { name: name.to_string(), shape: vec![len], dtype, codec: Codec::Raw }
    }
}

/// Field layout of a BERT pretraining record, in decode order.
///
/// `segment_ids` carries the token type ids.
#[must_use]
pub fn bert_record_schema(seq_length: usize, max_predictions_per_seq: usize) -> Vec<RecordField> {
    vec![
        RecordField::raw("input_ids", seq_length, DType::Int32),
        RecordField::raw("next_sentence_labels", 1, DType::Int32),
        RecordField::raw("input_mask", seq_length, DType::Int32),
        RecordField::raw("segment_ids", seq_length, DType::Int32),
        RecordField::raw("masked_lm_ids", max_predictions_per_seq, DType::Int32),
        RecordField::raw("masked_lm_positions", max_predictions_per_seq, DType::Int32),
        RecordField::raw("masked_lm_weights", max_predictions_per_seq, DType::Float),
    ]
}

/// A sharded record dataset on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSource {
    pub data_dir: PathBuf,
    pub data_part_num: u32,
    pub batch_size: u64,
    pub fields: Vec<RecordField>,
}

impl RecordSource {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.data_part_num == 0 {
            return Err(TrainingError::invalid("data_part_num must be >= 1"));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::invalid("batch size must be >= 1"));
        }
        require_dir(&self.data_dir)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

pub const IMAGENET_RGB_MEAN: [f32; 3] = [123.68, 116.779, 103.939];
pub const IMAGENET_RGB_STD: [f32; 3] = [58.393, 57.12, 57.375];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePreprocess {
    pub image_size: u32,
    pub random_crop: bool,
    pub mirror: bool,
    /// Resize the shorter side to this before a center crop (validation).
    pub resize_shorter: Option<u32>,
    pub rgb_mean: [f32; 3],
    pub rgb_std: [f32; 3],
    pub output_layout: TensorLayout,
}

impl ImagePreprocess {
    #[must_use]
    pub fn for_training(image_size: u32, new_dataloader: bool) -> Self {
        Self {
            image_size,
            random_crop: true,
            mirror: true,
            resize_shorter: None,
            rgb_mean: IMAGENET_RGB_MEAN,
            rgb_std: IMAGENET_RGB_STD,
            output_layout: layout_for(new_dataloader),
        }
    }

    #[must_use]
    pub fn for_validation(image_size: u32, new_dataloader: bool) -> Self {
        // 224 -> 256, the usual 0.875 crop ratio.
        let resize_shorter = (f64::from(image_size) / 0.875).round() as u32;
        Self {
            image_size,
            random_crop: false,
            mirror: false,
            resize_shorter: Some(resize_shorter),
            rgb_mean: IMAGENET_RGB_MEAN,
            rgb_std: IMAGENET_RGB_STD,
            output_layout: layout_for(new_dataloader),
        }
    }
}

fn layout_for(new_dataloader: bool) -> TensorLayout {
    if new_dataloader { TensorLayout::Nchw } else { TensorLayout::Nhwc }
}

/// Where classification images come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageDataSource {
    OfRecord {
        data_dir: PathBuf,
        data_part_num: u32,
        batch_size: u64,
        preprocess: ImagePreprocess,
        new_dataloader: bool,
    },
    Synthetic {
        batch_size: u64,
        image_size: u32,
        num_classes: u32,
    },
}

impl ImageDataSource {
    #[must_use]
    pub fn batch_size(&self) -> u64 {
        match self {
            Self::OfRecord { batch_size, .. } | Self::Synthetic { batch_size, .. } => *batch_size,
        }
    }

    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic { .. })
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.batch_size() == 0 {
            return Err(TrainingError::invalid("batch size must be >= 1"));
        }
        match self {
            Self::OfRecord { data_dir, data_part_num, .. } => {
                if *data_part_num == 0 {
                    return Err(TrainingError::invalid("data_part_num must be >= 1"));
                }
                require_dir(data_dir)
            }
            Self::Synthetic { .. } => Ok(()),
        }
    }
}

fn require_dir(dir: &Path) -> TrainingResult<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(TrainingError::Dataset(format!("data directory does not exist: {}", dir.display())))
    }
}
