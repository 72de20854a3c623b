//! Launchpad Training
//!
//! Framework-agnostic pieces of the training launchers:
//! - Cluster resources, record schemas and image data sources
//! - Learning-rate schedules and model-update (optimizer) configuration
//! - Job definitions and the `ExecutionBackend` seam to the framework
//! - Speedometer, metrics, summaries and snapshots
//! - The BERT pretraining and CNN classification loops

pub mod backend;
pub mod data;
pub mod error;
pub mod job;
pub mod layout;
pub mod metric;
pub mod optimizer;
pub mod progress;
pub mod resources;
pub mod runner;
pub mod schedule;
pub mod snapshot;
pub mod speedometer;
pub mod summary;

pub use backend::{CollectiveBoxingConf, CompiledJob, EnvConfig, ExecutionBackend};
pub use data::{ImageDataSource, ImagePreprocess, RecordField, RecordSource, bert_record_schema};
pub use error::{TrainingError, TrainingResult};
pub use job::{BertConfig, CnnModel, FunctionConfig, JobDefinition, JobKind, JobOutput, Predictions, TrainingJobId};
pub use layout::{RunLayout, default_model_save_dir};
pub use metric::{Metric, MetricReport, match_top_k};
pub use optimizer::{ModelUpdateConf, ModelUpdateKind, OptimizerArgs, bert_model_update_conf, set_up_optimizer};
pub use progress::{ProgressEvent, ProgressSink, RecordingProgressSink, StdoutProgressSink, TracingProgressSink};
pub use resources::{ClusterResources, NodeAddr, parse_node_list};
pub use runner::{ClassificationRun, PretrainRun, RunReport, run_classification, run_pretraining};
pub use schedule::{BatchPlan, LrDecayKind, LrSchedule};
pub use snapshot::{Snapshot, SnapshotEntry};
pub use speedometer::{BertSpeedometer, StepReport, ThroughputReport};
pub use summary::Summary;
