use crate::error::TrainingResult;
use crate::job::{JobDefinition, JobOutput};
use crate::resources::NodeAddr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// NCCL fusion settings for collective boxing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectiveBoxingConf {
    pub nccl_fusion_threshold_mb: u64,
    pub nccl_fusion_all_reduce_use_buffer: bool,
}

impl CollectiveBoxingConf {
    #[must_use]
    pub fn boxing_v2() -> Self {
        Self { nccl_fusion_threshold_mb: 8, nccl_fusion_all_reduce_use_buffer: false }
    }
}

/// Process-wide environment set up once before any job is compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    pub log_dir: PathBuf,
    pub gpu_device_num: u32,
    #[serde(default)]
    pub machines: Vec<NodeAddr>,
    #[serde(default)]
    pub ctrl_port: Option<u16>,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub grpc_use_no_signal: bool,
    #[serde(default)]
    pub collective_boxing: Option<CollectiveBoxingConf>,
}

impl EnvConfig {
    #[must_use]
    pub fn new(log_dir: PathBuf, gpu_device_num: u32) -> Self {
        Self {
            log_dir,
            gpu_device_num,
            machines: Vec::new(),
            ctrl_port: None,
            debug_mode: false,
            grpc_use_no_signal: false,
            collective_boxing: None,
        }
    }
}

/// A compiled job function. Each launch runs one iteration and returns its
/// fetched outputs.
#[async_trait]
pub trait CompiledJob: Send {
    fn name(&self) -> &str;

    async fn launch(&mut self) -> TrainingResult<JobOutput>;
}

/// The deep-learning framework that actually executes jobs.
///
/// Model construction, kernels, record decoding, gradient synchronization and
/// the checkpoint format all live behind this trait.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn id(&self) -> &'static str;

    async fn init_env(&self, env: &EnvConfig) -> TrainingResult<()>;

    async fn compile(&self, job: &JobDefinition) -> TrainingResult<Box<dyn CompiledJob>>;

    /// Initialize model variables from their initializers.
    async fn init_model(&self) -> TrainingResult<()>;

    async fn load_model(&self, dir: &Path) -> TrainingResult<()>;

    async fn save_model(&self, dir: &Path) -> TrainingResult<()>;
}
