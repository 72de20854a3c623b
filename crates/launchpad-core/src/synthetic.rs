//! Deterministic stand-in for the execution framework.
//!
//! Losses fall as the configured learning-rate schedule is integrated over
//! training steps, and classification accuracy rises with it. Snapshots are
//! a single `snapshot.json` holding the step counter and a digest of the
//! model-update config that produced it.

use crate::error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_training::schedule::LrSchedule;
use launchpad_training::{
    CompiledJob, EnvConfig, ExecutionBackend, ImageDataSource, JobDefinition, JobKind, JobOutput, Predictions,
    TrainingResult,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub const SYNTHETIC_BACKEND_ID: &str = "synthetic";
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.json";
pub const DEFAULT_SEED: u64 = 0;

/// Steps of full-rate training it takes to close ~63% of the loss gap.
const PROGRESS_SCALE: f64 = 200.0;
const NOISE: f64 = 0.02;
const MAX_ACCURACY: f64 = 0.95;
const DEFAULT_NUM_CLASSES: usize = 1000;

/// Contents of `snapshot.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSnapshot {
    pub backend: String,
    pub step: u64,
    pub progress: f64,
    pub jobs: Vec<String>,
    pub model_update_sha256: Option<String>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ModelState {
    env: Option<EnvConfig>,
    initialized: bool,
    step: u64,
    /// Integral of lr / base_lr over the steps trained so far.
    progress: f64,
    jobs: Vec<String>,
    model_update_sha256: Option<String>,
    num_classes: Option<usize>,
}

fn lock(state: &Mutex<ModelState>) -> MutexGuard<'_, ModelState> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub struct SyntheticBackend {
    seed: u64,
    state: Arc<Mutex<ModelState>>,
}

impl SyntheticBackend {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed, state: Arc::new(Mutex::new(ModelState::default())) }
    }

    /// Training steps run so far, including restored ones.
    #[must_use]
    pub fn step(&self) -> u64 {
        lock(&self.state).step
    }

    #[must_use]
    pub fn env(&self) -> Option<EnvConfig> {
        lock(&self.state).env.clone()
    }

    pub fn read_snapshot(dir: &Path) -> crate::error::Result<SyntheticSnapshot> {
        let path = dir.join(SNAPSHOT_FILE_NAME);
        if !path.is_file() {
            return Err(BackendError::MissingSnapshot(dir.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

fn digest_model_update(job: &JobDefinition) -> Option<String> {
    let train = job.function_config.train.as_ref()?;
    let value = train.model_update.to_framework_value().to_string();
    Some(hex::encode(Sha256::digest(value.as_bytes())))
}

fn seed_for(seed: u64, name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    seed ^ u64::from_le_bytes(bytes)
}

#[async_trait]
impl ExecutionBackend for SyntheticBackend {
    fn id(&self) -> &'static str {
        SYNTHETIC_BACKEND_ID
    }

    async fn init_env(&self, env: &EnvConfig) -> TrainingResult<()> {
        tracing::debug!(
            gpus = env.gpu_device_num,
            machines = env.machines.len(),
            boxing_v2 = env.collective_boxing.is_some(),
            "synthetic env initialized"
        );
        lock(&self.state).env = Some(env.clone());
        Ok(())
    }

    async fn compile(&self, job: &JobDefinition) -> TrainingResult<Box<dyn CompiledJob>> {
        let mut state = lock(&self.state);
        let env = state.env.clone().ok_or(BackendError::EnvNotInitialized)?;

        let shape = match &job.kind {
            JobKind::Pretrain { .. } => OutputShape::Pretrain,
            JobKind::ClassifierTrain { label_smoothing, .. } => {
                let classes = label_smoothing.classes as usize;
                state.num_classes = Some(classes);
                OutputShape::Classifier { classes, with_loss: true }
            }
            JobKind::ClassifierEval { data, .. } => {
                let classes = match data {
                    ImageDataSource::Synthetic { num_classes, .. } => *num_classes as usize,
                    ImageDataSource::OfRecord { .. } => {
                        state.num_classes.unwrap_or(DEFAULT_NUM_CLASSES)
                    }
                };
                OutputShape::Classifier { classes, with_loss: false }
            }
        };

        if let Some(sha) = digest_model_update(job) {
            state.model_update_sha256 = Some(sha);
        }
        state.jobs.push(job.name.clone());
        tracing::debug!(job = %job.name, "synthetic job compiled");

        Ok(Box::new(SyntheticJob {
            name: job.name.clone(),
            shape,
            batch_size: job.kind.batch_size() as usize,
            devices: env.gpu_device_num.max(1) as usize,
            schedule: job.function_config.train.as_ref().map(|t| t.model_update.schedule.clone()),
            rng: StdRng::seed_from_u64(seed_for(self.seed, &job.name)),
            state: Arc::clone(&self.state),
        }))
    }

    async fn init_model(&self) -> TrainingResult<()> {
        let mut state = lock(&self.state);
        state.initialized = true;
        state.step = 0;
        state.progress = 0.0;
        Ok(())
    }

    async fn load_model(&self, dir: &Path) -> TrainingResult<()> {
        let snapshot = Self::read_snapshot(dir)?;
        let mut state = lock(&self.state);
        state.initialized = true;
        state.step = snapshot.step;
        state.progress = snapshot.progress;
        tracing::debug!(step = snapshot.step, dir = %dir.display(), "synthetic model restored");
        Ok(())
    }

    async fn save_model(&self, dir: &Path) -> TrainingResult<()> {
        let snapshot = {
            let state = lock(&self.state);
            if !state.initialized {
                return Err(BackendError::ModelNotInitialized.into());
            }
            SyntheticSnapshot {
                backend: SYNTHETIC_BACKEND_ID.to_string(),
                step: state.step,
                progress: state.progress,
                jobs: state.jobs.clone(),
                model_update_sha256: state.model_update_sha256.clone(),
                saved_at: Utc::now(),
            }
        };
        std::fs::create_dir_all(dir).map_err(BackendError::from)?;
        let json = serde_json::to_string_pretty(&snapshot).map_err(BackendError::from)?;
        std::fs::write(dir.join(SNAPSHOT_FILE_NAME), json).map_err(BackendError::from)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputShape {
    Pretrain,
    Classifier { classes: usize, with_loss: bool },
}

struct SyntheticJob {
    name: String,
    shape: OutputShape,
    batch_size: usize,
    devices: usize,
    schedule: Option<LrSchedule>,
    rng: StdRng,
    state: Arc<Mutex<ModelState>>,
}

impl SyntheticJob {
    /// Advance the shared model by one step if this is a training job, and
    /// return the progress the outputs should reflect.
    fn advance(&self) -> Result<f64, BackendError> {
        let mut state = lock(&self.state);
        if !state.initialized {
            return Err(BackendError::ModelNotInitialized);
        }
        if let Some(schedule) = &self.schedule {
            if schedule.base_lr > 0.0 {
                state.progress += schedule.learning_rate(state.step) / schedule.base_lr;
            }
            state.step += 1;
        }
        Ok(state.progress)
    }

    fn noisy(&mut self, value: f64) -> f64 {
        value * (1.0 + self.rng.gen_range(-NOISE..=NOISE))
    }

    /// One value per device, as the framework fetches them.
    fn per_device(&mut self, value: f64) -> Vec<f64> {
        (0..self.devices).map(|_| self.noisy(value)).collect()
    }

    fn classify(&mut self, classes: usize, accuracy: f64) -> (Predictions, Vec<i64>) {
        let classes = classes.max(1);
        let peak = 0.5_f32.max(1.0 / classes as f32);
        let rest = if classes > 1 { (1.0 - peak) / (classes - 1) as f32 } else { 0.0 };
        let mut probs = vec![rest; self.batch_size * classes];
        let mut labels = Vec::with_capacity(self.batch_size);

        for row in 0..self.batch_size {
            let label = self.rng.gen_range(0..classes);
            let predicted = if classes == 1 || self.rng.gen_bool(accuracy) {
                label
            } else {
                (label + self.rng.gen_range(1..classes)) % classes
            };
            probs[row * classes + predicted] = peak;
            labels.push(label as i64);
        }
        (Predictions { num_classes: classes, probs }, labels)
    }
}

#[async_trait]
impl CompiledJob for SyntheticJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn launch(&mut self) -> TrainingResult<JobOutput> {
        let progress = self.advance()?;
        let decay = (-progress / PROGRESS_SCALE).exp();

        let output = match self.shape {
            OutputShape::Pretrain => {
                let mlm = 1.5 + 8.5 * decay;
                let nsp = 0.3 + 0.4 * decay;
                let mlm_loss = self.per_device(mlm);
                let nsp_loss = self.per_device(nsp);
                let total_loss = mlm_loss.iter().zip(&nsp_loss).map(|(m, n)| m + n).collect();
                JobOutput::default()
                    .with_scalar("total_loss", total_loss)
                    .with_scalar("mlm_loss", mlm_loss)
                    .with_scalar("nsp_loss", nsp_loss)
            }
            OutputShape::Classifier { classes, with_loss } => {
                let chance = 1.0 / classes.max(1) as f64;
                let accuracy = (chance + (MAX_ACCURACY - chance) * (1.0 - decay)).clamp(0.0, 1.0);
                let (predictions, labels) = self.classify(classes, accuracy);
                let output = JobOutput { predictions: Some(predictions), labels: Some(labels), ..Default::default() };
                if with_loss {
                    let loss = 0.8 + (classes.max(2) as f64).ln() * decay;
                    let values = self.per_device(loss);
                    output.with_scalar("loss", values)
                } else {
                    output
                }
            }
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_training::job::LabelSmoothing;
    use launchpad_training::{ClusterResources, CnnModel, FunctionConfig, optimizer};
    use tempfile::TempDir;

    fn classifier_job(classes: u32) -> JobDefinition {
        let plan = launchpad_training::BatchPlan::new(64, 8, 4, 1, 1).unwrap();
        let conf = optimizer::set_up_optimizer(&optimizer::OptimizerArgs::default(), &plan).unwrap();
        JobDefinition {
            name: "TrainNet".to_string(),
            function_config: FunctionConfig::training(conf, false),
            kind: JobKind::ClassifierTrain {
                model: CnnModel::Resnet50,
                data: ImageDataSource::Synthetic { batch_size: 8, image_size: 32, num_classes: classes },
                label_smoothing: LabelSmoothing::new(classes, 0.1).unwrap(),
                need_transpose: true,
            },
        }
    }

    async fn ready_backend(seed: u64) -> SyntheticBackend {
        let backend = SyntheticBackend::new(seed);
        let resources = ClusterResources::single_node(2);
        let env = EnvConfig::new(std::env::temp_dir(), resources.gpu_num_per_node);
        backend.init_env(&env).await.unwrap();
        backend
    }

    #[tokio::test]
    async fn test_compile_requires_env() {
        let backend = SyntheticBackend::default();
        let err = backend.compile(&classifier_job(10)).await.err().unwrap();
        assert!(err.to_string().contains("init_env"));
    }

    #[tokio::test]
    async fn test_launch_requires_initialized_model() {
        let backend = ready_backend(1).await;
        let mut job = backend.compile(&classifier_job(10)).await.unwrap();
        assert!(job.launch().await.is_err());

        backend.init_model().await.unwrap();
        let out = job.launch().await.unwrap();
        assert_eq!(out.labels.as_ref().unwrap().len(), 8);
        assert_eq!(out.predictions.as_ref().unwrap().rows(), 8);
        assert_eq!(out.scalars["loss"].len(), 2);
        assert_eq!(backend.step(), 1);
    }

    #[tokio::test]
    async fn test_outputs_are_deterministic_per_seed() {
        async fn run(seed: u64) -> Vec<JobOutput> {
            let backend = ready_backend(seed).await;
            backend.init_model().await.unwrap();
            let mut job = backend.compile(&classifier_job(10)).await.unwrap();
            let mut outs = Vec::new();
            for _ in 0..3 {
                outs.push(job.launch().await.unwrap());
            }
            outs
        }
        assert_eq!(run(3).await, run(3).await);
        assert_ne!(run(3).await, run(4).await);
    }

    #[tokio::test]
    async fn test_loss_falls_with_training() {
        let backend = ready_backend(0).await;
        backend.init_model().await.unwrap();
        let mut job = backend.compile(&classifier_job(10)).await.unwrap();
        let first = job.launch().await.unwrap().mean("loss").unwrap();
        let mut last = first;
        for _ in 0..400 {
            last = job.launch().await.unwrap().mean("loss").unwrap();
        }
        assert!(last < first);
    }

    #[tokio::test]
    async fn test_save_and_restore_step() {
        let temp = TempDir::new().unwrap();
        let backend = ready_backend(0).await;
        backend.init_model().await.unwrap();
        let mut job = backend.compile(&classifier_job(10)).await.unwrap();
        for _ in 0..5 {
            job.launch().await.unwrap();
        }
        backend.save_model(temp.path()).await.unwrap();

        let snapshot = SyntheticBackend::read_snapshot(temp.path()).unwrap();
        assert_eq!(snapshot.step, 5);
        assert_eq!(snapshot.jobs, vec!["TrainNet".to_string()]);
        assert_eq!(snapshot.model_update_sha256.as_ref().map(String::len), Some(64));

        let restored = ready_backend(0).await;
        restored.load_model(temp.path()).await.unwrap();
        assert_eq!(restored.step(), 5);
    }

    #[tokio::test]
    async fn test_load_from_empty_dir_fails() {
        let temp = TempDir::new().unwrap();
        let backend = ready_backend(0).await;
        let err = backend.load_model(temp.path()).await.unwrap_err();
        assert!(matches!(err, launchpad_training::TrainingError::Snapshot(_)));
    }
}
