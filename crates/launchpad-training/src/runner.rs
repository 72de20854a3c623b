//! Training loops for the two launchers: BERT pretraining and CNN
//! classification.

use crate::backend::{CollectiveBoxingConf, ExecutionBackend, EnvConfig};
use crate::data::{ImageDataSource, ImagePreprocess, RecordSource, bert_record_schema};
use crate::error::{TrainingError, TrainingResult};
use crate::job::{BertConfig, CnnModel, FunctionConfig, JobDefinition, JobKind, JobOutput, LabelSmoothing, TrainingJobId};
use crate::layout::RunLayout;
use crate::metric::{Metric, MetricReport};
use crate::optimizer::{ModelUpdateConf, OptimizerArgs, bert_model_update_conf, set_up_optimizer};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::resources::ClusterResources;
use crate::schedule::BatchPlan;
use crate::snapshot::{Snapshot, SnapshotEntry};
use crate::speedometer::{BertSpeedometer, ThroughputReport};
use crate::summary::Summary;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

const BANNER_WIDTH: usize = 66;
pub const PRETRAIN_JOB_NAME: &str = "PretrainJob";
pub const TRAIN_JOB_NAME: &str = "TrainNet";
pub const EVAL_JOB_NAME: &str = "InferenceNet";

/// Render the run banner: title, every argument as `k = v`, and a timestamp.
#[must_use]
pub fn format_args_banner(title: &str, args: &Value, now: chrono::DateTime<chrono::Local>) -> String {
    let mut lines = vec!["=".repeat(BANNER_WIDTH), title.to_string(), "=".repeat(BANNER_WIDTH)];
    if let Value::Object(map) = args {
        for (key, value) in map {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Null => "None".to_string(),
                other => other.to_string(),
            };
            lines.push(format!("{key} = {rendered}"));
        }
    }
    lines.push("-".repeat(BANNER_WIDTH));
    lines.push(format!("Time stamp: {}", now.format("%Y-%m-%d-%H:%M:%S")));
    lines.join("\n")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub job_id: TrainingJobId,
    pub steps: u64,
    /// Scalar means of the last launched training step.
    pub final_losses: BTreeMap<String, f64>,
    pub snapshots: Vec<SnapshotEntry>,
    pub throughput: Option<ThroughputReport>,
    pub metrics: Vec<MetricReport>,
}

fn scalar_means(outputs: &JobOutput) -> BTreeMap<String, f64> {
    outputs.scalars.keys().filter_map(|k| outputs.mean(k).map(|m| (k.clone(), m))).collect()
}

fn emit(sink: &dyn ProgressSink, job_id: &TrainingJobId, message: impl Into<String>) {
    sink.on_event(ProgressEvent::Message { job_id: job_id.clone(), message: message.into() });
}

/// Everything a BERT pretraining run needs.
#[derive(Debug, Clone)]
pub struct PretrainRun {
    pub resources: ClusterResources,
    pub bert: BertConfig,
    pub data_dir: PathBuf,
    pub data_part_num: u32,
    pub batch_size_per_device: u32,
    pub learning_rate: f64,
    pub weight_l2: f64,
    pub iter_num: u64,
    pub skip_iter_num: u64,
    pub loss_print_every_n_iter: u64,
    /// 0 disables periodic snapshots.
    pub model_save_every_n_iter: u64,
    pub save_last_snapshot: bool,
    pub mixed_precision: bool,
    pub model_load_dir: Option<PathBuf>,
    pub layout: RunLayout,
    /// Resolved arguments, echoed in the banner.
    pub args: Value,
}

impl PretrainRun {
    #[must_use]
    pub fn total_batch_size(&self) -> u64 {
        self.resources.global_batch_size(self.batch_size_per_device)
    }

    pub fn model_update_conf(&self) -> TrainingResult<ModelUpdateConf> {
        bert_model_update_conf(self.learning_rate, self.weight_l2)
    }

    pub fn job_definition(&self) -> TrainingResult<JobDefinition> {
        let records = RecordSource {
            data_dir: self.data_dir.clone(),
            data_part_num: self.data_part_num,
            batch_size: self.total_batch_size(),
            fields: bert_record_schema(self.bert.seq_length, self.bert.max_predictions_per_seq),
        };
        Ok(JobDefinition {
            name: PRETRAIN_JOB_NAME.to_string(),
            function_config: FunctionConfig::training(self.model_update_conf()?, self.mixed_precision),
            kind: JobKind::Pretrain { bert: self.bert.clone(), records },
        })
    }

    #[must_use]
    pub fn env_config(&self) -> EnvConfig {
        let mut env = EnvConfig::new(self.layout.log_dir().to_path_buf(), self.resources.gpu_num_per_node);
        env.machines = self.resources.machines();
        env.ctrl_port = self.resources.ctrl_port;
        env
    }
}

pub async fn run_pretraining(
    backend: &dyn ExecutionBackend,
    run: &PretrainRun,
    sink: &dyn ProgressSink,
) -> TrainingResult<RunReport> {
    run.resources.validate()?;
    let job = run.job_definition()?;
    job.validate()?;

    let job_id = TrainingJobId::new();
    let title = format!(
        "Running bert: num_gpu_per_node = {}, num_nodes = {}.",
        run.resources.gpu_num_per_node, run.resources.node_num
    );
    emit(sink, &job_id, format_args_banner(&title, &run.args, chrono::Local::now()));
    sink.on_event(ProgressEvent::Started { job_id: job_id.clone() });
    tracing::info!(job_id = %job_id, backend = backend.id(), "starting bert pretraining");

    backend.init_env(&run.env_config()).await?;
    run.layout.ensure_dirs()?;

    let mut snapshot =
        Snapshot::open(backend, run.layout.clone(), run.model_load_dir.as_deref(), false, job_id.clone(), sink)
            .await?;
    let mut compiled = backend.compile(&job).await?;

    let mut meter = BertSpeedometer::new(
        run.total_batch_size(),
        run.skip_iter_num,
        run.iter_num,
        run.loss_print_every_n_iter,
    );
    let total = meter.total_steps();
    let mut last_outputs = JobOutput::default();

    for step in 0..total {
        let outputs = compiled.launch().await?;
        if let Some(report) = meter.on_step(step, &outputs) {
            emit(sink, &job_id, report.to_string());
        }
        sink.on_event(ProgressEvent::Step { job_id: job_id.clone(), step, total: Some(total) });

        if run.model_save_every_n_iter > 0 && (step + 1) % run.model_save_every_n_iter == 0 {
            snapshot.save(&(step + 1).to_string()).await?;
        }
        last_outputs = outputs;
    }

    if run.save_last_snapshot {
        snapshot.save_last().await?;
    }

    let throughput = meter.finish();
    if let Some(throughput) = &throughput {
        emit(sink, &job_id, throughput.to_string());
    }
    sink.on_event(ProgressEvent::Finished { job_id: job_id.clone() });

    Ok(RunReport {
        job_id,
        steps: total,
        final_losses: scalar_means(&last_outputs),
        snapshots: snapshot.entries().to_vec(),
        throughput,
        metrics: Vec::new(),
    })
}

/// Everything a classification training/validation run needs.
#[derive(Debug, Clone)]
pub struct ClassificationRun {
    pub resources: ClusterResources,
    pub model: CnnModel,
    pub batch_size_per_device: u32,
    pub val_batch_size_per_device: u32,
    pub num_examples: u64,
    pub num_val_examples: u64,
    pub num_epochs: u64,
    /// Synthetic images when unset.
    pub train_data_dir: Option<PathBuf>,
    pub train_data_part_num: u32,
    /// Validation is skipped when unset.
    pub val_data_dir: Option<PathBuf>,
    pub val_data_part_num: u32,
    pub use_new_dataloader: bool,
    pub image_size: u32,
    pub num_classes: u32,
    pub label_smoothing: f64,
    pub loss_print_every_n_iter: u64,
    pub save_snapshot_after_epoch: u64,
    pub use_boxing_v2: bool,
    pub use_fp16: bool,
    pub optimizer: OptimizerArgs,
    pub model_load_dir: Option<PathBuf>,
    pub layout: RunLayout,
    pub args: Value,
}

impl ClassificationRun {
    #[must_use]
    pub fn train_batch_size(&self) -> u64 {
        self.resources.global_batch_size(self.batch_size_per_device)
    }

    #[must_use]
    pub fn val_batch_size(&self) -> u64 {
        self.resources.global_batch_size(self.val_batch_size_per_device)
    }

    /// Train steps per epoch, rounding the last partial batch up.
    #[must_use]
    pub fn epoch_size(&self) -> u64 {
        self.num_examples.div_ceil(self.train_batch_size().max(1))
    }

    /// Validation steps per epoch; the last partial batch is dropped.
    #[must_use]
    pub fn num_val_steps(&self) -> u64 {
        self.num_val_examples / self.val_batch_size().max(1)
    }

    pub fn batch_plan(&self) -> TrainingResult<BatchPlan> {
        BatchPlan::new(
            self.num_examples,
            self.train_batch_size(),
            self.num_epochs,
            self.optimizer.warmup_epochs,
            self.optimizer.lr_decay_epochs,
        )
    }

    pub fn model_update_conf(&self) -> TrainingResult<ModelUpdateConf> {
        set_up_optimizer(&self.optimizer, &self.batch_plan()?)
    }

    /// The legacy loader emits NHWC, so the model transposes its input.
    fn need_transpose(&self) -> bool {
        !self.use_new_dataloader
    }

    pub fn train_job(&self) -> TrainingResult<JobDefinition> {
        let data = match &self.train_data_dir {
            Some(dir) => ImageDataSource::OfRecord {
                data_dir: dir.clone(),
                data_part_num: self.train_data_part_num,
                batch_size: self.train_batch_size(),
                preprocess: ImagePreprocess::for_training(self.image_size, self.use_new_dataloader),
                new_dataloader: self.use_new_dataloader,
            },
            None => ImageDataSource::Synthetic {
                batch_size: self.train_batch_size(),
                image_size: self.image_size,
                num_classes: self.num_classes,
            },
        };
        Ok(JobDefinition {
            name: TRAIN_JOB_NAME.to_string(),
            function_config: FunctionConfig::training(self.model_update_conf()?, self.use_fp16),
            kind: JobKind::ClassifierTrain {
                model: self.model,
                data,
                label_smoothing: LabelSmoothing::new(self.num_classes, self.label_smoothing)?,
                need_transpose: self.need_transpose(),
            },
        })
    }

    /// `None` when no validation data directory is configured.
    #[must_use]
    pub fn eval_job(&self) -> Option<JobDefinition> {
        let dir = self.val_data_dir.as_ref()?;
        Some(JobDefinition {
            name: EVAL_JOB_NAME.to_string(),
            function_config: FunctionConfig::inference(self.use_fp16),
            kind: JobKind::ClassifierEval {
                model: self.model,
                data: ImageDataSource::OfRecord {
                    data_dir: dir.clone(),
                    data_part_num: self.val_data_part_num,
                    batch_size: self.val_batch_size(),
                    preprocess: ImagePreprocess::for_validation(self.image_size, self.use_new_dataloader),
                    new_dataloader: self.use_new_dataloader,
                },
                need_transpose: self.need_transpose(),
            },
        })
    }

    #[must_use]
    pub fn env_config(&self) -> EnvConfig {
        let mut env = EnvConfig::new(self.layout.log_dir().to_path_buf(), self.resources.gpu_num_per_node);
        env.machines = self.resources.machines();
        env.ctrl_port = self.resources.ctrl_port;
        env.debug_mode = true;
        env.grpc_use_no_signal = true;
        if self.use_boxing_v2 {
            env.collective_boxing = Some(CollectiveBoxingConf::boxing_v2());
        }
        env
    }
}

pub async fn run_classification(
    backend: &dyn ExecutionBackend,
    run: &ClassificationRun,
    sink: &dyn ProgressSink,
) -> TrainingResult<RunReport> {
    run.resources.validate()?;
    if run.num_examples == 0 {
        return Err(TrainingError::invalid("num_examples must be >= 1"));
    }
    let train_job = run.train_job()?;
    train_job.validate()?;
    let eval_job = run.eval_job();
    if let Some(job) = &eval_job {
        job.validate()?;
    }

    let job_id = TrainingJobId::new();
    let title = format!(
        "Running {}: num_gpu_per_node = {}, num_nodes = {}.",
        run.model, run.resources.gpu_num_per_node, run.resources.node_num
    );
    emit(sink, &job_id, format_args_banner(&title, &run.args, chrono::Local::now()));
    sink.on_event(ProgressEvent::Started { job_id: job_id.clone() });
    tracing::info!(job_id = %job_id, backend = backend.id(), model = %run.model, "starting classification");

    backend.init_env(&run.env_config()).await?;
    run.layout.ensure_dirs()?;

    let mut summary = Summary::new(run.layout.log_dir(), &run.args)?;
    let mut snapshot =
        Snapshot::open(backend, run.layout.clone(), run.model_load_dir.as_deref(), true, job_id.clone(), sink)
            .await?;

    let mut train = backend.compile(&train_job).await?;
    let mut eval = match &eval_job {
        Some(job) => Some(backend.compile(job).await?),
        None => None,
    };

    let epoch_size = run.epoch_size();
    let num_val_steps = run.num_val_steps();
    let total = epoch_size * run.num_epochs;
    let mut reports = Vec::new();
    let mut last_outputs = JobOutput::default();

    for epoch in 0..run.num_epochs {
        let mut train_metric = Metric::new("train", run.loss_print_every_n_iter, epoch_size).with_loss_key("loss");
        for step in 0..epoch_size {
            let outputs = train.launch().await?;
            if let Some(report) = train_metric.on_step(epoch, step, &outputs, Some(&mut summary))? {
                emit(sink, &job_id, report.to_string());
                reports.push(report);
            }
            sink.on_event(ProgressEvent::Step {
                job_id: job_id.clone(),
                step: epoch * epoch_size + step,
                total: Some(total),
            });
            last_outputs = outputs;
        }

        if let Some(eval) = eval.as_mut() {
            let mut val_metric = Metric::new("validation", num_val_steps, num_val_steps);
            for step in 0..num_val_steps {
                let outputs = eval.launch().await?;
                if let Some(report) = val_metric.on_step(epoch, step, &outputs, Some(&mut summary))? {
                    emit(sink, &job_id, report.to_string());
                    reports.push(report);
                }
            }
        }

        if epoch > run.save_snapshot_after_epoch {
            snapshot.save(&format!("epoch_{epoch}")).await?;
        }
    }

    summary.save()?;
    sink.on_event(ProgressEvent::Finished { job_id: job_id.clone() });

    Ok(RunReport {
        job_id,
        steps: total,
        final_losses: scalar_means(&last_outputs),
        snapshots: snapshot.entries().to_vec(),
        throughput: None,
        metrics: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CompiledJob;
    use crate::job::Predictions;
    use crate::progress::RecordingProgressSink;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
        train_delay: Option<Duration>,
    }

    impl FakeBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    struct FakeJob {
        name: String,
        eval: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl CompiledJob for FakeJob {
        fn name(&self) -> &str {
            &self.name
        }

        async fn launch(&mut self) -> TrainingResult<JobOutput> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let out = JobOutput {
                predictions: Some(Predictions { num_classes: 2, probs: vec![0.9, 0.1, 0.2, 0.8] }),
                labels: Some(vec![0, 1]),
                ..Default::default()
            };
            Ok(if self.eval {
                out
            } else {
                out.with_scalar("loss", vec![0.5])
                    .with_scalar("total_loss", vec![3.0])
                    .with_scalar("mlm_loss", vec![2.0])
                    .with_scalar("nsp_loss", vec![1.0])
            })
        }
    }

    #[async_trait]
    impl ExecutionBackend for FakeBackend {
        fn id(&self) -> &'static str {
            "fake"
        }

        async fn init_env(&self, env: &EnvConfig) -> TrainingResult<()> {
            self.record(format!("init_env boxing={}", env.collective_boxing.is_some()));
            Ok(())
        }

        async fn compile(&self, job: &JobDefinition) -> TrainingResult<Box<dyn CompiledJob>> {
            self.record(format!("compile {}", job.name));
            let eval = !job.function_config.is_training();
            let delay = if eval { None } else { self.train_delay };
            Ok(Box::new(FakeJob { name: job.name.clone(), eval, delay }))
        }

        async fn init_model(&self) -> TrainingResult<()> {
            self.record("init_model".to_string());
            Ok(())
        }

        async fn load_model(&self, dir: &Path) -> TrainingResult<()> {
            self.record(format!("load_model {}", dir.display()));
            Ok(())
        }

        async fn save_model(&self, dir: &Path) -> TrainingResult<()> {
            self.record(format!("save_model {}", dir.file_name().unwrap().to_string_lossy()));
            Ok(())
        }
    }

    fn layout(temp: &TempDir) -> RunLayout {
        RunLayout::new(temp.path().join("models"), temp.path().join("logs"))
    }

    fn pretrain_run(temp: &TempDir) -> PretrainRun {
        let data_dir = temp.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        PretrainRun {
            resources: ClusterResources::single_node(2),
            bert: BertConfig::default(),
            data_dir,
            data_part_num: 4,
            batch_size_per_device: 8,
            learning_rate: 1e-4,
            weight_l2: 0.01,
            iter_num: 4,
            skip_iter_num: 2,
            loss_print_every_n_iter: 2,
            model_save_every_n_iter: 3,
            save_last_snapshot: true,
            mixed_precision: false,
            model_load_dir: None,
            layout: layout(temp),
            args: serde_json::json!({ "iter_num": 4, "data_dir": "data" }),
        }
    }

    fn classification_run(temp: &TempDir) -> ClassificationRun {
        ClassificationRun {
            resources: ClusterResources::single_node(1),
            model: CnnModel::Resnet50,
            batch_size_per_device: 4,
            val_batch_size_per_device: 4,
            num_examples: 10,
            num_val_examples: 9,
            num_epochs: 3,
            train_data_dir: None,
            train_data_part_num: 1,
            val_data_dir: None,
            val_data_part_num: 1,
            use_new_dataloader: false,
            image_size: 32,
            num_classes: 2,
            label_smoothing: 0.1,
            loss_print_every_n_iter: 1,
            save_snapshot_after_epoch: 0,
            use_boxing_v2: false,
            use_fp16: false,
            optimizer: OptimizerArgs { warmup_epochs: 1, ..Default::default() },
            model_load_dir: None,
            layout: layout(temp),
            args: serde_json::json!({ "model": "resnet50" }),
        }
    }

    #[test]
    fn test_banner_layout() {
        use chrono::TimeZone;
        let now = chrono::Local.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap();
        let banner = format_args_banner("Running bert.", &serde_json::json!({ "a": 1, "b": "x", "c": null }), now);
        let lines: Vec<_> = banner.lines().collect();
        assert_eq!(lines[0], "=".repeat(66));
        assert_eq!(lines[1], "Running bert.");
        assert_eq!(&lines[3..6], ["a = 1", "b = x", "c = None"]);
        assert_eq!(lines[6], "-".repeat(66));
        assert_eq!(lines[7], "Time stamp: 2021-01-02-03:04:05");
    }

    #[tokio::test]
    async fn test_pretraining_saves_every_n_and_last() {
        let temp = TempDir::new().unwrap();
        let run = pretrain_run(&temp);
        let backend = FakeBackend::default();
        let sink = RecordingProgressSink::default();

        let report = run_pretraining(&backend, &run, &sink).await.unwrap();
        assert_eq!(report.steps, 6);
        assert_eq!(report.final_losses.get("total_loss"), Some(&3.0));
        assert!(report.throughput.is_some());

        let names: Vec<_> = report.snapshots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["3", "6", "last_snapshot"]);
        assert!(run.layout.snapshot_dir("3").is_dir());
        assert!(run.layout.last_snapshot_dir().is_dir());
        assert!(run.layout.manifest_path().is_file());

        let calls = backend.calls();
        assert_eq!(calls[0], "init_env boxing=false");
        assert_eq!(calls[1], "init_model");
        assert_eq!(calls[2], "compile PretrainJob");
        assert!(!calls.iter().any(|c| c.contains("snapshot_initial_model")));

        let messages = sink.messages();
        assert!(messages[0].contains("Running bert: num_gpu_per_node = 2, num_nodes = 1."));
        assert!(messages.iter().any(|m| m == "Init model on demand."));
        let loss_lines: Vec<_> = messages.iter().filter(|m| m.starts_with("iter ")).collect();
        assert_eq!(loss_lines.len(), 2);
        assert!(messages.last().unwrap().starts_with("average speed: "));
    }

    #[tokio::test]
    async fn test_pretraining_restores_from_load_dir() {
        let temp = TempDir::new().unwrap();
        let load_dir = temp.path().join("ckpt");
        std::fs::create_dir_all(&load_dir).unwrap();
        let mut run = pretrain_run(&temp);
        run.model_load_dir = Some(load_dir.clone());
        run.save_last_snapshot = false;
        run.model_save_every_n_iter = 0;

        let backend = FakeBackend::default();
        let sink = RecordingProgressSink::default();
        let report = run_pretraining(&backend, &run, &sink).await.unwrap();
        assert!(report.snapshots.is_empty());
        assert_eq!(backend.calls()[1], format!("load_model {}", load_dir.display()));
        assert!(sink.messages().iter().any(|m| m.starts_with("Restoring model from ")));
    }

    #[tokio::test]
    async fn test_pretraining_rejects_missing_load_dir() {
        let temp = TempDir::new().unwrap();
        let mut run = pretrain_run(&temp);
        run.model_load_dir = Some(temp.path().join("missing"));

        let err = run_pretraining(&FakeBackend::default(), &run, &RecordingProgressSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::Snapshot(_)));
    }

    #[tokio::test]
    async fn test_pretraining_rejects_missing_data_dir() {
        let temp = TempDir::new().unwrap();
        let mut run = pretrain_run(&temp);
        run.data_dir = temp.path().join("nope");

        let backend = FakeBackend::default();
        let err = run_pretraining(&backend, &run, &RecordingProgressSink::default()).await.unwrap_err();
        assert!(matches!(err, TrainingError::Dataset(_)));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_classification_sizes() {
        let temp = TempDir::new().unwrap();
        let run = classification_run(&temp);
        assert_eq!(run.epoch_size(), 3);
        assert_eq!(run.num_val_steps(), 2);
        assert!(run.eval_job().is_none());
        match run.train_job().unwrap().kind {
            JobKind::ClassifierTrain { data, .. } => assert!(data.is_synthetic()),
            other => panic!("unexpected job kind {other:?}"),
        }
    }

    #[test]
    fn test_need_transpose_follows_the_dataloader() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("imagenet");
        std::fs::create_dir_all(&dir).unwrap();

        for (use_new_dataloader, with_dirs) in [(false, false), (false, true), (true, false), (true, true)] {
            let mut run = classification_run(&temp);
            run.use_new_dataloader = use_new_dataloader;
            if with_dirs {
                run.train_data_dir = Some(dir.clone());
                run.val_data_dir = Some(dir.clone());
            }

            match run.train_job().unwrap().kind {
                JobKind::ClassifierTrain { data, need_transpose, .. } => {
                    assert_eq!(data.is_synthetic(), !with_dirs);
                    assert_eq!(need_transpose, !use_new_dataloader, "train, new_dataloader={use_new_dataloader}");
                }
                other => panic!("unexpected job kind {other:?}"),
            }
            match run.eval_job().map(|job| job.kind) {
                Some(JobKind::ClassifierEval { need_transpose, .. }) => {
                    assert!(with_dirs);
                    assert_eq!(need_transpose, !use_new_dataloader, "eval, new_dataloader={use_new_dataloader}");
                }
                None => assert!(!with_dirs),
                Some(other) => panic!("unexpected job kind {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_validation_throughput_excludes_training_time() {
        let temp = TempDir::new().unwrap();
        let val_dir = temp.path().join("val");
        std::fs::create_dir_all(&val_dir).unwrap();
        let mut run = classification_run(&temp);
        run.num_examples = 8;
        run.num_val_examples = 4;
        run.num_epochs = 2;
        run.save_snapshot_after_epoch = 10;
        run.val_data_dir = Some(val_dir);

        let backend = FakeBackend { train_delay: Some(Duration::from_millis(200)), ..Default::default() };
        let report = run_classification(&backend, &run, &RecordingProgressSink::default()).await.unwrap();

        let val_reports: Vec<_> = report.metrics.iter().filter(|r| r.desc == "validation").collect();
        assert_eq!(val_reports.len(), 2);
        for r in val_reports {
            assert!(r.samples_per_sec > 100.0, "epoch {} validation samples/s {}", r.epoch, r.samples_per_sec);
        }
        // Each train report covers one slow step of 2 samples, not the validation pass before it.
        for r in report.metrics.iter().filter(|r| r.desc == "train") {
            assert!(r.samples_per_sec < 20.0, "epoch {} train samples/s {}", r.epoch, r.samples_per_sec);
        }
    }

    #[tokio::test]
    async fn test_classification_train_and_validate() {
        let temp = TempDir::new().unwrap();
        let val_dir = temp.path().join("val");
        std::fs::create_dir_all(&val_dir).unwrap();
        let mut run = classification_run(&temp);
        run.val_data_dir = Some(val_dir);
        run.use_boxing_v2 = true;

        let backend = FakeBackend::default();
        let sink = RecordingProgressSink::default();
        let report = run_classification(&backend, &run, &sink).await.unwrap();

        assert_eq!(report.steps, 9);
        // Initial model plus epochs 1 and 2.
        let names: Vec<_> = report.snapshots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["initial_model", "epoch_1", "epoch_2"]);

        let calls = backend.calls();
        assert_eq!(calls[0], "init_env boxing=true");
        assert!(calls.contains(&"compile TrainNet".to_string()));
        assert!(calls.contains(&"compile InferenceNet".to_string()));

        let train_reports = report.metrics.iter().filter(|r| r.desc == "train").count();
        let val_reports: Vec<_> = report.metrics.iter().filter(|r| r.desc == "validation").collect();
        assert_eq!(train_reports, 9);
        assert_eq!(val_reports.len(), 3);
        assert!((val_reports[0].top_1 - 1.0).abs() < 1e-12);

        assert!(run.layout.summary_path().is_file());
        assert!(sink.messages()[0].contains("Running resnet50: num_gpu_per_node = 1, num_nodes = 1."));
    }
}
