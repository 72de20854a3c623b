//! CNN classification training/validation command.

use super::{RunContext, print_json, print_report};
use anyhow::{Context, Result};
use colored::Colorize;
use launchpad_training::resources::DEFAULT_CTRL_PORT;
use launchpad_training::{
    ClassificationRun, ClusterResources, CnnModel, OptimizerArgs, StdoutProgressSink, parse_node_list,
    run_classification,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

#[derive(clap::Args, Debug, Clone, Serialize)]
#[command(rename_all = "snake_case")]
pub struct CnnArgs {
    #[arg(long, default_value_t = 1)]
    pub num_nodes: u32,

    #[arg(long, default_value_t = 1)]
    pub gpu_num_per_node: u32,

    /// Comma-separated node addresses; the first num_nodes are used
    #[arg(long)]
    pub node_ips: Option<String>,

    #[arg(long, default_value_t = 32)]
    pub batch_size_per_device: u32,

    #[arg(long, default_value_t = 32)]
    pub val_batch_size_per_device: u32,

    #[arg(long, default_value_t = 1_281_167)]
    pub num_examples: u64,

    #[arg(long, default_value_t = 50_000)]
    pub num_val_examples: u64,

    #[arg(long, default_value_t = 90)]
    pub num_epochs: u64,

    #[arg(long, value_enum, default_value_t = CnnModel::Resnet50)]
    pub model: CnnModel,

    /// Synthetic images are used when unset
    #[arg(long)]
    pub train_data_dir: Option<PathBuf>,

    /// Validation is skipped when unset
    #[arg(long)]
    pub val_data_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 256)]
    pub train_data_part_num: u32,

    #[arg(long, default_value_t = 256)]
    pub val_data_part_num: u32,

    #[arg(long)]
    pub use_new_dataloader: bool,

    #[arg(long, default_value_t = 224)]
    pub image_size: u32,

    #[arg(long, default_value_t = 1000)]
    pub num_classes: u32,

    #[arg(long, default_value_t = 0.1)]
    pub label_smoothing: f64,

    #[arg(long, default_value_t = 1)]
    pub loss_print_every_n_iter: u64,

    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    #[arg(long)]
    pub model_save_dir: Option<PathBuf>,

    #[arg(long)]
    pub model_load_dir: Option<PathBuf>,

    /// Save a snapshot after every epoch past this one
    #[arg(long, default_value_t = 140)]
    pub save_snapshot_after_epoch: u64,

    #[arg(long)]
    pub use_boxing_v2: bool,

    #[arg(long)]
    pub use_fp16: bool,

    #[command(flatten)]
    #[serde(flatten)]
    pub optimizer: OptimizerArgs,
}

impl CnnArgs {
    fn resources(&self) -> ClusterResources {
        if self.num_nodes > 1 {
            let nodes = self.node_ips.as_deref().map(parse_node_list).unwrap_or_default();
            ClusterResources::multi_node(self.num_nodes, self.gpu_num_per_node, nodes)
                .with_ctrl_port(DEFAULT_CTRL_PORT)
        } else {
            ClusterResources::single_node(self.gpu_num_per_node)
        }
    }

    pub fn to_run(&self, ctx: &RunContext) -> Result<ClassificationRun> {
        let layout = ctx.layout(self.model_save_dir.clone(), self.log_dir.clone());
        let mut args = serde_json::to_value(self)?;
        args["model_save_dir"] = json!(layout.model_save_dir());
        args["log_dir"] = json!(layout.log_dir());

        Ok(ClassificationRun {
            resources: self.resources(),
            model: self.model,
            batch_size_per_device: self.batch_size_per_device,
            val_batch_size_per_device: self.val_batch_size_per_device,
            num_examples: self.num_examples,
            num_val_examples: self.num_val_examples,
            num_epochs: self.num_epochs,
            train_data_dir: self.train_data_dir.clone(),
            train_data_part_num: self.train_data_part_num,
            val_data_dir: self.val_data_dir.clone(),
            val_data_part_num: self.val_data_part_num,
            use_new_dataloader: self.use_new_dataloader,
            image_size: self.image_size,
            num_classes: self.num_classes,
            label_smoothing: self.label_smoothing,
            loss_print_every_n_iter: self.loss_print_every_n_iter,
            save_snapshot_after_epoch: self.save_snapshot_after_epoch,
            use_boxing_v2: self.use_boxing_v2,
            use_fp16: self.use_fp16,
            optimizer: self.optimizer.clone(),
            model_load_dir: self.model_load_dir.clone(),
            layout,
            args,
        })
    }
}

pub async fn execute(args: CnnArgs, ctx: &RunContext) -> Result<()> {
    let run = args.to_run(ctx)?;

    if ctx.dry_run {
        let train_job = run.train_job().context("Failed to build the training job")?;
        return print_json(&json!({
            "train_job": train_job,
            "eval_job": run.eval_job(),
            "function_config": train_job.function_config.to_framework_value(),
            "env": run.env_config(),
            "train_batch_size": run.train_batch_size(),
            "epoch_size": run.epoch_size(),
            "num_val_steps": run.num_val_steps(),
        }));
    }

    if run.train_data_dir.is_none() {
        println!("{}", "No --train_data_dir given, training on synthetic images.".yellow());
    }

    let backend = ctx.backend()?;
    let report = run_classification(backend.as_ref(), &run, &StdoutProgressSink)
        .await
        .context("Classification training failed")?;
    print_report("Training complete", &report);
    Ok(())
}
