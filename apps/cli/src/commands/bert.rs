//! BERT pretraining command.

use super::{RunContext, print_json, print_report};
use anyhow::{Context, Result};
use launchpad_training::{
    BertConfig, ClusterResources, PretrainRun, StdoutProgressSink, parse_node_list, run_pretraining,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

#[derive(clap::Args, Debug, Clone, Serialize)]
#[command(rename_all = "snake_case")]
pub struct BertArgs {
    #[arg(long, default_value_t = 1)]
    pub gpu_num_per_node: u32,

    #[arg(long, default_value_t = 1)]
    pub node_num: u32,

    /// Comma-separated node addresses, required when node_num > 1
    #[arg(long)]
    pub node_list: Option<String>,

    #[arg(long, default_value_t = 1e-4)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 0.01)]
    pub weight_l2: f64,

    #[arg(long, default_value_t = 24)]
    pub batch_size_per_device: u32,

    #[arg(long, default_value_t = 10)]
    pub iter_num: u64,

    /// Warm-up iterations excluded from the throughput average
    #[arg(long, default_value_t = 10)]
    pub skip_iter_num: u64,

    #[arg(long, default_value_t = 1)]
    pub log_every_n_iter: u64,

    /// OFRecord part files directory
    #[arg(long)]
    pub data_dir: PathBuf,

    #[arg(long, default_value_t = 32)]
    pub data_part_num: u32,

    #[arg(long)]
    pub enable_auto_mixed_precision: bool,

    #[arg(long, default_value_t = 1)]
    pub loss_print_every_n_iter: u64,

    #[arg(long, default_value_t = 200)]
    pub model_save_every_n_iter: u64,

    #[arg(long)]
    pub model_save_dir: Option<PathBuf>,

    #[arg(long)]
    pub save_last_snapshot: bool,

    #[arg(long)]
    pub model_load_dir: Option<PathBuf>,

    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 512)]
    pub seq_length: usize,

    #[arg(long, default_value_t = 80)]
    pub max_predictions_per_seq: usize,

    #[arg(long, default_value_t = 24)]
    pub num_hidden_layers: usize,

    #[arg(long, default_value_t = 16)]
    pub num_attention_heads: usize,

    #[arg(long, default_value_t = 512)]
    pub max_position_embeddings: usize,

    #[arg(long, default_value_t = 2)]
    pub type_vocab_size: usize,

    #[arg(long, default_value_t = 30522)]
    pub vocab_size: usize,

    #[arg(long, default_value_t = 0.1)]
    pub attention_probs_dropout_prob: f64,

    #[arg(long, default_value_t = 0.1)]
    pub hidden_dropout_prob: f64,

    #[arg(long, default_value_t = 64)]
    pub hidden_size_per_head: usize,
}

impl BertArgs {
    fn resources(&self) -> ClusterResources {
        if self.node_num > 1 {
            let nodes = self.node_list.as_deref().map(parse_node_list).unwrap_or_default();
            ClusterResources::multi_node(self.node_num, self.gpu_num_per_node, nodes)
        } else {
            ClusterResources::single_node(self.gpu_num_per_node)
        }
    }

    fn bert_config(&self) -> BertConfig {
        BertConfig {
            seq_length: self.seq_length,
            max_predictions_per_seq: self.max_predictions_per_seq,
            num_hidden_layers: self.num_hidden_layers,
            num_attention_heads: self.num_attention_heads,
            max_position_embeddings: self.max_position_embeddings,
            type_vocab_size: self.type_vocab_size,
            vocab_size: self.vocab_size,
            attention_probs_dropout_prob: self.attention_probs_dropout_prob,
            hidden_dropout_prob: self.hidden_dropout_prob,
            hidden_size_per_head: self.hidden_size_per_head,
        }
    }

    pub fn to_run(&self, ctx: &RunContext) -> Result<PretrainRun> {
        let layout = ctx.layout(self.model_save_dir.clone(), self.log_dir.clone());
        let mut args = serde_json::to_value(self)?;
        args["model_save_dir"] = json!(layout.model_save_dir());
        args["log_dir"] = json!(layout.log_dir());

        Ok(PretrainRun {
            resources: self.resources(),
            bert: self.bert_config(),
            data_dir: self.data_dir.clone(),
            data_part_num: self.data_part_num,
            batch_size_per_device: self.batch_size_per_device,
            learning_rate: self.learning_rate,
            weight_l2: self.weight_l2,
            iter_num: self.iter_num,
            skip_iter_num: self.skip_iter_num,
            loss_print_every_n_iter: self.loss_print_every_n_iter,
            model_save_every_n_iter: self.model_save_every_n_iter,
            save_last_snapshot: self.save_last_snapshot,
            mixed_precision: self.enable_auto_mixed_precision,
            model_load_dir: self.model_load_dir.clone(),
            layout,
            args,
        })
    }
}

pub async fn execute(args: BertArgs, ctx: &RunContext) -> Result<()> {
    let run = args.to_run(ctx)?;

    if ctx.dry_run {
        let job = run.job_definition().context("Failed to build the pretraining job")?;
        return print_json(&json!({
            "job": job,
            "function_config": job.function_config.to_framework_value(),
            "bert": run.bert.to_framework_value(),
            "env": run.env_config(),
            "total_batch_size": run.total_batch_size(),
        }));
    }

    let backend = ctx.backend()?;
    let report = run_pretraining(backend.as_ref(), &run, &StdoutProgressSink)
        .await
        .context("BERT pretraining failed")?;
    print_report("Pretraining complete", &report);
    Ok(())
}
