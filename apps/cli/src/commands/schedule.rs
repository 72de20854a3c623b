//! Learning-rate schedule inspection.

use super::print_json;
use anyhow::{Context, Result};
use colored::Colorize;
use launchpad_training::{BatchPlan, OptimizerArgs, set_up_optimizer};
use serde_json::json;
use std::collections::BTreeSet;

#[derive(clap::Args, Debug, Clone)]
#[command(rename_all = "snake_case")]
pub struct ScheduleArgs {
    #[arg(long, default_value_t = 1_281_167)]
    pub num_examples: u64,

    /// Global train batch size
    #[arg(long, default_value_t = 256)]
    pub batch_size: u64,

    #[arg(long, default_value_t = 90)]
    pub num_epochs: u64,

    /// Steps to evaluate; may repeat
    #[arg(long = "at")]
    pub at: Vec<u64>,

    /// Also evaluate every n steps
    #[arg(long)]
    pub every: Option<u64>,

    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub optimizer: OptimizerArgs,
}

impl ScheduleArgs {
    /// Requested steps, or one point per epoch plus the last step when none
    /// were asked for.
    fn steps(&self, plan: &BatchPlan) -> Vec<u64> {
        let mut steps: BTreeSet<u64> = self.at.iter().copied().collect();
        if let Some(every) = self.every.filter(|n| *n > 0) {
            steps.extend((0..plan.num_train_batches).step_by(every as usize));
        }
        if steps.is_empty() {
            steps.extend((0..plan.num_train_batches).step_by(plan.batches_per_epoch.max(1) as usize));
            steps.insert(plan.num_train_batches.saturating_sub(1));
        }
        steps.into_iter().collect()
    }
}

pub fn execute(args: &ScheduleArgs) -> Result<()> {
    let plan = BatchPlan::new(
        args.num_examples,
        args.batch_size,
        args.num_epochs,
        args.optimizer.warmup_epochs,
        args.optimizer.lr_decay_epochs,
    )
    .context("Invalid schedule settings")?;
    let conf = set_up_optimizer(&args.optimizer, &plan).context("Invalid optimizer settings")?;
    let points: Vec<(u64, f64)> =
        args.steps(&plan).into_iter().map(|step| (step, conf.schedule.learning_rate(step))).collect();

    if args.json {
        return print_json(&json!({
            "plan": plan,
            "optimizer": conf.optimizer.name(),
            "model_update_conf": conf.to_framework_value(),
            "points": points.iter().map(|(step, lr)| json!({ "step": step, "learning_rate": lr })).collect::<Vec<_>>(),
        }));
    }

    println!();
    println!("{}", format!("Learning rate ({}, {:?})", conf.optimizer.name(), args.optimizer.lr_decay).bold().cyan());
    println!(
        "  {} batches/epoch, {} warmup batches, {} total",
        plan.batches_per_epoch, plan.warmup_batches, plan.num_train_batches
    );
    println!();
    println!("{:<12} {:<8} {}", "Step", "Epoch", "Learning rate");
    println!("{}", "─".repeat(40));
    for (step, lr) in &points {
        println!("{:<12} {:<8} {:.8}", step, step / plan.batches_per_epoch.max(1), lr);
    }
    println!();
    println!("{}", "Model update conf:".bold());
    println!("{}", serde_json::to_string_pretty(&conf.to_framework_value())?);
    Ok(())
}
