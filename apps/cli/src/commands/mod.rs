//! Command implementations for the Launchpad CLI.

pub mod bert;
pub mod cnn;
pub mod schedule;

use anyhow::{Context, Result};
use colored::Colorize;
use launchpad_core::{CliConfig, SYNTHETIC_BACKEND_ID, backend_for, synthetic::DEFAULT_SEED};
use launchpad_training::layout::DEFAULT_OUTPUT_DIR;
use launchpad_training::{ExecutionBackend, RunLayout, RunReport, default_model_save_dir};
use std::path::PathBuf;

/// Settings shared by every subcommand: flags first, then config files.
#[derive(Debug)]
pub struct RunContext {
    pub config: CliConfig,
    pub backend_id: String,
    pub seed: u64,
    pub dry_run: bool,
}

impl RunContext {
    pub fn new(config: CliConfig, backend: Option<String>, seed: Option<u64>, dry_run: bool) -> Self {
        let backend_id = backend
            .or_else(|| config.backend.clone())
            .unwrap_or_else(|| SYNTHETIC_BACKEND_ID.to_string());
        let seed = seed.or(config.seed).unwrap_or(DEFAULT_SEED);
        Self { config, backend_id, seed, dry_run }
    }

    pub fn backend(&self) -> Result<Box<dyn ExecutionBackend>> {
        backend_for(&self.backend_id, self.seed).context("Failed to select execution backend")
    }

    /// `--log_dir`, else the configured log dir, else `./output`.
    pub fn log_dir(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.config.log_dir.clone()).unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    /// `--model_save_dir`, else a timestamped directory under the configured
    /// root or `./output`.
    pub fn model_save_dir(&self, flag: Option<PathBuf>) -> PathBuf {
        if let Some(dir) = flag {
            return dir;
        }
        let default = default_model_save_dir(chrono::Local::now());
        match (&self.config.model_save_root, default.file_name()) {
            (Some(root), Some(name)) => root.join(name),
            _ => default,
        }
    }

    pub fn layout(&self, model_save_dir: Option<PathBuf>, log_dir: Option<PathBuf>) -> RunLayout {
        RunLayout::new(self.model_save_dir(model_save_dir), self.log_dir(log_dir))
    }
}

pub fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_report(title: &str, report: &RunReport) {
    println!();
    println!("{}", title.bold().green());
    println!("  Job: {}", report.job_id.to_string().cyan());
    println!("  Steps: {}", report.steps);
    for (key, value) in &report.final_losses {
        println!("  {}: {:.3}", key, value);
    }
    if let Some(throughput) = &report.throughput {
        println!("  {}", throughput.to_string().dimmed());
    }
    if report.snapshots.is_empty() {
        println!("  {}", "No snapshots saved.".dimmed());
    } else {
        println!("  Snapshots:");
        for entry in &report.snapshots {
            println!("    {} {}", entry.name.cyan(), entry.path.display().to_string().dimmed());
        }
    }
    println!();
}
