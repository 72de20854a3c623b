use crate::error::TrainingResult;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT_DIR: &str = "./output";
pub const SNAPSHOT_MANIFEST_FILE: &str = "snapshots.json";
pub const LAST_SNAPSHOT_DIR: &str = "last_snapshot";

/// Default save directory: `./output/model_save-<timestamp>`.
#[must_use]
pub fn default_model_save_dir(now: DateTime<Local>) -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR).join(format!("model_save-{}", now.format("%Y-%m-%d-%H:%M:%S")))
}

/// Filesystem layout of one run: where snapshots and logs go.
///
/// ```text
/// <model_save_dir>/snapshot_<name>/
/// <model_save_dir>/last_snapshot/
/// <model_save_dir>/snapshots.json
/// <log_dir>/summary.csv
/// ```
#[derive(Debug, Clone)]
pub struct RunLayout {
    model_save_dir: PathBuf,
    log_dir: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(model_save_dir: PathBuf, log_dir: PathBuf) -> Self {
        Self { model_save_dir, log_dir }
    }

    #[must_use]
    pub fn model_save_dir(&self) -> &Path {
        &self.model_save_dir
    }

    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    #[must_use]
    pub fn snapshot_dir(&self, name: &str) -> PathBuf {
        self.model_save_dir.join(format!("snapshot_{name}"))
    }

    #[must_use]
    pub fn last_snapshot_dir(&self) -> PathBuf {
        self.model_save_dir.join(LAST_SNAPSHOT_DIR)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.model_save_dir.join(SNAPSHOT_MANIFEST_FILE)
    }

    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.log_dir.join(crate::summary::SUMMARY_FILE_NAME)
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.model_save_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }
}
