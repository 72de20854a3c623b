//! Scalar summary written as `summary.csv` in the log directory.

use crate::error::TrainingResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE_NAME: &str = "summary.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub epoch: u64,
    pub iter: u64,
    pub legend: String,
    pub value: Option<f64>,
    pub note: Option<String>,
    pub rank: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Summary {
    log_dir: PathBuf,
    rows: Vec<SummaryRow>,
}

impl Summary {
    /// Create the log directory and seed the summary with the run config.
    pub fn new<C: Serialize>(log_dir: &Path, config: &C) -> TrainingResult<Self> {
        std::fs::create_dir_all(log_dir)?;
        let note = serde_json::to_string(config)?;
        Ok(Self {
            log_dir: log_dir.to_path_buf(),
            rows: vec![SummaryRow {
                epoch: 0,
                iter: 0,
                legend: "cfg".to_string(),
                value: None,
                note: Some(note),
                rank: 0,
                timestamp: Utc::now(),
            }],
        })
    }

    pub fn scalar(&mut self, legend: &str, value: f64, epoch: u64, step: u64) {
        self.rows.push(SummaryRow {
            epoch,
            iter: step,
            legend: legend.to_string(),
            value: Some(value),
            note: None,
            rank: 0,
            timestamp: Utc::now(),
        });
    }

    #[must_use]
    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.log_dir.join(SUMMARY_FILE_NAME)
    }

    /// Rewrite the whole CSV with every row recorded so far.
    pub fn save(&self) -> TrainingResult<()> {
        let mut writer = csv::Writer::from_path(self.path())?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
