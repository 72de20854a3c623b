//! Top-k accuracy, loss and throughput for classification jobs.

use crate::error::TrainingResult;
use crate::job::{JobOutput, Predictions};
use crate::summary::Summary;
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub const DEFAULT_TOP_K: usize = 5;

/// Count rows whose label is among the `k` most probable classes.
///
/// Ties rank the lower class index first. Rows without a matching label or
/// with an out-of-range label never match.
#[must_use]
pub fn match_top_k(predictions: &Predictions, labels: &[i64], k: usize) -> usize {
    (0..predictions.rows().min(labels.len()))
        .filter(|&i| {
            let row = predictions.row(i);
            let Ok(label) = usize::try_from(labels[i]) else {
                return false;
            };
            let Some(&target) = row.get(label) else {
                return false;
            };
            let rank = row
                .iter()
                .enumerate()
                .filter(|&(j, &p)| p > target || (p == target && j < label))
                .count();
            rank < k
        })
        .count()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub desc: String,
    pub epoch: u64,
    /// 1-based iteration within the epoch.
    pub iter: u64,
    pub loss: Option<f64>,
    pub top_1: f64,
    pub top_k: f64,
    pub k: usize,
    pub samples_per_sec: f64,
}

impl std::fmt::Display for MetricReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: epoch {}, iter {}, ", self.desc, self.epoch, self.iter)?;
        if let Some(loss) = self.loss {
            write!(f, "loss: {loss:.6}, ")?;
        }
        write!(
            f,
            "top_1: {:.6}, top_k: {:.6}, samples/s: {:.3}",
            self.top_1, self.top_k, self.samples_per_sec
        )
    }
}

#[derive(Debug)]
pub struct Metric {
    desc: String,
    calculate_batches: u64,
    save_summary_steps: u64,
    top_k: usize,
    loss_key: Option<String>,
    top_1_matched: usize,
    top_k_matched: usize,
    num_samples: usize,
    timer: Instant,
}

impl Metric {
    #[must_use]
    pub fn new(desc: &str, calculate_batches: u64, save_summary_steps: u64) -> Self {
        Self {
            desc: desc.to_string(),
            calculate_batches: calculate_batches.max(1),
            save_summary_steps: save_summary_steps.max(1),
            top_k: DEFAULT_TOP_K,
            loss_key: None,
            top_1_matched: 0,
            top_k_matched: 0,
            num_samples: 0,
            timer: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_loss_key(mut self, key: &str) -> Self {
        self.loss_key = Some(key.to_string());
        self
    }

    #[must_use]
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k.max(1);
        self
    }

    fn clear(&mut self) {
        self.top_1_matched = 0;
        self.top_k_matched = 0;
        self.num_samples = 0;
        self.timer = Instant::now();
    }

    /// Feed the outputs of `step` (0-based within `epoch`). Step 0 restarts
    /// both the counters and the throughput clock.
    pub fn on_step(
        &mut self,
        epoch: u64,
        step: u64,
        outputs: &JobOutput,
        mut summary: Option<&mut Summary>,
    ) -> TrainingResult<Option<MetricReport>> {
        if step == 0 {
            self.clear();
        }

        let labels = outputs.labels.as_deref().unwrap_or_default();
        match &outputs.predictions {
            Some(predictions) => {
                self.top_1_matched += match_top_k(predictions, labels, 1);
                self.top_k_matched += match_top_k(predictions, labels, self.top_k);
                self.num_samples += predictions.rows().min(labels.len());
            }
            None => self.num_samples += labels.len(),
        }

        let mut report = None;
        if (step + 1) % self.calculate_batches == 0 {
            let elapsed = self.timer.elapsed().as_secs_f64();
            let samples = self.num_samples as f64;
            let accuracy = |matched: usize| if samples > 0.0 { matched as f64 / samples } else { 0.0 };
            let loss = self.loss_key.as_deref().and_then(|key| outputs.mean(key));

            let r = MetricReport {
                desc: self.desc.clone(),
                epoch,
                iter: step + 1,
                loss,
                top_1: accuracy(self.top_1_matched),
                top_k: accuracy(self.top_k_matched),
                k: self.top_k,
                samples_per_sec: samples / elapsed.max(f64::EPSILON),
            };

            if let Some(summary) = summary.as_deref_mut() {
                if let (Some(key), Some(loss)) = (&self.loss_key, loss) {
                    summary.scalar(&format!("{}_{}", self.desc, key), loss, epoch, step);
                }
                summary.scalar(&format!("{}_throughput", self.desc), r.samples_per_sec, epoch, step);
                summary.scalar(&format!("{}_top_1", self.desc), r.top_1, epoch, step);
                summary.scalar(&format!("{}_top_{}", self.desc, self.top_k), r.top_k, epoch, step);
            }
            self.clear();
            report = Some(r);
        }

        if let Some(summary) = summary {
            if (step + 1) % self.save_summary_steps == 0 {
                summary.save()?;
            }
        }

        Ok(report)
    }
}
