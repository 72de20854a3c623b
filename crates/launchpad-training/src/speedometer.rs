//! Loss and throughput reporting for the BERT benchmark loop.
//!
//! The first `skip_iter_num` iterations warm the pipeline up and are not
//! timed; the average speed covers only the `iter_num` measured iterations.

use crate::job::JobOutput;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Emitted every `loss_print_every_n_iter` measured iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub train_step: u64,
    pub total_loss: f64,
    pub mlm_loss: f64,
    pub nsp_loss: f64,
    pub sec_per_batch: f64,
    pub sentences_per_sec: f64,
}

impl std::fmt::Display for StepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "iter {}, total_loss: {:.3}, mlm_loss: {:.3}, nsp_loss: {:.3}, speed: {:.3}(sec/batch), {:.3}(sentences/sec)",
            self.train_step,
            self.total_loss,
            self.mlm_loss,
            self.nsp_loss,
            self.sec_per_batch,
            self.sentences_per_sec
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputReport {
    pub iters: u64,
    pub duration_secs: f64,
    pub sentences_per_sec: f64,
}

impl std::fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "average speed: {:.3}(sentences/sec)", self.sentences_per_sec)
    }
}

#[derive(Debug)]
pub struct BertSpeedometer {
    total_batch_size: u64,
    skip_iter_num: u64,
    iter_num: u64,
    loss_print_every_n_iter: u64,
    started: Instant,
    watch: Option<Instant>,
    throughput: Option<ThroughputReport>,
}

impl BertSpeedometer {
    #[must_use]
    pub fn new(total_batch_size: u64, skip_iter_num: u64, iter_num: u64, loss_print_every_n_iter: u64) -> Self {
        let now = Instant::now();
        Self {
            total_batch_size,
            skip_iter_num,
            iter_num,
            loss_print_every_n_iter: loss_print_every_n_iter.max(1),
            started: now,
            watch: (skip_iter_num == 0).then_some(now),
            throughput: None,
        }
    }

    #[must_use]
    pub fn total_steps(&self) -> u64 {
        self.skip_iter_num + self.iter_num
    }

    /// Feed the outputs of global step `step` (0-based, skipped iterations included).
    pub fn on_step(&mut self, step: u64, outputs: &JobOutput) -> Option<StepReport> {
        let mut report = None;

        if let Some(train_step) = step.checked_sub(self.skip_iter_num) {
            if (train_step + 1) % self.loss_print_every_n_iter == 0 {
                let sec_per_batch = self.started.elapsed().as_secs_f64() / (step + 1) as f64;
                report = Some(StepReport {
                    train_step,
                    total_loss: outputs.mean("total_loss").unwrap_or(f64::NAN),
                    mlm_loss: outputs.mean("mlm_loss").unwrap_or(f64::NAN),
                    nsp_loss: outputs.mean("nsp_loss").unwrap_or(f64::NAN),
                    sec_per_batch,
                    sentences_per_sec: self.total_batch_size as f64 / sec_per_batch.max(f64::EPSILON),
                });
            }
        }

        if self.skip_iter_num > 0 && step + 1 == self.skip_iter_num {
            self.watch = Some(Instant::now());
        }

        if self.iter_num > 0 && step + 1 == self.total_steps() {
            let duration_secs = self.watch.map_or(0.0, |w| w.elapsed().as_secs_f64());
            self.throughput = Some(ThroughputReport {
                iters: self.iter_num,
                duration_secs,
                sentences_per_sec: (self.total_batch_size * self.iter_num) as f64
                    / duration_secs.max(f64::EPSILON),
            });
        }

        report
    }

    /// Average throughput over the measured iterations, once they all ran.
    #[must_use]
    pub fn finish(&self) -> Option<ThroughputReport> {
        self.throughput.clone()
    }
}
