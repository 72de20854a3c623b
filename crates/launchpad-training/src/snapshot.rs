//! Model snapshots: restore or initialize on open, then save named copies.

use crate::backend::ExecutionBackend;
use crate::error::{TrainingError, TrainingResult};
use crate::job::TrainingJobId;
use crate::layout::RunLayout;
use crate::progress::{ProgressEvent, ProgressSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const INITIAL_MODEL_NAME: &str = "initial_model";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

pub struct Snapshot<'a> {
    backend: &'a dyn ExecutionBackend,
    layout: RunLayout,
    job_id: TrainingJobId,
    sink: &'a dyn ProgressSink,
    entries: Vec<SnapshotEntry>,
}

impl<'a> Snapshot<'a> {
    /// Restore from `model_load_dir` when given, otherwise initialize the
    /// model and, if `save_initial` is set, save it as `snapshot_initial_model`.
    pub async fn open(
        backend: &'a dyn ExecutionBackend,
        layout: RunLayout,
        model_load_dir: Option<&Path>,
        save_initial: bool,
        job_id: TrainingJobId,
        sink: &'a dyn ProgressSink,
    ) -> TrainingResult<Self> {
        let restored = match model_load_dir {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(TrainingError::Snapshot(format!(
                        "model load directory does not exist: {}",
                        dir.display()
                    )));
                }
                sink.on_event(ProgressEvent::Message {
                    job_id: job_id.clone(),
                    message: format!("Restoring model from {}.", dir.display()),
                });
                backend.load_model(dir).await?;
                true
            }
            None => {
                backend.init_model().await?;
                false
            }
        };

        let mut snapshot = Self { backend, layout, job_id, sink, entries: Vec::new() };

        if !restored {
            if save_initial {
                snapshot.save(INITIAL_MODEL_NAME).await?;
            }
            snapshot.message("Init model on demand.");
        }

        Ok(snapshot)
    }

    #[must_use]
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Save to `<model_save_dir>/snapshot_<name>`.
    pub async fn save(&mut self, name: &str) -> TrainingResult<PathBuf> {
        let dir = self.layout.snapshot_dir(name);
        self.save_into(name, dir).await
    }

    /// Save to `<model_save_dir>/last_snapshot`.
    pub async fn save_last(&mut self) -> TrainingResult<PathBuf> {
        let dir = self.layout.last_snapshot_dir();
        self.save_into(crate::layout::LAST_SNAPSHOT_DIR, dir).await
    }

    async fn save_into(&mut self, name: &str, dir: PathBuf) -> TrainingResult<PathBuf> {
        std::fs::create_dir_all(&dir)?;
        self.sink.on_event(ProgressEvent::Snapshot { job_id: self.job_id.clone(), path: dir.clone() });
        self.backend.save_model(&dir).await?;

        self.entries.push(SnapshotEntry { name: name.to_string(), path: dir.clone(), created_at: Utc::now() });
        self.write_manifest()?;
        tracing::debug!(job_id = %self.job_id, snapshot = name, "snapshot recorded");
        Ok(dir)
    }

    fn write_manifest(&self) -> TrainingResult<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(self.layout.manifest_path(), json)?;
        Ok(())
    }

    fn message(&self, message: &str) {
        self.sink.on_event(ProgressEvent::Message { job_id: self.job_id.clone(), message: message.to_string() });
    }
}

/// Read the snapshot manifest of a finished run.
pub fn read_manifest(layout: &RunLayout) -> TrainingResult<Vec<SnapshotEntry>> {
    let bytes = std::fs::read(layout.manifest_path())?;
    Ok(serde_json::from_slice(&bytes)?)
}
