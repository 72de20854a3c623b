use crate::job::TrainingJobId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { job_id: TrainingJobId },
    Message { job_id: TrainingJobId, message: String },
    Step { job_id: TrainingJobId, step: u64, total: Option<u64> },
    Snapshot { job_id: TrainingJobId, path: PathBuf },
    Finished { job_id: TrainingJobId },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Prints loss and throughput lines as they arrive. Step ticks are left out
/// since the speedometer and metric lines already cover them.
#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Message { message, .. } => println!("{message}"),
            ProgressEvent::Snapshot { path, .. } => println!("Saving model to {}.", path.display()),
            ProgressEvent::Started { .. } | ProgressEvent::Step { .. } | ProgressEvent::Finished { .. } => {}
        }
    }
}

/// Routes every event to `tracing` instead of stdout.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => tracing::info!(job_id = %job_id, "run started"),
            ProgressEvent::Message { job_id, message } => tracing::info!(job_id = %job_id, "{message}"),
            ProgressEvent::Step { job_id, step, total } => {
                tracing::debug!(job_id = %job_id, step, total, "step");
            }
            ProgressEvent::Snapshot { job_id, path } => {
                tracing::info!(job_id = %job_id, path = %path.display(), "snapshot saved");
            }
            ProgressEvent::Finished { job_id } => tracing::info!(job_id = %job_id, "run finished"),
        }
    }
}

/// Collects events in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Message { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingProgressSink::default();
        let job_id = TrainingJobId::new();
        sink.on_event(ProgressEvent::Started { job_id: job_id.clone() });
        sink.on_event(ProgressEvent::Message { job_id: job_id.clone(), message: "Init model on demand.".to_string() });
        sink.on_event(ProgressEvent::Step { job_id: job_id.clone(), step: 0, total: Some(1) });
        sink.on_event(ProgressEvent::Finished { job_id });

        assert_eq!(sink.events().len(), 4);
        assert_eq!(sink.messages(), vec!["Init model on demand.".to_string()]);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ProgressEvent::Snapshot { job_id: TrainingJobId("job-1".to_string()), path: PathBuf::from("m/snapshot_1") };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["job_id"], "job-1");

        // Tracing sink accepts every variant without a subscriber installed.
        TracingProgressSink.on_event(event);
    }
}
