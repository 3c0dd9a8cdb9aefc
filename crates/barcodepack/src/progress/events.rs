use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle notifications for a packaging job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PackageEvent {
    ChunkCompleted {
        job_id: String,
        chunk_index: u64,
        failures: u64,
        done: u64,
        total: u64,
    },
    Finalized {
        job_id: String,
        archive_path: PathBuf,
        cached: bool,
        finished_at: DateTime<Utc>,
    },
    FinalizeSkipped {
        job_id: String,
        reason: String,
    },
    JobFailed {
        job_id: String,
        error: String,
    },
}

impl PackageEvent {
    pub fn job_id(&self) -> &str {
        match self {
            PackageEvent::ChunkCompleted { job_id, .. }
            | PackageEvent::Finalized { job_id, .. }
            | PackageEvent::FinalizeSkipped { job_id, .. }
            | PackageEvent::JobFailed { job_id, .. } => job_id,
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: PackageEvent);
}

/// No-op reporter for unit tests and headless runs.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: PackageEvent) {}
}

/// Publishes events on a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<PackageEvent>>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PackageEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastProgress {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: PackageEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_delivers_to_subscribers() {
        let progress = BroadcastProgress::new(8);
        let mut rx = progress.subscribe();

        progress.report(PackageEvent::FinalizeSkipped {
            job_id: "j1".to_string(),
            reason: "already running".to_string(),
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.job_id(), "j1");
    }

    #[test]
    fn test_report_without_subscribers() {
        let progress = BroadcastProgress::default();
        progress.report(PackageEvent::JobFailed {
            job_id: "j1".to_string(),
            error: "boom".to_string(),
        });
    }

    #[test]
    fn test_event_serialization() {
        let event = PackageEvent::ChunkCompleted {
            job_id: "j1".to_string(),
            chunk_index: 2,
            failures: 0,
            done: 3,
            total: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chunk_completed");
        assert_eq!(json["chunk_index"], 2);
    }
}
