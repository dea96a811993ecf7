//! Job event broadcasting.
//!
//! Every observable change to a job is also published as a [`JobEvent`].
//! Events for one job are sent while the job table lock is held, so a
//! subscriber sees them in the order the changes were applied.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use tuneforge_training::{Checkpoint, MetricPoint, TrainingJobId, TrainingLog, TrainingProgress, TrainingStatus};

/// Observable job changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job was submitted and is waiting for a slot. `name` is the config name.
    Queued { job_id: TrainingJobId, name: String },
    /// A lifecycle transition.
    StatusChanged { job_id: TrainingJobId, from: TrainingStatus, to: TrainingStatus },
    Progress { job_id: TrainingJobId, progress: TrainingProgress },
    /// A metric point was recorded under `name`.
    Metric { job_id: TrainingJobId, name: String, point: MetricPoint },
    Checkpoint { job_id: TrainingJobId, checkpoint: Checkpoint },
    Log { job_id: TrainingJobId, log: TrainingLog },
}

impl JobEvent {
    #[must_use]
    pub fn job_id(&self) -> &TrainingJobId {
        match self {
            Self::Queued { job_id, .. }
            | Self::StatusChanged { job_id, .. }
            | Self::Progress { job_id, .. }
            | Self::Metric { job_id, .. }
            | Self::Checkpoint { job_id, .. }
            | Self::Log { job_id, .. } => job_id,
        }
    }
}

/// Broadcast hub for [`JobEvent`]s.
///
/// Slow subscribers lag and lose the oldest events; publishing never blocks.
#[derive(Debug, Clone)]
pub struct EventHub {
    broadcast_tx: broadcast::Sender<JobEvent>,
}

impl EventHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        Self { broadcast_tx }
    }

    /// Subscribes to job events.
    ///
    /// # Returns
    /// Returns a receiver that sees every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.broadcast_tx.subscribe()
    }

    pub fn emit(&self, event: JobEvent) {
        trace!(job_id = %event.job_id(), "Job event: {:?}", event);
        // No subscribers is not an error.
        let _ = self.broadcast_tx.send(event);
    }
}
