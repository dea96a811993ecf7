//! Job dispatch queue.
//!
//! Strict FIFO: jobs are promoted in submission order, and a cancelled job is
//! removed without disturbing the order of the rest.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;
use tuneforge_training::TrainingJobId;

/// Pending jobs waiting for an execution slot.
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: VecDeque<TrainingJobId>,
}

impl JobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, job_id: TrainingJobId) {
        debug!(job_id = %job_id, position = self.pending.len(), "Enqueueing job");
        self.pending.push_back(job_id);
    }

    /// Takes the oldest pending job.
    pub fn dequeue(&mut self) -> Option<TrainingJobId> {
        self.pending.pop_front()
    }

    /// Removes a job wherever it sits in the queue.
    ///
    /// # Returns
    /// Returns `true` if the job was queued.
    pub fn remove(&mut self, job_id: &TrainingJobId) -> bool {
        match self.pending.iter().position(|id| id == job_id) {
            Some(idx) => {
                self.pending.remove(idx);
                debug!(job_id = %job_id, "Removed job from queue");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, job_id: &TrainingJobId) -> bool {
        self.pending.contains(job_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Queue metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Jobs waiting for a slot.
    pub pending: usize,
    /// Jobs holding a slot (validating, training or evaluating).
    pub running: usize,
    /// Jobs that finished successfully.
    pub completed: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Jobs that were cancelled.
    pub cancelled: usize,
}
