//! Job table and lifecycle transitions.
//!
//! [`JobTable`] holds every job, the dispatch queue and the set of jobs that
//! occupy an execution slot. The orchestrator keeps it behind a single lock;
//! every method here is synchronous so a critical section can never span an
//! await.

use crate::error::{OrchestrationError, Result};
use crate::progress::{EventHub, JobEvent};
use crate::queue::{JobQueue, QueueMetrics};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tuneforge_training::{
    append_checkpoint, Checkpoint, FineTuningConfig, LogLevel, MetricPoint, ProgressUpdate, TrainingFailure,
    TrainingJob, TrainingJobId, TrainingLog, TrainingStatus,
};

/// Metric names with dedicated slots in `TrainingMetrics`.
pub const LOSS: &str = "loss";
pub const LEARNING_RATE: &str = "learning_rate";
pub const VALIDATION_LOSS: &str = "validation_loss";

#[derive(Debug)]
struct JobEntry {
    job: TrainingJob,
    config: Arc<FineTuningConfig>,
    token: CancellationToken,
}

/// A job promoted out of the queue, ready to execute.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub job_id: TrainingJobId,
    pub config: Arc<FineTuningConfig>,
    pub token: CancellationToken,
}

/// What `cancel` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued and is now `cancelled`.
    Dequeued,
    /// The job holds a slot; it stops at its next step boundary.
    Signalled,
}

#[derive(Debug)]
pub struct JobTable {
    jobs: HashMap<TrainingJobId, JobEntry>,
    /// Submission order.
    order: Vec<TrainingJobId>,
    queue: JobQueue,
    /// Jobs holding an execution slot.
    active: HashSet<TrainingJobId>,
    completed: usize,
    failed: usize,
    cancelled: usize,
    events: EventHub,
}

impl JobTable {
    #[must_use]
    pub fn new(events: EventHub) -> Self {
        Self {
            jobs: HashMap::new(),
            order: Vec::new(),
            queue: JobQueue::new(),
            active: HashSet::new(),
            completed: 0,
            failed: 0,
            cancelled: 0,
            events,
        }
    }

    /// Registers a new `pending` job and queues it.
    ///
    /// # Returns
    /// Returns a snapshot of the job as submitted.
    pub fn submit(&mut self, config: Arc<FineTuningConfig>) -> TrainingJob {
        let job = TrainingJob::new(&config);
        let job_id = job.id.clone();
        let submitted = job.clone();

        let name = config.name.clone();

        self.jobs.insert(job_id.clone(), JobEntry { job, config, token: CancellationToken::new() });
        self.order.push(job_id.clone());
        self.queue.enqueue(job_id.clone());
        self.events.emit(JobEvent::Queued { job_id: job_id.clone(), name });
        self.log(&job_id, LogLevel::Info, "Training job queued", None);

        self.jobs.get(&job_id).map_or(submitted, |e| e.job.clone())
    }

    #[must_use]
    pub fn get(&self, job_id: &TrainingJobId) -> Option<&TrainingJob> {
        self.jobs.get(job_id).map(|e| &e.job)
    }

    /// Every job in submission order.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<TrainingJob> {
        self.order.iter().filter_map(|id| self.jobs.get(id)).map(|e| e.job.clone()).collect()
    }

    #[must_use]
    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            pending: self.queue.len(),
            running: self.active.len(),
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
        }
    }

    /// The config a job was submitted with.
    #[must_use]
    pub fn config(&self, job_id: &TrainingJobId) -> Option<&Arc<FineTuningConfig>> {
        self.jobs.get(job_id).map(|e| &e.config)
    }

    /// Whether cancellation was requested for a job that holds a slot.
    #[must_use]
    pub fn cancel_requested(&self, job_id: &TrainingJobId) -> bool {
        self.jobs.get(job_id).is_some_and(|e| e.token.is_cancelled())
    }

    fn entry_mut(&mut self, job_id: &TrainingJobId) -> Result<&mut JobEntry> {
        self.jobs.get_mut(job_id).ok_or_else(|| OrchestrationError::JobNotFound(job_id.clone()))
    }

    /// Moves a job to `to` if the state machine allows it.
    ///
    /// # Returns
    /// Returns the previous state.
    pub fn transition(&mut self, job_id: &TrainingJobId, to: TrainingStatus) -> Result<TrainingStatus> {
        let entry = self.entry_mut(job_id)?;
        let from = entry.job.status;

        if !from.can_transition_to(to) {
            error!(job_id = %job_id, from = ?from, to = ?to, "Invalid state transition");
            return Err(OrchestrationError::InvalidTransition { job_id: job_id.clone(), from, to });
        }
        debug!(job_id = %job_id, from = ?from, to = ?to, "State transition");

        let now = Utc::now();
        entry.job.status = to;
        if to == TrainingStatus::Validating {
            entry.job.started_at = Some(now);
        }
        if to.is_terminal() {
            entry.job.completed_at = Some(now);
        }
        match to {
            TrainingStatus::Completed => self.completed += 1,
            TrainingStatus::Failed => self.failed += 1,
            TrainingStatus::Cancelled => self.cancelled += 1,
            _ => {}
        }

        self.events.emit(JobEvent::StatusChanged { job_id: job_id.clone(), from, to });
        Ok(from)
    }

    /// Promotes queued jobs in FIFO order while fewer than `capacity` hold a slot.
    ///
    /// Promoted jobs are moved to `validating` before the lock is released, so
    /// no snapshot ever shows a slot-holding job as `pending`.
    pub fn take_dispatchable(&mut self, capacity: usize) -> Vec<Dispatch> {
        let mut ready = Vec::new();
        while self.active.len() < capacity {
            let Some(job_id) = self.queue.dequeue() else { break };

            let Some(entry) = self.jobs.get(&job_id) else {
                warn!(job_id = %job_id, "Queued job missing from table");
                continue;
            };
            if entry.job.status != TrainingStatus::Pending {
                continue;
            }
            let dispatch =
                Dispatch { job_id: job_id.clone(), config: Arc::clone(&entry.config), token: entry.token.clone() };

            if self.transition(&job_id, TrainingStatus::Validating).is_err() {
                continue;
            }
            self.active.insert(job_id.clone());
            info!(job_id = %job_id, running = self.active.len(), capacity, "Dispatched training job");
            ready.push(dispatch);
        }
        ready
    }

    /// Frees the slot held by a job. Safe to call more than once.
    pub fn release(&mut self, job_id: &TrainingJobId) -> bool {
        let released = self.active.remove(job_id);
        if released {
            debug!(job_id = %job_id, running = self.active.len(), "Released execution slot");
        }
        released
    }

    /// Cancels a job: queued jobs are finished immediately, running jobs are signalled.
    pub fn cancel(&mut self, job_id: &TrainingJobId) -> Result<CancelOutcome> {
        let (status, token) = {
            let entry = self.entry_mut(job_id)?;
            (entry.job.status, entry.token.clone())
        };

        if status.is_terminal() {
            warn!(job_id = %job_id, status = %status, "Cannot cancel finished job");
            return Err(OrchestrationError::NotCancellable { job_id: job_id.clone(), status });
        }

        if status == TrainingStatus::Pending {
            self.queue.remove(job_id);
            self.transition(job_id, TrainingStatus::Cancelled)?;
            self.log(job_id, LogLevel::Info, "Training job cancelled before it started", None);
            return Ok(CancelOutcome::Dequeued);
        }

        token.cancel();
        self.log(job_id, LogLevel::Info, "Cancellation requested", None);
        Ok(CancelOutcome::Signalled)
    }

    /// Appends a log entry, mirrored to `tracing`.
    ///
    /// Entries below the job's configured level are traced but not stored.
    pub fn log(&mut self, job_id: &TrainingJobId, level: LogLevel, message: impl Into<String>, metadata: Option<Value>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(job_id = %job_id, "{message}"),
            LogLevel::Info => info!(job_id = %job_id, "{message}"),
            LogLevel::Warning => warn!(job_id = %job_id, "{message}"),
            LogLevel::Error => error!(job_id = %job_id, "{message}"),
        }

        let Some(entry) = self.jobs.get_mut(job_id) else { return };
        if level < entry.config.training_options.logging.level {
            return;
        }
        let log = TrainingLog { timestamp: Utc::now(), level, message, metadata };
        entry.job.push_log(log.clone());
        self.events.emit(JobEvent::Log { job_id: job_id.clone(), log });
    }

    pub fn apply_progress(&mut self, job_id: &TrainingJobId, update: &ProgressUpdate) -> Result<()> {
        let entry = self.entry_mut(job_id)?;
        entry.job.apply_progress(update, Utc::now());
        let progress = entry.job.progress.clone();
        self.events.emit(JobEvent::Progress { job_id: job_id.clone(), progress });
        Ok(())
    }

    /// Records a metric point. `loss`, `learning_rate` and `validation_loss`
    /// have dedicated histories; any other name is a custom metric.
    pub fn record_metric(&mut self, job_id: &TrainingJobId, name: &str, point: MetricPoint) -> Result<()> {
        let metrics = &mut self.entry_mut(job_id)?.job.metrics;
        match name {
            LOSS => metrics.loss.record(point.clone()),
            LEARNING_RATE => metrics.learning_rate.record(point.clone()),
            VALIDATION_LOSS => metrics.record_validation_loss(point.clone()),
            other => metrics.record_custom(other, point.clone()),
        }
        self.events.emit(JobEvent::Metric { job_id: job_id.clone(), name: name.to_string(), point });
        Ok(())
    }

    /// Appends a checkpoint, keeping exactly one marked best.
    ///
    /// # Returns
    /// Returns `true` if the new checkpoint is the best so far.
    pub fn add_checkpoint(&mut self, job_id: &TrainingJobId, checkpoint: Checkpoint) -> Result<bool> {
        let entry = self.entry_mut(job_id)?;
        let is_best = append_checkpoint(&mut entry.job.checkpoints, checkpoint);
        if let Some(latest) = entry.job.checkpoints.last().cloned() {
            self.events.emit(JobEvent::Checkpoint { job_id: job_id.clone(), checkpoint: latest });
        }
        Ok(is_best)
    }

    pub fn set_evaluation(&mut self, job_id: &TrainingJobId, evaluation: BTreeMap<String, f64>) -> Result<()> {
        self.entry_mut(job_id)?.job.evaluation = evaluation;
        Ok(())
    }

    /// Records the failure and moves the job to `failed`.
    pub fn fail(&mut self, job_id: &TrainingJobId, failure: TrainingFailure) -> Result<()> {
        let message = format!("Training failed: {}", failure.message);
        self.entry_mut(job_id)?.job.error = Some(failure);
        self.transition(job_id, TrainingStatus::Failed)?;
        self.log(job_id, LogLevel::Error, message, None);
        Ok(())
    }
}
