//! Tuneforge Orchestrator
//!
//! Runs fine-tuning jobs with bounded concurrency:
//! - A strict FIFO queue with a cap on jobs holding an execution slot
//! - Lifecycle transitions checked against the job state machine
//! - Cooperative cancellation at step boundaries
//! - Progress, metrics, checkpoints and logs published as [`JobEvent`]s
//!
//! Jobs live in an in-memory table; nothing survives a process restart.

mod error;
pub mod executor;
pub mod lifecycle;
pub mod progress;
pub mod queue;

pub use error::{OrchestrationError, Result};
pub use executor::ExecutionOutcome;
pub use lifecycle::{CancelOutcome, JobTable};
pub use progress::{EventHub, JobEvent};
pub use queue::{JobQueue, QueueMetrics};

use lifecycle::Dispatch;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tuneforge_training::{
    CheckpointStore, CostEstimation, CostModel, DatasetFormat, DatasetValidation, FineTuningConfig,
    InMemoryCheckpointStore, LogLevel, Record, SimulatedTrainer, SimulatedTrainerConfig, Trainer, TrainingError,
    TrainingFailure, TrainingJob, TrainingJobId, TrainingStatus, ValidationLimits,
};

/// Orchestrator knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Jobs allowed to hold an execution slot at once.
    pub max_concurrent_jobs: usize,
    /// Events buffered per subscriber before it starts lagging.
    pub event_buffer: usize,
    pub validation: ValidationLimits,
    pub cost_model: CostModel,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            event_buffer: 1024,
            validation: ValidationLimits::default(),
            cost_model: CostModel::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Rejects settings under which no job could ever be dispatched or observed.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(OrchestrationError::InvalidConfig("max_concurrent_jobs must be >= 1".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(OrchestrationError::InvalidConfig("event_buffer must be >= 1".to_string()));
        }
        Ok(())
    }
}

pub(crate) struct Shared {
    pub(crate) table: RwLock<JobTable>,
    pub(crate) events: EventHub,
    pub(crate) trainer: Arc<dyn Trainer>,
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) config: OrchestratorConfig,
}

/// Entry point for submitting, observing and cancelling training jobs.
///
/// Cheap to clone; clones share the same job table.
#[derive(Clone)]
pub struct JobOrchestrator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("config", &self.shared.config)
            .field("trainer", &self.shared.trainer.id())
            .field("store", &self.shared.store.id())
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    /// Fails with [`OrchestrationError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: OrchestratorConfig,
        trainer: Arc<dyn Trainer>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        config.validate()?;
        let events = EventHub::new(config.event_buffer);
        let table = RwLock::new(JobTable::new(events.clone()));
        Ok(Self { shared: Arc::new(Shared { table, events, trainer, store, config }) })
    }

    /// An orchestrator backed by the simulated trainer and in-memory checkpoints.
    pub fn simulated(config: OrchestratorConfig, trainer: SimulatedTrainerConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(SimulatedTrainer::new(trainer)),
            Arc::new(InMemoryCheckpointStore::default()),
        )
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    /// Parses and validates an upload off the async executor.
    ///
    /// # Returns
    /// Returns the parsed records with the verdict, or the parse error.
    pub async fn validate_dataset(
        &self,
        bytes: Vec<u8>,
        format: DatasetFormat,
    ) -> Result<(Vec<Record>, DatasetValidation)> {
        let limits = self.shared.config.validation.clone();
        Ok(tuneforge_training::validate_dataset(bytes, format, limits).await?)
    }

    #[must_use]
    pub fn estimate_cost(&self, config: &FineTuningConfig) -> CostEstimation {
        self.shared.config.cost_model.estimate(config)
    }

    /// Submits a job and tries to dispatch it.
    ///
    /// The config is repriced with this orchestrator's cost model. Its dataset
    /// verdict is checked once the job is dispatched, in `validating`.
    ///
    /// # Returns
    /// Returns the job as submitted, always `pending`.
    pub async fn start_training(&self, mut config: FineTuningConfig) -> Result<TrainingJob> {
        config.validate()?;
        config.reprice(&self.shared.config.cost_model);
        let job = {
            let mut table = self.shared.table.write().await;
            table.submit(Arc::new(config))
        };
        info!(job_id = %job.id, config_id = %job.config_id, "Training job submitted");
        self.dispatch().await;
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &TrainingJobId) -> Option<TrainingJob> {
        self.shared.table.read().await.get(job_id).cloned()
    }

    /// The config a job runs against, as priced at submission.
    pub async fn get_config(&self, job_id: &TrainingJobId) -> Option<Arc<FineTuningConfig>> {
        self.shared.table.read().await.config(job_id).cloned()
    }

    /// Every job in submission order.
    pub async fn get_all_jobs(&self) -> Vec<TrainingJob> {
        self.shared.table.read().await.snapshot_all()
    }

    /// Cancels a job.
    ///
    /// A queued job becomes `cancelled` immediately. A running job stops at
    /// its next step boundary and ends `cancelled`, even when the request
    /// lands during final evaluation; repeating the request while it winds
    /// down is a no-op. Finished jobs return [`OrchestrationError::NotCancellable`].
    pub async fn cancel_job(&self, job_id: &TrainingJobId) -> Result<()> {
        let outcome = {
            let mut table = self.shared.table.write().await;
            table.cancel(job_id)
        };
        self.dispatch().await;
        let outcome = outcome?;
        info!(job_id = %job_id, outcome = ?outcome, "Cancellation accepted");
        Ok(())
    }

    /// Cancels every job that has not finished.
    ///
    /// # Returns
    /// Returns how many jobs were cancelled or signalled.
    pub async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        {
            let mut table = self.shared.table.write().await;
            let ids: Vec<_> =
                table.snapshot_all().into_iter().filter(|job| !job.status.is_terminal()).map(|job| job.id).collect();
            for job_id in ids {
                if table.cancel(&job_id).is_ok() {
                    cancelled += 1;
                }
            }
        }
        self.dispatch().await;
        cancelled
    }

    /// Subscribes to job events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    pub async fn metrics(&self) -> QueueMetrics {
        self.shared.table.read().await.metrics()
    }

    /// Waits until a job reaches a terminal state.
    ///
    /// # Returns
    /// Returns the final snapshot, or `None` for an unknown job.
    pub async fn wait_for(&self, job_id: &TrainingJobId) -> Option<TrainingJob> {
        let mut events = self.subscribe();
        loop {
            let job = self.get_job(job_id).await?;
            if job.status.is_terminal() {
                return Some(job);
            }
            loop {
                match events.recv().await {
                    Ok(JobEvent::StatusChanged { job_id: changed, to, .. })
                        if &changed == job_id && to.is_terminal() =>
                    {
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => return self.get_job(job_id).await,
                }
            }
        }
    }

    /// Promotes queued jobs into free slots and starts them.
    async fn dispatch(&self) {
        let ready = {
            let mut table = self.shared.table.write().await;
            table.take_dispatchable(self.shared.config.max_concurrent_jobs)
        };
        for dispatch in ready {
            self.spawn_job(dispatch);
        }
    }

    /// Runs the job on its own task and supervises it from another, so a
    /// panicking trainer still ends in `failed` and frees its slot.
    fn spawn_job(&self, dispatch: Dispatch) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let job_id = dispatch.job_id.clone();
            let handle = tokio::spawn(executor::run_job(Arc::clone(&orchestrator.shared), dispatch));
            let result = handle.await;
            orchestrator.finish(&job_id, result).await;
            orchestrator.dispatch().await;
        });
    }

    async fn finish(&self, job_id: &TrainingJobId, result: std::result::Result<Result<ExecutionOutcome>, JoinError>) {
        let mut table = self.shared.table.write().await;

        // A cancel accepted after the loop's last token check still wins.
        let cancel_requested = table.cancel_requested(job_id);

        let recorded = match result {
            Ok(Ok(ExecutionOutcome::Completed)) if !cancel_requested => {
                table.transition(job_id, TrainingStatus::Completed).map(|_| {
                    table.log(job_id, LogLevel::Info, "Training completed successfully", None);
                })
            }
            Ok(Ok(ExecutionOutcome::Completed | ExecutionOutcome::Cancelled)
                | Err(OrchestrationError::Training(TrainingError::Cancelled))) => {
                table.transition(job_id, TrainingStatus::Cancelled).map(|_| {
                    table.log(job_id, LogLevel::Info, "Training job cancelled", None);
                })
            }
            Ok(Err(err)) => {
                error!(job_id = %job_id, error = %err, "Training job failed");
                table.fail(job_id, failure_for(&err))
            }
            Err(join_error) => {
                let details = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                error!(job_id = %job_id, details = %details, "Training task panicked");
                table.fail(job_id, TrainingFailure::panicked(details))
            }
        };

        if let Err(err) = recorded {
            warn!(job_id = %job_id, error = %err, "Could not record job outcome");
        }
        table.release(job_id);
    }
}

fn failure_for(err: &OrchestrationError) -> TrainingFailure {
    match err {
        OrchestrationError::Training(inner) => TrainingFailure::from(inner),
        other => TrainingFailure {
            code: "TRAINING_FAILED".to_string(),
            message: other.to_string(),
            details: format!("{other:?}"),
            recoverable: true,
            suggestions: vec!["Resubmit the job".to_string()],
        },
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "trainer panicked".to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use tuneforge_training::{
        BaseModel, Dataset, DatasetFormat, DatasetValidator, FineTuningConfig, Hyperparameters, InferencePricing,
        ModelPricing, ModelProvider, TrainingOptions, TrainingPricing,
    };

    pub(crate) fn config(records: usize) -> FineTuningConfig {
        let content: String = (0..records)
            .map(|i| format!("{{\"prompt\":\"question {i}\",\"completion\":\"answer {i}\"}}\n"))
            .collect();
        let (parsed, validation) =
            DatasetValidator::default().validate_bytes(content.as_bytes(), DatasetFormat::Jsonl).unwrap();
        let dataset = Dataset::new("unit", DatasetFormat::Jsonl, content.len() as u64, &parsed, validation);
        let base_model = BaseModel {
            id: "base-small".to_string(),
            name: "Base Small".to_string(),
            provider: ModelProvider::Custom,
            context_window: None,
            pricing: ModelPricing {
                training: TrainingPricing { per_token: 0.000_008, per_epoch: 0.0, minimum: 0.0 },
                inference: InferencePricing::default(),
            },
        };
        FineTuningConfig::new(
            "unit",
            base_model,
            dataset,
            Hyperparameters { epochs: 2, ..Hyperparameters::default() },
            TrainingOptions::default(),
        )
        .unwrap()
    }
}
