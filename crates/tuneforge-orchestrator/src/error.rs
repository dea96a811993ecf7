// Error types for job orchestration

use thiserror::Error;
use tuneforge_training::{TrainingError, TrainingJobId, TrainingStatus};

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// No job with this id is known
    #[error("Training job not found: {0}")]
    JobNotFound(TrainingJobId),

    /// The job already reached a terminal state
    #[error("Cannot cancel job {job_id} in {status} state")]
    NotCancellable {
        /// Job id
        job_id: TrainingJobId,
        /// State the job is in
        status: TrainingStatus,
    },

    /// A lifecycle transition the state machine does not allow
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        /// Job id
        job_id: TrainingJobId,
        /// Current state
        from: TrainingStatus,
        /// Requested state
        to: TrainingStatus,
    },

    /// Orchestrator settings that cannot run any job
    #[error("Invalid orchestrator config: {0}")]
    InvalidConfig(String),

    /// Training-layer error (config, dataset, trainer)
    #[error(transparent)]
    Training(#[from] TrainingError),

    /// Other error
    #[error("Orchestration error: {0}")]
    Other(String),
}
