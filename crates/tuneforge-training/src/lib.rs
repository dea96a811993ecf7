//! Tuneforge Training
//!
//! Data model and pure building blocks for fine-tuning runs:
//! - Parsing and validating datasets (`parse_dataset`, `DatasetValidator`)
//! - Describing a run (`FineTuningConfig`) and quoting it (`estimate_cost`)
//! - Job state, metrics and checkpoints (`TrainingJob`, `MetricHistory`, `Checkpoint`)
//! - Pluggable step execution (`Trainer`) and checkpoint persistence (`CheckpointStore`)

pub mod checkpoint;
pub mod config;
pub mod cost;
pub mod dataset;
pub mod error;
pub mod job;
pub mod layout;
pub mod metrics;
pub mod parser;
pub mod trainer;
pub mod validation;

pub use checkpoint::{
    append_checkpoint, Checkpoint, CheckpointDraft, CheckpointStore, FileCheckpointStore,
    InMemoryCheckpointStore, StoredCheckpoint,
};
pub use config::{
    BaseModel, FineTuningConfig, Hyperparameters, InferencePricing, LoggingConfig, ModelPricing,
    ModelProvider, Optimizer, Scheduler, TrainingOptions, TrainingPricing,
};
pub use cost::{estimate_cost, CostBreakdown, CostEstimation, CostModel};
pub use dataset::{clean_records, compute_dataset_id, records_to_jsonl, Dataset, DatasetFormat, DatasetId, Record};
pub use error::{DatasetError, TrainingError, TrainingResult};
pub use job::{
    LogLevel, ProgressUpdate, TrainingFailure, TrainingJob, TrainingJobId, TrainingLog, TrainingProgress,
    TrainingStatus, MAX_JOB_LOGS,
};
pub use layout::CheckpointLayout;
pub use metrics::{MetricGoal, MetricHistory, MetricPoint, TrainingMetrics, DEFAULT_HISTORY_CAPACITY};
pub use parser::{parse_dataset, parse_dataset_bytes};
pub use trainer::{EpochEvaluation, SimulatedTrainer, SimulatedTrainerConfig, StepContext, StepOutput, Trainer};
pub use validation::{
    calculate_statistics, DatasetStatistics, DatasetValidation, DatasetValidator, Severity, TokenDistribution,
    ValidationError, ValidationLimits, ValidationWarning,
};

/// Parse and validate a dataset off the async executor.
///
/// Large payloads are CPU-bound to scan, so the work runs on the blocking pool.
pub async fn validate_dataset(
    bytes: Vec<u8>,
    format: DatasetFormat,
    limits: ValidationLimits,
) -> TrainingResult<(Vec<Record>, DatasetValidation)> {
    let joined = tokio::task::spawn_blocking(move || {
        DatasetValidator::new(limits).validate_bytes(&bytes, format)
    })
    .await
    .map_err(|e| TrainingError::Other(anyhow::anyhow!("validation task failed: {e}")))?;
    Ok(joined?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_dataset_off_executor() {
        let content: String = (0..12)
            .map(|i| format!("{{\"prompt\":\"q{i}\",\"completion\":\"a{i}\"}}\n"))
            .collect();
        let (records, validation) =
            validate_dataset(content.into_bytes(), DatasetFormat::Jsonl, ValidationLimits::default())
                .await
                .unwrap();
        assert_eq!(records.len(), 12);
        assert!(validation.is_valid);
    }

    #[tokio::test]
    async fn test_validate_dataset_parse_error() {
        let err = validate_dataset(b"{bad".to_vec(), DatasetFormat::Jsonl, ValidationLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::Dataset(DatasetError::InvalidJsonLine { line: 1, .. })));
    }
}
