use crate::checkpoint::Checkpoint;
use crate::config::FineTuningConfig;
use crate::error::TrainingError;
use crate::metrics::TrainingMetrics;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use uuid::Uuid;

/// Entries kept in a job's log before the oldest are dropped.
pub const MAX_JOB_LOGS: usize = 1000;

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(format!("job_{}", Uuid::new_v4().simple()))
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TrainingJobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    Pending,
    Validating,
    Training,
    Evaluating,
    Completed,
    Failed,
    Cancelled,
}

impl TrainingStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a job in this state may move to `to`.
    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (from, _) if from.is_terminal() => false,
            (_, Self::Failed | Self::Cancelled) => true,
            (Self::Pending, Self::Validating) => true,
            (Self::Validating, Self::Training) => true,
            (Self::Training, Self::Evaluating) => true,
            (Self::Evaluating, Self::Completed) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Training => "training",
            Self::Evaluating => "evaluating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub current_epoch: u32,
    pub total_epochs: u32,
    pub current_step: u64,
    pub total_steps: u64,
    /// 0 to 100, never decreasing for a job.
    pub percent_complete: f64,
    pub samples_processed: u64,
    pub total_samples: u64,
    pub tokens_processed: u64,
    pub total_tokens: u64,
}

impl TrainingProgress {
    #[must_use]
    pub fn for_config(config: &FineTuningConfig) -> Self {
        let epochs = u64::from(config.hyperparameters.epochs);
        let records = config.dataset.record_count as u64;
        let tokens = (config.dataset.record_count as f64 * config.dataset.average_length()) as u64;
        Self {
            total_epochs: config.hyperparameters.epochs,
            total_samples: records * epochs,
            total_tokens: tokens * epochs,
            ..Self::default()
        }
    }

    /// Apply a partial update. Fields left `None` are untouched and
    /// `percent_complete` only moves forward.
    pub fn merge(&mut self, update: &ProgressUpdate) {
        if let Some(v) = update.current_epoch {
            self.current_epoch = v;
        }
        if let Some(v) = update.total_epochs {
            self.total_epochs = v;
        }
        if let Some(v) = update.current_step {
            self.current_step = v;
        }
        if let Some(v) = update.total_steps {
            self.total_steps = v;
        }
        if let Some(v) = update.samples_processed {
            self.samples_processed = v;
        }
        if let Some(v) = update.tokens_processed {
            self.tokens_processed = v;
        }
        if let Some(v) = update.percent_complete {
            self.percent_complete = self.percent_complete.max(v.clamp(0.0, 100.0));
        }
    }
}

/// A partial [`TrainingProgress`] update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub current_epoch: Option<u32>,
    pub total_epochs: Option<u32>,
    pub current_step: Option<u64>,
    pub total_steps: Option<u64>,
    pub percent_complete: Option<f64>,
    pub samples_processed: Option<u64>,
    pub tokens_processed: Option<u64>,
}

impl ProgressUpdate {
    #[must_use]
    pub fn percent(percent: f64) -> Self {
        Self { percent_complete: Some(percent), ..Self::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingFailure {
    pub code: String,
    pub message: String,
    pub details: String,
    /// Informational only; the orchestrator never retries.
    pub recoverable: bool,
    pub suggestions: Vec<String>,
}

impl TrainingFailure {
    /// A failure for a trainer task that panicked.
    #[must_use]
    pub fn panicked(details: impl Into<String>) -> Self {
        Self {
            code: "TRAINING_PANICKED".to_string(),
            message: "Training task terminated unexpectedly".to_string(),
            details: details.into(),
            recoverable: true,
            suggestions: vec![
                "Inspect the trainer logs for the failing step".to_string(),
                "Resubmit the job once the trainer issue is fixed".to_string(),
            ],
        }
    }
}

impl From<&TrainingError> for TrainingFailure {
    fn from(error: &TrainingError) -> Self {
        let (code, recoverable, suggestions): (&str, bool, Vec<&str>) = match error {
            TrainingError::Dataset(_) | TrainingError::DatasetRejected(_) => (
                "DATASET_INVALID",
                false,
                vec!["Check dataset quality and format", "Re-upload the dataset after fixing errors"],
            ),
            TrainingError::InvalidConfig(_) => (
                "INVALID_CONFIG",
                false,
                vec!["Verify hyperparameter settings", "Try reducing batch size or learning rate"],
            ),
            TrainingError::Checkpoint(_) | TrainingError::Io(_) => (
                "CHECKPOINT_FAILED",
                true,
                vec!["Ensure checkpoint storage is reachable and has free space"],
            ),
            TrainingError::Trainer(_) => (
                "TRAINER_FAILED",
                true,
                vec![
                    "Ensure sufficient resources are available",
                    "Try reducing batch size or learning rate",
                ],
            ),
            TrainingError::Cancelled
            | TrainingError::Json(_)
            | TrainingError::Other(_) => (
                "TRAINING_FAILED",
                true,
                vec![
                    "Check dataset quality and format",
                    "Verify hyperparameter settings",
                    "Ensure sufficient resources are available",
                ],
            ),
        };

        Self {
            code: code.to_string(),
            message: error.to_string(),
            details: format!("{error:?}"),
            recoverable,
            suggestions: suggestions.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// One submitted fine-tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: TrainingJobId,
    pub config_id: String,
    pub status: TrainingStatus,
    pub progress: TrainingProgress,
    pub metrics: TrainingMetrics,
    pub checkpoints: Vec<Checkpoint>,
    pub logs: VecDeque<TrainingLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TrainingFailure>,
    /// Summary metrics from the final evaluation pass.
    #[serde(default)]
    pub evaluation: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Linear extrapolation from elapsed time and percent complete; a rough projection.
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl TrainingJob {
    #[must_use]
    pub fn new(config: &FineTuningConfig) -> Self {
        Self {
            id: TrainingJobId::new(),
            config_id: config.id.clone(),
            status: TrainingStatus::Pending,
            progress: TrainingProgress::for_config(config),
            metrics: TrainingMetrics::default(),
            checkpoints: Vec::new(),
            logs: VecDeque::new(),
            error: None,
            evaluation: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            estimated_completion: None,
        }
    }

    pub fn push_log(&mut self, log: TrainingLog) {
        if self.logs.len() == MAX_JOB_LOGS {
            self.logs.pop_front();
        }
        self.logs.push_back(log);
    }

    /// Merge a progress update and refresh `estimated_completion`.
    pub fn apply_progress(&mut self, update: &ProgressUpdate, now: DateTime<Utc>) {
        self.progress.merge(update);

        let percent = self.progress.percent_complete;
        if update.percent_complete.is_some() && percent > 0.0 {
            if let Some(started) = self.started_at {
                let elapsed = (now - started).num_milliseconds().max(0) as f64;
                let remaining = elapsed * (100.0 - percent) / percent;
                self.estimated_completion = Some(now + Duration::milliseconds(remaining as i64));
            }
        }
    }

    #[must_use]
    pub fn best_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.is_best)
    }
}
