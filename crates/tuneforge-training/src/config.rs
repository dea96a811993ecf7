use crate::cost::{CostEstimation, CostModel};
use crate::dataset::Dataset;
use crate::error::{TrainingError, TrainingResult};
use crate::job::LogLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    Openai,
    Anthropic,
    Google,
    Meta,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingPricing {
    /// Price per training token, in the pricing currency.
    pub per_token: f64,
    #[serde(default)]
    pub per_epoch: f64,
    #[serde(default)]
    pub minimum: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InferencePricing {
    pub input: f64,
    pub output: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub training: TrainingPricing,
    #[serde(default)]
    pub inference: InferencePricing,
}

/// The model a job fine-tunes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseModel {
    pub id: String,
    pub name: String,
    pub provider: ModelProvider,
    #[serde(default)]
    pub context_window: Option<u32>,
    pub pricing: ModelPricing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimizer {
    Adam,
    Adamw,
    Sgd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheduler {
    Linear,
    Cosine,
    #[default]
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub batch_size: u32,
    pub epochs: u32,
    pub seed: u64,
    pub warmup_steps: u64,
    pub weight_decay: Option<f64>,
    pub optimizer: Option<Optimizer>,
    pub scheduler: Scheduler,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            batch_size: 8,
            epochs: 3,
            seed: 42,
            warmup_steps: 0,
            weight_decay: None,
            optimizer: None,
            scheduler: Scheduler::Constant,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidConfig("epochs must be >= 1".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidConfig("learning_rate must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig("batch_size must be >= 1".to_string()));
        }
        if let Some(decay) = self.weight_decay {
            if !decay.is_finite() || decay < 0.0 {
                return Err(TrainingError::InvalidConfig("weight_decay must be >= 0".to_string()));
            }
        }
        Ok(())
    }

    /// Learning rate at a 1-based global step out of `total_steps`.
    ///
    /// Warmup ramps linearly up to the base rate; the scheduler then decays
    /// over the remaining steps.
    #[must_use]
    pub fn learning_rate_at(&self, step: u64, total_steps: u64) -> f64 {
        let base = self.learning_rate;
        if self.warmup_steps > 0 && step <= self.warmup_steps {
            return base * step as f64 / self.warmup_steps as f64;
        }

        let decay_steps = total_steps.saturating_sub(self.warmup_steps).max(1);
        let progress =
            (step.saturating_sub(self.warmup_steps) as f64 / decay_steps as f64).clamp(0.0, 1.0);

        match self.scheduler {
            Scheduler::Constant => base,
            Scheduler::Linear => base * (1.0 - progress),
            Scheduler::Cosine => base * 0.5 * (1.0 + (PI * progress).cos()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Job log entries below this level are not kept.
    pub level: LogLevel,
    /// Attach the metric values as metadata on step-loss log entries.
    pub log_metrics: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::Info, log_metrics: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    /// Epochs between checkpoints.
    pub checkpoint_frequency: u32,
    /// Steps between step-loss entries in the job log.
    pub evaluation_frequency: u32,
    pub logging: LoggingConfig,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self { checkpoint_frequency: 1, evaluation_frequency: 100, logging: LoggingConfig::default() }
    }
}

impl TrainingOptions {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.checkpoint_frequency == 0 {
            return Err(TrainingError::InvalidConfig(
                "checkpoint_frequency must be >= 1".to_string(),
            ));
        }
        if self.evaluation_frequency == 0 {
            return Err(TrainingError::InvalidConfig(
                "evaluation_frequency must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the end of `epoch` (of `epochs`) takes a checkpoint. The last
    /// epoch always does.
    #[must_use]
    pub fn checkpoints_at(&self, epoch: u32, epochs: u32) -> bool {
        epoch == epochs || epoch % self.checkpoint_frequency.max(1) == 0
    }

    /// Checkpoints a run of `epochs` epochs writes.
    #[must_use]
    pub fn checkpoint_count(&self, epochs: u32) -> u32 {
        epochs.div_ceil(self.checkpoint_frequency.max(1))
    }
}

/// Everything needed to run one fine-tuning job.
///
/// The cost estimation is computed at construction with the default
/// [`CostModel`]; the orchestrator reprices with its own model on submission
/// and holds the config immutably from then on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuningConfig {
    pub id: String,
    pub name: String,
    pub base_model: BaseModel,
    pub dataset: Dataset,
    pub hyperparameters: Hyperparameters,
    pub training_options: TrainingOptions,
    pub cost_estimation: CostEstimation,
    pub created_at: DateTime<Utc>,
}

impl FineTuningConfig {
    pub fn new(
        name: impl Into<String>,
        base_model: BaseModel,
        dataset: Dataset,
        hyperparameters: Hyperparameters,
        training_options: TrainingOptions,
    ) -> TrainingResult<Self> {
        let mut config = Self {
            id: format!("ftc_{}", Uuid::new_v4().simple()),
            name: name.into(),
            base_model,
            dataset,
            hyperparameters,
            training_options,
            cost_estimation: CostEstimation::default(),
            created_at: Utc::now(),
        };
        config.validate()?;
        config.ensure_dataset_usable()?;
        config.reprice(&CostModel::default());
        Ok(config)
    }

    /// Recomputes `cost_estimation` with `model`.
    pub fn reprice(&mut self, model: &CostModel) {
        self.cost_estimation = model.estimate(self);
    }

    /// Checks the model, hyperparameters and options. The dataset verdict is
    /// checked separately by [`Self::ensure_dataset_usable`].
    pub fn validate(&self) -> TrainingResult<()> {
        if self.base_model.id.trim().is_empty() {
            return Err(TrainingError::InvalidConfig("base_model.id is required".to_string()));
        }
        let per_token = self.base_model.pricing.training.per_token;
        if !per_token.is_finite() || per_token < 0.0 {
            return Err(TrainingError::InvalidConfig(
                "base_model.pricing.training.per_token must be >= 0".to_string(),
            ));
        }
        self.hyperparameters.validate()?;
        self.training_options.validate()?;
        Ok(())
    }

    /// Fails with [`TrainingError::DatasetRejected`] unless the attached
    /// dataset passed validation and holds at least one record.
    pub fn ensure_dataset_usable(&self) -> TrainingResult<()> {
        if !self.dataset.validation.is_valid || self.dataset.record_count == 0 {
            return Err(TrainingError::DatasetRejected(format!(
                "dataset {} failed validation with {} error(s)",
                self.dataset.name,
                self.dataset.validation.errors.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cost::estimate_cost;
    use crate::dataset::DatasetFormat;
    use crate::validation::DatasetValidator;

    pub(crate) fn base_model() -> BaseModel {
        BaseModel {
            id: "gpt-small".to_string(),
            name: "GPT Small".to_string(),
            provider: ModelProvider::Openai,
            context_window: Some(4096),
            pricing: ModelPricing {
                training: TrainingPricing { per_token: 0.000_008, per_epoch: 0.0, minimum: 0.0 },
                inference: InferencePricing::default(),
            },
        }
    }

    pub(crate) fn dataset(records: usize) -> Dataset {
        let content: String = (0..records)
            .map(|i| format!("{{\"prompt\":\"question {i}\",\"completion\":\"answer {i}\"}}\n"))
            .collect();
        let (parsed, validation) = DatasetValidator::default()
            .validate_bytes(content.as_bytes(), DatasetFormat::Jsonl)
            .unwrap();
        Dataset::new("unit", DatasetFormat::Jsonl, content.len() as u64, &parsed, validation)
    }

    #[test]
    fn test_config_rejects_invalid_dataset() {
        let err = FineTuningConfig::new(
            "bad",
            base_model(),
            dataset(3),
            Hyperparameters::default(),
            TrainingOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrainingError::DatasetRejected(_)));
    }

    #[test]
    fn test_dataset_verdict_checked_apart_from_config_shape() {
        let mut config = FineTuningConfig::new(
            "later-invalid",
            base_model(),
            dataset(20),
            Hyperparameters::default(),
            TrainingOptions::default(),
        )
        .unwrap();
        config.dataset.validation.is_valid = false;

        assert!(config.validate().is_ok());
        assert!(matches!(config.ensure_dataset_usable(), Err(TrainingError::DatasetRejected(_))));
    }

    #[test]
    fn test_reprice_with_custom_model() {
        let mut config = FineTuningConfig::new(
            "reprice",
            base_model(),
            dataset(20),
            Hyperparameters::default(),
            TrainingOptions::default(),
        )
        .unwrap();
        let model = CostModel { inference_cost: 0.0, ..CostModel::default() };
        config.reprice(&model);
        assert_eq!(config.cost_estimation, model.estimate(&config));
        assert!(config.cost_estimation.inference_cost.abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_computes_cost_on_creation() {
        let config = FineTuningConfig::new(
            "ok",
            base_model(),
            dataset(20),
            Hyperparameters::default(),
            TrainingOptions::default(),
        )
        .unwrap();
        assert_eq!(config.cost_estimation, estimate_cost(&config));
        assert!(config.cost_estimation.total_cost > 0.0);
    }

    #[test]
    fn test_hyperparameters_validate() {
        let mut hp = Hyperparameters::default();
        assert!(hp.validate().is_ok());
        hp.epochs = 0;
        assert!(hp.validate().is_err());
        hp = Hyperparameters { learning_rate: f64::NAN, ..Hyperparameters::default() };
        assert!(hp.validate().is_err());
        hp = Hyperparameters { batch_size: 0, ..Hyperparameters::default() };
        assert!(hp.validate().is_err());
    }

    #[test]
    fn test_learning_rate_schedules() {
        let mut hp = Hyperparameters { learning_rate: 1.0, ..Hyperparameters::default() };
        assert!((hp.learning_rate_at(50, 100) - 1.0).abs() < 1e-12);

        hp.scheduler = Scheduler::Linear;
        assert!((hp.learning_rate_at(50, 100) - 0.5).abs() < 1e-12);
        assert!(hp.learning_rate_at(100, 100).abs() < 1e-12);

        hp.scheduler = Scheduler::Cosine;
        assert!((hp.learning_rate_at(50, 100) - 0.5).abs() < 1e-12);

        hp.warmup_steps = 10;
        hp.scheduler = Scheduler::Constant;
        assert!((hp.learning_rate_at(5, 100) - 0.5).abs() < 1e-12);
        assert!((hp.learning_rate_at(11, 100) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_checkpoint_schedule() {
        let options = TrainingOptions { checkpoint_frequency: 2, ..TrainingOptions::default() };
        let taken: Vec<u32> = (1..=5).filter(|&e| options.checkpoints_at(e, 5)).collect();
        assert_eq!(taken, vec![2, 4, 5]);
        assert_eq!(options.checkpoint_count(5), 3);
        assert_eq!(options.checkpoint_count(4), 2);
        assert_eq!(TrainingOptions::default().checkpoint_count(3), 3);
    }

    #[test]
    fn test_options_validate() {
        let options = TrainingOptions { evaluation_frequency: 0, ..TrainingOptions::default() };
        assert!(options.validate().is_err());
    }
}
