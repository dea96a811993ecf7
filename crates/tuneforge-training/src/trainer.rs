use crate::config::FineTuningConfig;
use crate::error::TrainingResult;
use crate::job::TrainingJobId;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Position of one training step within a job.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub job_id: &'a TrainingJobId,
    pub config: &'a FineTuningConfig,
    /// 1-based epoch.
    pub epoch: u32,
    /// 1-based step within the epoch.
    pub step: u32,
    pub steps_per_epoch: u32,
    /// 1-based step across the whole job.
    pub global_step: u64,
    pub total_steps: u64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub loss: f64,
}

/// What a trainer reports at the end of an epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochEvaluation {
    pub validation_loss: Option<f64>,
    pub metrics: BTreeMap<String, f64>,
}

/// The unit of work behind the execution loop.
///
/// The orchestrator owns sequencing, progress, checkpoints and cancellation;
/// a trainer only performs steps and evaluations.
#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    fn steps_per_epoch(&self, config: &FineTuningConfig) -> u32;

    /// Trainer-side setup, run once the dataset has been checked.
    async fn prepare(&self, job_id: &TrainingJobId, config: &FineTuningConfig) -> TrainingResult<()>;

    async fn train_step(&self, ctx: &StepContext<'_>) -> TrainingResult<StepOutput>;

    async fn evaluate_epoch(
        &self,
        job_id: &TrainingJobId,
        config: &FineTuningConfig,
        epoch: u32,
        loss: f64,
    ) -> TrainingResult<EpochEvaluation>;

    /// Final evaluation pass producing summary metrics.
    async fn evaluate(
        &self,
        job_id: &TrainingJobId,
        config: &FineTuningConfig,
        final_loss: f64,
    ) -> TrainingResult<BTreeMap<String, f64>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedTrainerConfig {
    pub steps_per_epoch: u32,
    pub step_delay_ms: u64,
    pub validation_delay_ms: u64,
    pub evaluation_delay_ms: u64,
}

impl Default for SimulatedTrainerConfig {
    fn default() -> Self {
        Self { steps_per_epoch: 100, step_delay_ms: 100, validation_delay_ms: 2000, evaluation_delay_ms: 3000 }
    }
}

impl SimulatedTrainerConfig {
    /// No delays and few steps; for tests and dry runs.
    #[must_use]
    pub fn instant(steps_per_epoch: u32) -> Self {
        Self { steps_per_epoch, step_delay_ms: 0, validation_delay_ms: 0, evaluation_delay_ms: 0 }
    }
}

/// Produces a decaying, noisy synthetic loss. Noise is seeded from the
/// hyperparameter seed and the step, so runs are reproducible.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTrainer {
    config: SimulatedTrainerConfig,
}

impl SimulatedTrainer {
    #[must_use]
    pub fn new(config: SimulatedTrainerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn synthetic_loss(seed: u64, ctx: &StepContext<'_>) -> f64 {
        let epochs = f64::from(ctx.config.hyperparameters.epochs.max(1));
        let within = f64::from(ctx.step) / f64::from(ctx.steps_per_epoch.max(1));
        let progress = (f64::from(ctx.epoch - 1) + within) / epochs;
        let base = 2.0 * (-progress * 0.5).exp();

        let mut rng = StdRng::seed_from_u64(seed ^ ctx.global_step.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let noise = (rng.r#gen::<f64>() - 0.5) * 0.1;
        (base + noise).max(0.1)
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl Trainer for SimulatedTrainer {
    fn id(&self) -> &'static str {
        "simulated"
    }

    fn steps_per_epoch(&self, _config: &FineTuningConfig) -> u32 {
        self.config.steps_per_epoch.max(1)
    }

    async fn prepare(&self, job_id: &TrainingJobId, config: &FineTuningConfig) -> TrainingResult<()> {
        debug!(job_id = %job_id, records = config.dataset.record_count, "Preparing simulated run");
        pause(self.config.validation_delay_ms).await;
        Ok(())
    }

    async fn train_step(&self, ctx: &StepContext<'_>) -> TrainingResult<StepOutput> {
        pause(self.config.step_delay_ms).await;
        Ok(StepOutput { loss: Self::synthetic_loss(ctx.config.hyperparameters.seed, ctx) })
    }

    async fn evaluate_epoch(
        &self,
        _job_id: &TrainingJobId,
        _config: &FineTuningConfig,
        epoch: u32,
        loss: f64,
    ) -> TrainingResult<EpochEvaluation> {
        let mut metrics = BTreeMap::new();
        metrics.insert("accuracy".to_string(), (0.85 + f64::from(epoch) * 0.01).min(0.99));
        metrics.insert("perplexity".to_string(), loss.exp());
        Ok(EpochEvaluation { validation_loss: Some(loss * 1.1), metrics })
    }

    async fn evaluate(
        &self,
        _job_id: &TrainingJobId,
        _config: &FineTuningConfig,
        final_loss: f64,
    ) -> TrainingResult<BTreeMap<String, f64>> {
        pause(self.config.evaluation_delay_ms).await;
        let mut summary = BTreeMap::new();
        summary.insert("final_loss".to_string(), final_loss);
        summary.insert("perplexity".to_string(), final_loss.exp());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{base_model, dataset};
    use crate::config::{Hyperparameters, TrainingOptions};

    fn config() -> FineTuningConfig {
        FineTuningConfig::new(
            "sim",
            base_model(),
            dataset(12),
            Hyperparameters { epochs: 2, ..Hyperparameters::default() },
            TrainingOptions::default(),
        )
        .unwrap()
    }

    fn ctx<'a>(job_id: &'a TrainingJobId, config: &'a FineTuningConfig, epoch: u32, step: u32) -> StepContext<'a> {
        StepContext {
            job_id,
            config,
            epoch,
            step,
            steps_per_epoch: 10,
            global_step: u64::from((epoch - 1) * 10 + step),
            total_steps: 20,
            learning_rate: 1e-4,
        }
    }

    #[test]
    fn test_synthetic_loss_is_reproducible_and_trends_down() {
        let config = config();
        let id = TrainingJobId::from("job-1");
        let early = SimulatedTrainer::synthetic_loss(42, &ctx(&id, &config, 1, 1));
        let again = SimulatedTrainer::synthetic_loss(42, &ctx(&id, &config, 1, 1));
        let late = SimulatedTrainer::synthetic_loss(42, &ctx(&id, &config, 2, 10));
        assert!((early - again).abs() < f64::EPSILON);
        assert!(late < early);
        assert!(late >= 0.1);
    }

    #[tokio::test]
    async fn test_epoch_evaluation_reports_validation_loss() {
        let config = config();
        let trainer = SimulatedTrainer::new(SimulatedTrainerConfig::instant(1));
        let eval = trainer
            .evaluate_epoch(&TrainingJobId::from("job-1"), &config, 1, 1.0)
            .await
            .unwrap();
        assert!((eval.validation_loss.unwrap() - 1.1).abs() < 1e-12);
        assert!(eval.metrics.contains_key("accuracy"));
    }
}
