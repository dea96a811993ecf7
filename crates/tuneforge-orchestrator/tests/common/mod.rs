//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tuneforge_orchestrator::{JobOrchestrator, OrchestratorConfig};
use tuneforge_training::{
    BaseModel, Dataset, DatasetFormat, DatasetValidator, EpochEvaluation, FineTuningConfig, Hyperparameters,
    InMemoryCheckpointStore, InferencePricing, ModelPricing, ModelProvider, StepContext, StepOutput, Trainer,
    TrainingError, TrainingJobId, TrainingOptions, TrainingPricing, TrainingResult,
};

pub fn config(name: &str, epochs: u32) -> FineTuningConfig {
    let content: String = (0..12)
        .map(|i| format!("{{\"prompt\":\"question {i}\",\"completion\":\"answer {i}\"}}\n"))
        .collect();
    let (records, validation) =
        DatasetValidator::default().validate_bytes(content.as_bytes(), DatasetFormat::Jsonl).unwrap();
    let dataset = Dataset::new(name, DatasetFormat::Jsonl, content.len() as u64, &records, validation);
    let base_model = BaseModel {
        id: "base-small".to_string(),
        name: "Base Small".to_string(),
        provider: ModelProvider::Custom,
        context_window: Some(2048),
        pricing: ModelPricing {
            training: TrainingPricing { per_token: 0.000_008, per_epoch: 0.0, minimum: 0.0 },
            inference: InferencePricing::default(),
        },
    };
    FineTuningConfig::new(
        name,
        base_model,
        dataset,
        Hyperparameters { epochs, ..Hyperparameters::default() },
        TrainingOptions::default(),
    )
    .unwrap()
}

pub fn orchestrator(max_concurrent_jobs: usize, trainer: Arc<dyn Trainer>) -> JobOrchestrator {
    JobOrchestrator::new(
        OrchestratorConfig { max_concurrent_jobs, ..OrchestratorConfig::default() },
        trainer,
        Arc::new(InMemoryCheckpointStore::default()),
    )
    .unwrap()
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Behaviour keyed on the job's config name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Succeed,
    FailStep,
    PanicStep,
    FailCheckpoint,
    /// `prepare` waits for a permit on `hold`.
    HoldPrepare,
    /// Final `evaluate` waits for a permit on `hold`.
    HoldEvaluate,
}

/// A trainer whose every step waits for a permit, and whose losses come
/// from a fixed list indexed by global step.
pub struct ScriptedTrainer {
    pub gate: Arc<Semaphore>,
    /// Starts closed; releases jobs scripted to hold outside the step loop.
    pub hold: Arc<Semaphore>,
    pub losses: Vec<f64>,
    pub steps_per_epoch: u32,
    pub steps_run: AtomicUsize,
    pub scripts: BTreeMap<String, Script>,
}

impl ScriptedTrainer {
    /// Steps run freely.
    pub fn open(steps_per_epoch: u32) -> Self {
        Self::with_gate(steps_per_epoch, Semaphore::MAX_PERMITS)
    }

    /// Steps block until permits are added to `gate`.
    pub fn gated(steps_per_epoch: u32) -> Self {
        Self::with_gate(steps_per_epoch, 0)
    }

    fn with_gate(steps_per_epoch: u32, permits: usize) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(permits)),
            hold: Arc::new(Semaphore::new(0)),
            losses: Vec::new(),
            steps_per_epoch,
            steps_run: AtomicUsize::new(0),
            scripts: BTreeMap::new(),
        }
    }

    pub fn with_losses(mut self, losses: &[f64]) -> Self {
        self.losses = losses.to_vec();
        self
    }

    pub fn with_script(mut self, name: &str, script: Script) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }

    fn script(&self, config: &FineTuningConfig) -> Script {
        self.scripts.get(&config.name).copied().unwrap_or(Script::Succeed)
    }

    async fn wait_for_hold(&self) -> TrainingResult<()> {
        let permit = self.hold.acquire().await.map_err(|e| TrainingError::Trainer(e.to_string()))?;
        permit.forget();
        Ok(())
    }
}

#[async_trait]
impl Trainer for ScriptedTrainer {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn steps_per_epoch(&self, _config: &FineTuningConfig) -> u32 {
        self.steps_per_epoch
    }

    async fn prepare(&self, _job_id: &TrainingJobId, config: &FineTuningConfig) -> TrainingResult<()> {
        if self.script(config) == Script::HoldPrepare {
            self.wait_for_hold().await?;
        }
        Ok(())
    }

    async fn train_step(&self, ctx: &StepContext<'_>) -> TrainingResult<StepOutput> {
        let permit = self.gate.acquire().await.map_err(|e| TrainingError::Trainer(e.to_string()))?;
        permit.forget();
        self.steps_run.fetch_add(1, Ordering::SeqCst);

        match self.script(ctx.config) {
            Script::FailStep => return Err(TrainingError::Trainer("device lost".to_string())),
            Script::PanicStep => panic!("trainer exploded"),
            Script::Succeed | Script::FailCheckpoint | Script::HoldPrepare | Script::HoldEvaluate => {}
        }

        let idx = usize::try_from(ctx.global_step - 1).unwrap_or(usize::MAX);
        let loss = self.losses.get(idx).copied().unwrap_or(1.0);
        Ok(StepOutput { loss })
    }

    async fn evaluate_epoch(
        &self,
        _job_id: &TrainingJobId,
        config: &FineTuningConfig,
        _epoch: u32,
        loss: f64,
    ) -> TrainingResult<EpochEvaluation> {
        if self.script(config) == Script::FailCheckpoint {
            return Err(TrainingError::Checkpoint("disk full".to_string()));
        }
        Ok(EpochEvaluation { validation_loss: Some(loss + 0.1), metrics: BTreeMap::new() })
    }

    async fn evaluate(
        &self,
        _job_id: &TrainingJobId,
        config: &FineTuningConfig,
        final_loss: f64,
    ) -> TrainingResult<BTreeMap<String, f64>> {
        if self.script(config) == Script::HoldEvaluate {
            self.wait_for_hold().await?;
        }
        Ok(BTreeMap::from([("final_loss".to_string(), final_loss)]))
    }
}
