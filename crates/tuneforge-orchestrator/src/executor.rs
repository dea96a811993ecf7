//! Training execution loop.
//!
//! Drives one dispatched job from `validating` through `evaluating`. The
//! job table lock is taken only for short synchronous updates between trainer
//! calls and is never held while a trainer future is awaited.

use crate::error::Result;
use crate::lifecycle::{Dispatch, LEARNING_RATE, LOSS, VALIDATION_LOSS};
use crate::Shared;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use tuneforge_training::{
    CheckpointDraft, LogLevel, MetricPoint, ProgressUpdate, StepContext, TrainingError, TrainingProgress,
    TrainingStatus,
};

/// Percent complete when dataset validation has passed.
pub const VALIDATION_DONE: f64 = 10.0;
/// Percent complete when the last training step has run.
pub const TRAINING_DONE: f64 = 80.0;
/// Percent complete when final evaluation starts.
pub const EVALUATION_START: f64 = 90.0;

/// How the loop ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Every phase ran; the job should move to `completed`.
    Completed,
    /// The cancellation token fired at a step boundary.
    Cancelled,
}

fn training_percent(global_step: u64, total_steps: u64) -> f64 {
    let fraction = global_step as f64 / total_steps.max(1) as f64;
    VALIDATION_DONE + (TRAINING_DONE - VALIDATION_DONE) * fraction
}

fn scaled(total: u64, global_step: u64, total_steps: u64) -> u64 {
    (total as f64 * global_step as f64 / total_steps.max(1) as f64) as u64
}

/// Runs a dispatched job to the end of its evaluation phase.
///
/// Terminal transitions are left to the caller, which also owns slot release.
pub async fn run_job(shared: Arc<Shared>, dispatch: Dispatch) -> Result<ExecutionOutcome> {
    let Dispatch { job_id, config, token } = dispatch;
    let trainer = Arc::clone(&shared.trainer);
    let hyperparameters = &config.hyperparameters;
    let options = &config.training_options;

    {
        let mut table = shared.table.write().await;
        table.log(
            &job_id,
            LogLevel::Info,
            format!(
                "Validating dataset {} ({} records)",
                config.dataset.name, config.dataset.record_count
            ),
            None,
        );
    }

    config.ensure_dataset_usable()?;
    trainer.prepare(&job_id, &config).await?;
    if token.is_cancelled() {
        return Ok(ExecutionOutcome::Cancelled);
    }

    let steps_per_epoch = trainer.steps_per_epoch(&config).max(1);
    let epochs = hyperparameters.epochs;
    let total_steps = u64::from(epochs) * u64::from(steps_per_epoch);
    let totals = TrainingProgress::for_config(&config);

    {
        let mut table = shared.table.write().await;
        table.apply_progress(
            &job_id,
            &ProgressUpdate {
                total_epochs: Some(epochs),
                total_steps: Some(total_steps),
                percent_complete: Some(VALIDATION_DONE),
                ..ProgressUpdate::default()
            },
        )?;
        table.log(&job_id, LogLevel::Info, "Dataset validation passed", None);
        table.transition(&job_id, TrainingStatus::Training)?;
        table.log(
            &job_id,
            LogLevel::Info,
            format!("Starting training with {} ({epochs} epochs x {steps_per_epoch} steps)", trainer.id()),
            None,
        );
    }

    let mut global_step = 0_u64;
    let mut final_loss = f64::NAN;

    for epoch in 1..=epochs {
        let mut epoch_loss = f64::NAN;

        for step in 1..=steps_per_epoch {
            if token.is_cancelled() {
                debug!(job_id = %job_id, epoch, step, "Cancellation observed at step boundary");
                let mut table = shared.table.write().await;
                table.log(
                    &job_id,
                    LogLevel::Warning,
                    format!("Training cancelled at epoch {epoch}, step {global_step}"),
                    None,
                );
                return Ok(ExecutionOutcome::Cancelled);
            }

            global_step += 1;
            let learning_rate = hyperparameters.learning_rate_at(global_step, total_steps);
            let ctx = StepContext {
                job_id: &job_id,
                config: &config,
                epoch,
                step,
                steps_per_epoch,
                global_step,
                total_steps,
                learning_rate,
            };

            let output = trainer.train_step(&ctx).await?;
            if !output.loss.is_finite() {
                return Err(TrainingError::Trainer(format!(
                    "step {global_step} reported a non-finite loss ({})",
                    output.loss
                ))
                .into());
            }
            epoch_loss = output.loss;

            let now = Utc::now();
            let mut table = shared.table.write().await;
            table.apply_progress(
                &job_id,
                &ProgressUpdate {
                    current_epoch: Some(epoch),
                    current_step: Some(global_step),
                    percent_complete: Some(training_percent(global_step, total_steps)),
                    samples_processed: Some(scaled(totals.total_samples, global_step, total_steps)),
                    tokens_processed: Some(scaled(totals.total_tokens, global_step, total_steps)),
                    ..ProgressUpdate::default()
                },
            )?;
            table.record_metric(
                &job_id,
                LOSS,
                MetricPoint { step: global_step, epoch, value: output.loss, timestamp: now },
            )?;
            table.record_metric(
                &job_id,
                LEARNING_RATE,
                MetricPoint { step: global_step, epoch, value: learning_rate, timestamp: now },
            )?;

            if global_step % u64::from(options.evaluation_frequency) == 0 {
                let metadata = options
                    .logging
                    .log_metrics
                    .then(|| json!({ "loss": output.loss, "learning_rate": learning_rate }));
                table.log(
                    &job_id,
                    LogLevel::Debug,
                    format!("Step {global_step}/{total_steps}: loss={:.4}", output.loss),
                    metadata,
                );
            }
        }

        final_loss = epoch_loss;
        let evaluation = trainer.evaluate_epoch(&job_id, &config, epoch, epoch_loss).await?;
        {
            let now = Utc::now();
            let mut table = shared.table.write().await;
            if let Some(value) = evaluation.validation_loss {
                table.record_metric(
                    &job_id,
                    VALIDATION_LOSS,
                    MetricPoint { step: global_step, epoch, value, timestamp: now },
                )?;
            }
            for (name, value) in &evaluation.metrics {
                table.record_metric(
                    &job_id,
                    name,
                    MetricPoint { step: global_step, epoch, value: *value, timestamp: now },
                )?;
            }
            table.log(
                &job_id,
                LogLevel::Info,
                format!("Epoch {epoch}/{epochs} complete: loss={epoch_loss:.4}"),
                None,
            );
        }

        if options.checkpoints_at(epoch, epochs) {
            let draft = CheckpointDraft {
                job_id: job_id.clone(),
                epoch,
                step: global_step,
                loss: epoch_loss,
                validation_loss: evaluation.validation_loss,
                metrics: evaluation.metrics,
            };
            let stored = shared.store.persist(&draft).await?;
            let checkpoint = draft.into_checkpoint(stored);

            let mut table = shared.table.write().await;
            let is_best = table.add_checkpoint(&job_id, checkpoint)?;
            let suffix = if is_best { " (best so far)" } else { "" };
            table.log(&job_id, LogLevel::Info, format!("Checkpoint saved for epoch {epoch}{suffix}"), None);
        }
    }

    if token.is_cancelled() {
        return Ok(ExecutionOutcome::Cancelled);
    }

    {
        let mut table = shared.table.write().await;
        table.transition(&job_id, TrainingStatus::Evaluating)?;
        table.apply_progress(&job_id, &ProgressUpdate::percent(EVALUATION_START))?;
        table.log(&job_id, LogLevel::Info, "Running final evaluation", None);
    }

    let summary = trainer.evaluate(&job_id, &config, final_loss).await?;
    if token.is_cancelled() {
        return Ok(ExecutionOutcome::Cancelled);
    }

    let mut table = shared.table.write().await;
    table.log(
        &job_id,
        LogLevel::Info,
        "Evaluation complete",
        Some(json!(summary)),
    );
    table.set_evaluation(&job_id, summary)?;
    table.apply_progress(&job_id, &ProgressUpdate::percent(100.0))?;
    Ok(ExecutionOutcome::Completed)
}
