//! Training command.
//!
//! Submits every run to one orchestrator, streams job events to the
//! terminal and prints a summary once all jobs reach a terminal state.

use super::run_spec::RunSpec;
use crate::config::TrainingDefaults;
use anyhow::{Context, Result};
use colored::Colorize;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};
use tuneforge_orchestrator::{JobEvent, JobOrchestrator, OrchestratorConfig};
use tuneforge_training::{
    FileCheckpointStore, LogLevel, SimulatedTrainer, SimulatedTrainerConfig, TrainingJob, TrainingJobId,
    TrainingStatus, ValidationLimits,
};

/// Flags that override the config file's `[training]` table.
#[derive(Debug, Default)]
pub struct TrainOverrides {
    pub max_concurrent: Option<usize>,
    pub steps_per_epoch: Option<u32>,
    pub step_delay_ms: Option<u64>,
    pub checkpoint_dir: Option<PathBuf>,
}

fn orchestrator_config(overrides: &TrainOverrides, defaults: &TrainingDefaults) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    if let Some(cap) = overrides.max_concurrent.or(defaults.max_concurrent_jobs) {
        config.max_concurrent_jobs = cap;
    }
    config
}

fn trainer_config(overrides: &TrainOverrides, defaults: &TrainingDefaults) -> SimulatedTrainerConfig {
    let base = SimulatedTrainerConfig::default();
    SimulatedTrainerConfig {
        steps_per_epoch: overrides.steps_per_epoch.or(defaults.steps_per_epoch).unwrap_or(base.steps_per_epoch),
        step_delay_ms: overrides.step_delay_ms.or(defaults.step_delay_ms).unwrap_or(base.step_delay_ms),
        validation_delay_ms: defaults.validation_delay_ms.unwrap_or(base.validation_delay_ms),
        evaluation_delay_ms: defaults.evaluation_delay_ms.unwrap_or(base.evaluation_delay_ms),
    }
}

fn build_orchestrator(overrides: &TrainOverrides, defaults: &TrainingDefaults) -> Result<JobOrchestrator> {
    let config = orchestrator_config(overrides, defaults);
    let trainer = trainer_config(overrides, defaults);
    let checkpoint_dir = overrides.checkpoint_dir.clone().or_else(|| defaults.checkpoint_dir.as_ref().map(PathBuf::from));

    let orchestrator = match checkpoint_dir {
        Some(dir) => {
            debug!(dir = %dir.display(), "Persisting checkpoints to disk");
            JobOrchestrator::new(
                config,
                Arc::new(SimulatedTrainer::new(trainer)),
                Arc::new(FileCheckpointStore::new(dir)),
            )
        }
        None => JobOrchestrator::simulated(config, trainer),
    };
    orchestrator.context("Cannot start the training orchestrator")
}

/// What the summary shows for each submitted job.
struct Submitted {
    name: String,
    quote: f64,
    currency: String,
}

/// Execute `tuneforge train`.
///
/// Fails if any run cannot be built or any job ends in `failed`.
pub async fn execute(runs: Vec<PathBuf>, json: bool, overrides: TrainOverrides, defaults: &TrainingDefaults) -> Result<()> {
    let orchestrator = build_orchestrator(&overrides, defaults)?;

    // Build every config up front so a bad run file submits nothing.
    let mut configs = Vec::with_capacity(runs.len());
    for run in &runs {
        let spec = RunSpec::load(run)?;
        configs.push(spec.build(&ValidationLimits::default()).await?);
    }

    let mut submitted = HashMap::new();

    let (stop_tx, stop_rx) = oneshot::channel();
    let printer = (!json).then(|| {
        let events = orchestrator.subscribe();
        tokio::spawn(print_events(events, stop_rx))
    });

    if !json {
        println!("{}", "tuneforge train".bold().cyan());
        println!();
    }

    let mut ids = Vec::with_capacity(configs.len());
    for config in configs {
        let name = config.name.clone();
        let job = orchestrator
            .start_training(config)
            .await
            .with_context(|| format!("Failed to submit run '{name}'"))?;
        // The orchestrator reprices on submission; report its quote.
        let (quote, currency) = orchestrator.get_config(&job.id).await.map_or_else(
            || (0.0, String::new()),
            |c| (c.cost_estimation.total_cost, c.cost_estimation.currency.clone()),
        );
        info!(job_id = %job.id, run = %name, quote, "Submitted run");
        submitted.insert(job.id.clone(), Submitted { name, quote, currency });
        ids.push(job.id);
    }

    let wait_all = join_all(ids.iter().map(|id| orchestrator.wait_for(id)));
    tokio::pin!(wait_all);
    let finished = tokio::select! {
        jobs = &mut wait_all => jobs,
        _ = tokio::signal::ctrl_c() => {
            let signalled = orchestrator.cancel_all().await;
            eprintln!("{} Cancelling {} job(s)...", "!".yellow().bold(), signalled);
            wait_all.await
        }
    };
    let jobs: Vec<TrainingJob> = finished.into_iter().flatten().collect();

    if let Some(handle) = printer {
        let _ = stop_tx.send(());
        let _ = handle.await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
    } else {
        print_summary(&jobs, &submitted);
    }

    let failed = jobs.iter().filter(|j| j.status == TrainingStatus::Failed).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} job(s) failed", jobs.len());
    }
    Ok(())
}

/// Prints events until `stop` fires, then drains what is still buffered.
async fn print_events(mut events: broadcast::Receiver<JobEvent>, mut stop: oneshot::Receiver<()>) {
    let mut names = HashMap::new();
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => print_event(&event, &mut names),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = &mut stop => break,
        }
    }

    // Flush what was published before the last job finished.
    while let Ok(event) = events.try_recv() {
        print_event(&event, &mut names);
    }
}

fn print_event(event: &JobEvent, names: &mut HashMap<TrainingJobId, String>) {
    if let JobEvent::Queued { job_id, name } = event {
        names.insert(job_id.clone(), name.clone());
        return;
    }
    // The queued event may have been lost to lag.
    let label = names.get(event.job_id()).cloned().unwrap_or_else(|| event.job_id().to_string());
    let label = format!("[{label}]").bold();

    match event {
        JobEvent::StatusChanged { to, .. } => {
            println!("{label} {}", colorize_status(*to));
        }
        JobEvent::Checkpoint { checkpoint, .. } => {
            let best = if checkpoint.is_best { " (best)".green().to_string() } else { String::new() };
            println!(
                "{label} checkpoint epoch {} step {} loss {:.4}{best}",
                checkpoint.epoch, checkpoint.step, checkpoint.loss
            );
        }
        JobEvent::Log { log, .. } if log.level >= LogLevel::Warning => {
            println!("{label} {}", log.message.yellow());
        }
        JobEvent::Queued { .. } | JobEvent::Progress { .. } | JobEvent::Metric { .. } | JobEvent::Log { .. } => {}
    }
}

fn colorize_status(status: TrainingStatus) -> colored::ColoredString {
    match status {
        TrainingStatus::Completed => status.as_str().green(),
        TrainingStatus::Failed => status.as_str().red(),
        TrainingStatus::Cancelled => status.as_str().yellow(),
        TrainingStatus::Pending | TrainingStatus::Validating | TrainingStatus::Training | TrainingStatus::Evaluating => {
            status.as_str().cyan()
        }
    }
}

fn print_summary(jobs: &[TrainingJob], submitted: &HashMap<TrainingJobId, Submitted>) {
    println!();
    println!(
        "{:<24} {:<11} {:>7} {:>10} {:>10} {:>6} {:>14}",
        "Run", "Status", "Epochs", "Final loss", "Best loss", "Ckpts", "Quote"
    );
    println!("{}", "─".repeat(88));
    for job in jobs {
        let (name, quote) = submitted.get(&job.id).map_or_else(
            || ("?", "-".to_string()),
            |s| (s.name.as_str(), format!("{:.2} {}", s.quote, s.currency)),
        );
        let (final_loss, best_loss) = if job.metrics.loss.count > 0 {
            (format!("{:.4}", job.metrics.loss.current), format!("{:.4}", job.metrics.loss.best))
        } else {
            ("-".to_string(), "-".to_string())
        };
        println!(
            "{:<24} {:<11} {:>7} {:>10} {:>10} {:>6} {:>14}",
            name,
            colorize_status(job.status),
            format!("{}/{}", job.progress.current_epoch, job.progress.total_epochs),
            final_loss,
            best_loss,
            job.checkpoints.len(),
            quote
        );
        if let Some(ref failure) = job.error {
            println!("    {} {}: {}", "↳".red(), failure.code, failure.message);
        }
    }
}
