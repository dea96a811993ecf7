//! Cost estimation command.

use super::run_spec::RunSpec;
use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use tuneforge_training::{CostEstimation, CostModel, ValidationLimits};

#[derive(Serialize)]
struct EstimateOutput<'a> {
    name: &'a str,
    base_model: &'a str,
    records: usize,
    epochs: u32,
    estimated_tokens: f64,
    estimation: &'a CostEstimation,
}

/// Execute `tuneforge estimate`.
pub async fn execute(run: &Path, json: bool) -> Result<()> {
    let spec = RunSpec::load(run)?;
    let config = spec.build(&ValidationLimits::default()).await?;
    let estimation = &config.cost_estimation;
    let tokens = CostModel::default().estimated_tokens(&config);

    if json {
        let output = EstimateOutput {
            name: &config.name,
            base_model: &config.base_model.id,
            records: config.dataset.record_count,
            epochs: config.hyperparameters.epochs,
            estimated_tokens: tokens,
            estimation,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let currency = &estimation.currency;
    println!("{}", "tuneforge estimate".bold().cyan());
    println!();
    println!("  {} {}", "Run:".bold(), config.name);
    println!("  {} {}", "Base model:".bold(), config.base_model.id);
    println!(
        "  {} {} records, {} epoch(s), ~{:.0} tokens per epoch",
        "Workload:".bold(),
        config.dataset.record_count,
        config.hyperparameters.epochs,
        tokens
    );
    println!();
    println!("{:<20} {:>14}", "Component".bold(), "Cost".bold());
    println!("{}", "─".repeat(36));
    println!("{:<20} {:>14.4}", "Training", estimation.training_cost);
    println!("{:<20} {:>14.4}", "Storage", estimation.storage_cost);
    println!("{:<20} {:>14.4}", "Inference testing", estimation.inference_cost);
    println!("{}", "─".repeat(36));
    println!("{:<20} {:>14.4} {}", "Total".bold(), estimation.total_cost, currency);
    println!();

    let breakdown = &estimation.breakdown;
    println!("{}", "Breakdown".bold());
    println!("  Data preparation  {:.4}", breakdown.data_preparation);
    println!("  Training          {:.4}", breakdown.training);
    println!("  Evaluation        {:.4}", breakdown.evaluation);
    println!("  Deployment        {:.4}", breakdown.deployment);
    println!("  Storage           {:.4}", breakdown.storage);
    println!();
    println!("  {} ~{} minute(s)", "Estimated duration:".bold(), estimation.estimated_minutes);
    Ok(())
}
