//! Dataset commands.

use super::run_spec::resolve_format;
use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use tuneforge_training::{
    clean_records, parse_dataset_bytes, records_to_jsonl, DatasetFormat, DatasetValidation, Severity,
    ValidationLimits,
};

#[derive(Serialize)]
struct ValidateOutput<'a> {
    path: String,
    format: DatasetFormat,
    size: u64,
    validation: &'a DatasetValidation,
}

/// Execute `tuneforge dataset validate`.
///
/// Exits non-zero when the dataset has any error-level finding.
pub async fn validate(path: &Path, format: Option<&str>, json: bool) -> Result<()> {
    let format = resolve_format(path, format)?;
    let bytes = tokio::fs::read(path).await.with_context(|| format!("Failed to read {}", path.display()))?;
    let size = bytes.len() as u64;

    let (_, validation) = tuneforge_training::validate_dataset(bytes, format, ValidationLimits::default())
        .await
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if json {
        let output = ValidateOutput { path: path.display().to_string(), format, size, validation: &validation };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_validation(path, format, size, &validation);
    }

    if !validation.is_valid {
        anyhow::bail!("Dataset failed validation with {} error(s)", validation.errors.len());
    }
    Ok(())
}

fn print_validation(path: &Path, format: DatasetFormat, size: u64, validation: &DatasetValidation) {
    println!("{}", "tuneforge dataset validate".bold().cyan());
    println!();
    println!("  {} {}", "File:".bold(), path.display());
    println!("  {} {}", "Format:".bold(), format);
    println!("  {} {} bytes", "Size:".bold(), size);
    println!();

    let stats = &validation.statistics;
    println!("{}", "Statistics".bold());
    println!("{}", "─".repeat(60));
    println!("  Records:         {} ({} valid, {} invalid)", stats.total_records, stats.valid_records, stats.invalid_records);
    println!("  Length:          avg {:.1}, min {}, max {}", stats.average_length, stats.min_length, stats.max_length);
    let dist = &stats.token_distribution;
    println!("  Tokens:          p50 {} p90 {} p99 {}", dist.p50, dist.p90, dist.p99);
    println!("  Unique tokens:   {}", stats.unique_tokens);
    println!();

    if !validation.errors.is_empty() {
        println!("{}", format!("Errors ({})", validation.errors.len()).bold().red());
        for error in &validation.errors {
            let tag = match error.severity {
                Severity::Critical => "critical".red().bold(),
                Severity::Error => "error".red(),
            };
            println!("  [{}] {}{}", tag, location(error.line, error.field.as_deref()), error.message);
        }
        println!();
    }

    if !validation.warnings.is_empty() {
        println!("{}", format!("Warnings ({})", validation.warnings.len()).bold().yellow());
        for warning in &validation.warnings {
            println!("  {}{}", location(warning.line, warning.field.as_deref()), warning.message);
            if let Some(ref suggestion) = warning.suggestion {
                println!("      {}", suggestion.dimmed());
            }
        }
        println!();
    }

    if validation.is_valid {
        println!("{}", "✓ Dataset is valid".green().bold());
    } else {
        println!("{}", "✗ Dataset is invalid".red().bold());
    }
}

fn location(line: Option<usize>, field: Option<&str>) -> String {
    match (line, field) {
        (Some(line), Some(field)) => format!("line {line}, {field}: "),
        (Some(line), None) => format!("line {line}: "),
        (None, Some(field)) => format!("{field}: "),
        (None, None) => String::new(),
    }
}

/// Execute `tuneforge dataset clean`.
///
/// Writes JSONL to `output`, or to stdout when no output is given.
pub async fn clean(path: &Path, format: Option<&str>, output: Option<&Path>) -> Result<()> {
    let format = resolve_format(path, format)?;
    let bytes = tokio::fs::read(path).await.with_context(|| format!("Failed to read {}", path.display()))?;
    let records = parse_dataset_bytes(&bytes, format).with_context(|| format!("Failed to parse {}", path.display()))?;

    let cleaned = clean_records(&records);
    let jsonl = records_to_jsonl(&cleaned)?;

    match output {
        Some(out) => {
            tokio::fs::write(out, jsonl).await.with_context(|| format!("Failed to write {}", out.display()))?;
            println!(
                "{} Kept {} of {} records, wrote {}",
                "✓".green(),
                cleaned.len(),
                records.len(),
                out.display()
            );
        }
        None => print!("{jsonl}"),
    }
    Ok(())
}
