//! Dataset validation.
//!
//! Findings are appended in a fixed order: size and record-count checks,
//! then structural checks, then per-record content checks in record order.
//! Callers and tests rely on that order.

use crate::dataset::{value_text, DatasetFormat, Record};
use crate::error::DatasetError;
use crate::parser::parse_dataset_bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks acceptance.
    Error,
    /// Blocks acceptance; the dataset is unusable as uploaded.
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    pub severity: Severity,
}

impl ValidationError {
    fn critical(message: impl Into<String>) -> Self {
        Self { line: None, field: None, message: message.into(), severity: Severity::Critical }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenDistribution {
    pub p50: usize,
    pub p75: usize,
    pub p90: usize,
    pub p95: usize,
    pub p99: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStatistics {
    pub total_records: usize,
    pub valid_records: usize,
    pub invalid_records: usize,
    pub average_length: f64,
    pub max_length: usize,
    pub min_length: usize,
    pub token_distribution: TokenDistribution,
    pub unique_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetValidation {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub statistics: DatasetStatistics,
}

impl DatasetValidation {
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Critical)
    }
}

/// Thresholds applied by [`DatasetValidator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    pub max_file_size: u64,
    pub min_records: usize,
    pub recommended_min_records: usize,
    pub max_records: usize,
    pub max_field_length: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            min_records: 10,
            recommended_min_records: 100,
            max_records: 1_000_000,
            max_field_length: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatasetValidator {
    limits: ValidationLimits,
}

impl DatasetValidator {
    #[must_use]
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    /// Parse and validate raw bytes. Parse failures are fatal and returned as `Err`.
    pub fn validate_bytes(
        &self,
        bytes: &[u8],
        format: DatasetFormat,
    ) -> Result<(Vec<Record>, DatasetValidation), DatasetError> {
        let records = parse_dataset_bytes(bytes, format)?;
        let validation = self.validate_records(&records, format, bytes.len() as u64);
        Ok((records, validation))
    }

    /// Run every check over already-parsed records.
    #[must_use]
    pub fn validate_records(
        &self,
        records: &[Record],
        format: DatasetFormat,
        byte_size: u64,
    ) -> DatasetValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        self.check_size_and_count(records.len(), byte_size, &mut errors, &mut warnings);
        check_structure(records, format, &mut errors, &mut warnings);
        self.check_content(records, &mut warnings);

        let statistics = calculate_statistics(records);

        debug!(
            format = %format,
            records = records.len(),
            errors = errors.len(),
            warnings = warnings.len(),
            "Dataset validated"
        );

        DatasetValidation { is_valid: errors.is_empty(), errors, warnings, statistics }
    }

    fn check_size_and_count(
        &self,
        count: usize,
        byte_size: u64,
        errors: &mut Vec<ValidationError>,
        warnings: &mut Vec<ValidationWarning>,
    ) {
        let limits = &self.limits;

        if byte_size > limits.max_file_size {
            errors.push(ValidationError::critical(format!(
                "File size exceeds maximum allowed size of {}MB",
                limits.max_file_size / 1024 / 1024
            )));
        }

        if count < limits.min_records {
            errors.push(ValidationError::critical(format!(
                "Dataset must contain at least {} records. Found: {}",
                limits.min_records, count
            )));
        }

        if count < limits.recommended_min_records {
            warnings.push(ValidationWarning {
                line: None,
                field: None,
                message: format!(
                    "Dataset contains {} records. Recommended: at least {} records for better results",
                    count, limits.recommended_min_records
                ),
                suggestion: Some(
                    "Consider adding more training examples for improved model performance"
                        .to_string(),
                ),
            });
        }

        if count > limits.max_records {
            errors.push(ValidationError {
                line: None,
                field: None,
                message: format!(
                    "Dataset exceeds maximum record count of {}. Found: {}",
                    limits.max_records, count
                ),
                severity: Severity::Error,
            });
        }
    }

    fn check_content(&self, records: &[Record], warnings: &mut Vec<ValidationWarning>) {
        let mut seen = HashSet::with_capacity(records.len());

        for record in records {
            let empty = record.empty_fields();
            if !empty.is_empty() {
                warnings.push(ValidationWarning {
                    line: Some(record.line),
                    field: None,
                    message: format!("Empty fields detected: {}", empty.join(", ")),
                    suggestion: Some("Fill in empty fields or remove the record".to_string()),
                });
            }

            for (key, value) in &record.fields {
                let length = value_text(value).chars().count();
                if length > self.limits.max_field_length {
                    warnings.push(ValidationWarning {
                        line: Some(record.line),
                        field: Some(key.clone()),
                        message: format!(
                            "Field {key} exceeds recommended length ({length} characters)"
                        ),
                        suggestion: Some(
                            "Consider splitting long content into smaller chunks".to_string(),
                        ),
                    });
                }
            }

            // `seen` holds exactly the hashes of strictly earlier records.
            if !seen.insert(record.content_hash()) {
                warnings.push(ValidationWarning {
                    line: Some(record.line),
                    field: None,
                    message: "Duplicate or very similar record detected".to_string(),
                    suggestion: Some(
                        "Remove duplicate records to improve training efficiency".to_string(),
                    ),
                });
            }
        }
    }
}

fn check_structure(
    records: &[Record],
    format: DatasetFormat,
    errors: &mut Vec<ValidationError>,
    warnings: &mut Vec<ValidationWarning>,
) {
    let Some(first) = records.first() else {
        errors.push(ValidationError::critical("Dataset is empty"));
        return;
    };

    for field in format.required_fields() {
        if !first.fields.contains_key(*field) {
            errors.push(ValidationError {
                line: Some(1),
                field: Some((*field).to_string()),
                message: format!("Missing required field: {field}"),
                severity: Severity::Critical,
            });
        }
    }

    let expected: BTreeSet<&str> = first.fields.keys().map(String::as_str).collect();
    for record in &records[1..] {
        for field in &expected {
            if !record.fields.contains_key(*field) {
                warnings.push(ValidationWarning {
                    line: Some(record.line),
                    field: Some((*field).to_string()),
                    message: format!("Field {field} missing in record"),
                    suggestion: Some("Ensure all records have consistent fields".to_string()),
                });
            }
        }
        for field in record.fields.keys() {
            if !expected.contains(field.as_str()) {
                warnings.push(ValidationWarning {
                    line: Some(record.line),
                    field: Some(field.clone()),
                    message: format!("Unexpected field {field} in record"),
                    suggestion: Some("Remove inconsistent fields for better results".to_string()),
                });
            }
        }
    }
}

/// Descriptive statistics over every record, valid or not.
#[must_use]
pub fn calculate_statistics(records: &[Record]) -> DatasetStatistics {
    let mut lengths = Vec::with_capacity(records.len());
    let mut valid_records = 0;
    let mut unique = HashSet::new();

    for record in records {
        let content = record.content();
        lengths.push(content.chars().count());

        if record.is_complete() {
            valid_records += 1;
        }

        for token in content.split_whitespace() {
            unique.insert(token.to_lowercase());
        }
    }

    lengths.sort_unstable();

    let total_records = records.len();
    let average_length = if lengths.is_empty() {
        0.0
    } else {
        lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
    };

    DatasetStatistics {
        total_records,
        valid_records,
        invalid_records: total_records - valid_records,
        average_length,
        max_length: lengths.last().copied().unwrap_or(0),
        min_length: lengths.first().copied().unwrap_or(0),
        token_distribution: token_distribution(&lengths),
        unique_tokens: unique.len(),
    }
}

fn token_distribution(sorted: &[usize]) -> TokenDistribution {
    let percentile = |p: f64| {
        let idx = (sorted.len() as f64 * p).floor() as usize;
        sorted.get(idx).copied().unwrap_or(0)
    };

    TokenDistribution {
        p50: percentile(0.50),
        p75: percentile(0.75),
        p90: percentile(0.90),
        p95: percentile(0.95),
        p99: percentile(0.99),
    }
}
