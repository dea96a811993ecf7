use crate::error::{DatasetError, TrainingResult};
use crate::validation::DatasetValidation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier for a dataset's content (SHA-256 over normalized records).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The record formats a dataset can be uploaded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    /// One JSON object per line.
    Jsonl,
    /// A single JSON document: an array of records or one record.
    Json,
    /// Comma-delimited text with a header row.
    Csv,
    /// Plain text, one record per line.
    Text,
}

impl DatasetFormat {
    /// Fields that must be present on the first record.
    #[must_use]
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Jsonl | Self::Json => &["prompt", "completion"],
            Self::Csv => &["input", "output"],
            Self::Text => &["text"],
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jsonl => "jsonl",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for DatasetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetFormat {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "text" | "txt" => Ok(Self::Text),
            other => Err(DatasetError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// One parsed dataset record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// 1-based source line (or array position for whole-document JSON).
    pub line: usize,
    pub fields: Map<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new(line: usize, fields: Map<String, Value>) -> Self {
        Self { line, fields }
    }

    /// Names of fields whose value is null or an empty string.
    #[must_use]
    pub fn empty_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, value)| is_empty_value(value))
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// A record is valid when none of its values is empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.fields.values().any(is_empty_value)
    }

    /// All field values joined by a space.
    #[must_use]
    pub fn content(&self) -> String {
        self.fields.values().map(value_text).collect::<Vec<_>>().join(" ")
    }

    /// Hash of the record content with fields ordered by name.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        let normalized = keys
            .into_iter()
            .map(|key| value_text(&self.fields[key]))
            .collect::<Vec<_>>()
            .join("|");
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Text form of a value as used for lengths and hashing: strings are taken
/// verbatim, everything else in its JSON form.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A validated upload. Never mutated after construction; a new upload is a new `Dataset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub content_id: DatasetId,
    pub format: DatasetFormat,
    /// Source size in bytes.
    pub size: u64,
    pub record_count: usize,
    pub uploaded_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub validation: DatasetValidation,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Dataset {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        format: DatasetFormat,
        size: u64,
        records: &[Record],
        validation: DatasetValidation,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("ds_{}", Uuid::new_v4().simple()),
            name: name.into(),
            content_id: compute_dataset_id(records),
            format,
            size,
            record_count: records.len(),
            uploaded_at: now,
            validated_at: Some(now),
            validation,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn average_length(&self) -> f64 {
        self.validation.statistics.average_length
    }
}

#[must_use]
pub fn compute_dataset_id(records: &[Record]) -> DatasetId {
    let mut hasher = Sha256::new();

    for record in records {
        hasher.update(record.content_hash().as_bytes());
        hasher.update(b"\n");
    }

    DatasetId(hex::encode(hasher.finalize()))
}

/// Drop records with empty values and trim every string value.
#[must_use]
pub fn clean_records(records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .filter(|record| record.is_complete())
        .map(|record| {
            let fields = record
                .fields
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => Value::String(s.trim().to_string()),
                        other => other.clone(),
                    };
                    (key.clone(), value)
                })
                .collect();
            Record::new(record.line, fields)
        })
        .collect()
}

/// Serialize records as JSONL (one object per line, no line numbers).
pub fn records_to_jsonl(records: &[Record]) -> TrainingResult<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(&record.fields)?);
        out.push('\n');
    }
    Ok(out)
}
