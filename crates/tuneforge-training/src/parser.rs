//! Dataset parsing.
//!
//! Every supported [`DatasetFormat`] turns into the same ordered sequence of
//! [`Record`]s. Parsing is pure; any malformed document fails as a whole.

use crate::dataset::{DatasetFormat, Record};
use crate::error::DatasetError;
use serde_json::{Map, Value};

/// Parse raw dataset content according to its declared format.
pub fn parse_dataset(content: &str, format: DatasetFormat) -> Result<Vec<Record>, DatasetError> {
    match format {
        DatasetFormat::Jsonl => parse_jsonl(content),
        DatasetFormat::Json => parse_json(content),
        DatasetFormat::Csv => parse_csv(content),
        DatasetFormat::Text => Ok(parse_text(content)),
    }
}

/// Same as [`parse_dataset`] but starting from raw bytes.
pub fn parse_dataset_bytes(bytes: &[u8], format: DatasetFormat) -> Result<Vec<Record>, DatasetError> {
    let content = std::str::from_utf8(bytes).map_err(|_| DatasetError::NotUtf8)?;
    parse_dataset(content, format)
}

// Non-object JSON values carry no named fields.
fn into_fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(fields) => fields,
        _ => Map::new(),
    }
}

fn parse_jsonl(content: &str) -> Result<Vec<Record>, DatasetError> {
    let mut records = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| DatasetError::InvalidJsonLine {
            line: idx + 1,
            message: e.to_string(),
        })?;
        records.push(Record::new(idx + 1, into_fields(value)));
    }

    Ok(records)
}

fn parse_json(content: &str) -> Result<Vec<Record>, DatasetError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| DatasetError::InvalidJson(e.to_string()))?;

    let records = match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| Record::new(idx + 1, into_fields(item)))
            .collect(),
        other => vec![Record::new(1, into_fields(other))],
    };

    Ok(records)
}

fn parse_csv(content: &str) -> Result<Vec<Record>, DatasetError> {
    let content = content.trim();
    if content.lines().count() < 2 {
        return Err(DatasetError::CsvTooShort);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| DatasetError::InvalidCsv { line: 1, message: e.to_string() })?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| DatasetError::InvalidCsv {
            line: e.position().map_or(0, |p| p.line() as usize),
            message: e.to_string(),
        })?;
        let line = row.position().map_or(records.len() + 2, |p| p.line() as usize);

        let fields = headers
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                let cell = row.get(idx).unwrap_or_default();
                (header.to_string(), Value::String(cell.to_string()))
            })
            .collect();
        records.push(Record::new(line, fields));
    }

    Ok(records)
}

fn parse_text(content: &str) -> Vec<Record> {
    content
        .trim()
        .lines()
        .enumerate()
        .map(|(idx, line)| {
            let mut fields = Map::new();
            fields.insert("text".to_string(), Value::String(line.to_string()));
            Record::new(idx + 1, fields)
        })
        .collect()
}
