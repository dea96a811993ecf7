//! Integration tests for the `tuneforge dataset` commands.

mod common;

use common::{jsonl, stdout_json, tuneforge, workspace, write_dataset};
use predicates::prelude::*;
use std::fs;

#[test]
fn test_validate_valid_dataset() {
    let temp_dir = workspace();
    write_dataset(&temp_dir, "train.jsonl", &jsonl(12));

    tuneforge(&temp_dir)
        .args(["dataset", "validate", "train.jsonl"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dataset is valid"))
        .stdout(predicate::str::contains("Recommended: at least 100 records"));
}

#[test]
fn test_validate_json_output() {
    let temp_dir = workspace();
    write_dataset(&temp_dir, "train.jsonl", &jsonl(12));

    let output = tuneforge(&temp_dir)
        .args(["--log-level", "error", "dataset", "validate", "train.jsonl", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = stdout_json(&output.stdout);
    assert_eq!(json["format"], "jsonl");
    assert_eq!(json["validation"]["is_valid"], true);
    assert_eq!(json["validation"]["statistics"]["total_records"], 12);
    assert_eq!(json["validation"]["errors"].as_array().unwrap().len(), 0);
}

#[test]
fn test_validate_too_few_records_fails() {
    let temp_dir = workspace();
    write_dataset(&temp_dir, "small.jsonl", &jsonl(3));

    tuneforge(&temp_dir)
        .args(["dataset", "validate", "small.jsonl"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("at least 10 records"))
        .stderr(predicate::str::contains("failed validation"));
}

#[test]
fn test_validate_malformed_line_reports_parse_error() {
    let temp_dir = workspace();
    let mut content = jsonl(11);
    content.push_str("{not json\n");
    write_dataset(&temp_dir, "broken.jsonl", &content);

    tuneforge(&temp_dir)
        .args(["dataset", "validate", "broken.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse"))
        .stderr(predicate::str::contains("line 12"));
}

#[test]
fn test_validate_csv_with_explicit_format() {
    let temp_dir = workspace();
    let mut content = String::from("input,output\n");
    for i in 0..12 {
        content.push_str(&format!("question {i},answer {i}\n"));
    }
    write_dataset(&temp_dir, "pairs.data", &content);

    tuneforge(&temp_dir)
        .args(["dataset", "validate", "pairs.data", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Format: csv"));
}

#[test]
fn test_validate_unknown_extension_requires_format() {
    let temp_dir = workspace();
    write_dataset(&temp_dir, "train.parquet", &jsonl(12));

    tuneforge(&temp_dir)
        .args(["dataset", "validate", "train.parquet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("pass --format"));
}

#[test]
fn test_clean_drops_incomplete_and_trims() {
    let temp_dir = workspace();
    let content = "{\"prompt\":\"  hello  \",\"completion\":\"world \"}\n\
                   {\"prompt\":\"\",\"completion\":\"orphan\"}\n\
                   {\"prompt\":\"ok\",\"completion\":\"fine\"}\n";
    write_dataset(&temp_dir, "raw.jsonl", content);

    tuneforge(&temp_dir)
        .args(["dataset", "clean", "raw.jsonl", "--output", "clean.jsonl"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Kept 2 of 3 records"));

    let cleaned = fs::read_to_string(temp_dir.path().join("clean.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = cleaned.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["prompt"], "hello");
    assert_eq!(lines[0]["completion"], "world");
    assert_eq!(lines[1]["prompt"], "ok");
}
