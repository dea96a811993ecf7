//! Workspace fixtures for CLI integration tests.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Simulated training with no delays and three steps per epoch.
const LOCAL_CONFIG: &str = r#"
[training]
steps_per_epoch = 3
step_delay_ms = 0
validation_delay_ms = 0
evaluation_delay_ms = 0
"#;

/// A temp dir with a fast `.tuneforgerc`, isolated from the user's global config.
pub fn workspace() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join(".tuneforgerc"), LOCAL_CONFIG).unwrap();
    temp_dir
}

pub fn tuneforge(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tuneforge").unwrap();
    cmd.current_dir(temp_dir.path()).env("HOME", temp_dir.path()).env("NO_COLOR", "1");
    cmd
}

pub fn jsonl(records: usize) -> String {
    (0..records)
        .map(|i| format!("{{\"prompt\":\"What is item {i}?\",\"completion\":\"Item {i} is a widget.\"}}\n"))
        .collect()
}

pub fn write_dataset(temp_dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = temp_dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Writes `<name>.toml` pointing at `dataset` (relative to the temp dir).
pub fn write_run(temp_dir: &TempDir, name: &str, dataset: &str, epochs: u32) -> PathBuf {
    let content = format!(
        r#"name = "{name}"

[dataset]
path = "{dataset}"

[base_model]
id = "base-small"
name = "Base Small"
provider = "custom"

[base_model.pricing.training]
per_token = 0.000008

[hyperparameters]
epochs = {epochs}
"#
    );
    let path = temp_dir.path().join(format!("{name}.toml"));
    fs::write(&path, content).unwrap();
    path
}

pub fn stdout_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap_or_else(|e| {
        panic!("stdout is not JSON ({e}): {}", String::from_utf8_lossy(output))
    })
}
