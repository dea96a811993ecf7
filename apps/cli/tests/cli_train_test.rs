//! Integration tests for the `tuneforge train` command.

mod common;

use common::{jsonl, stdout_json, tuneforge, workspace, write_dataset, write_run};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[test]
fn test_train_runs_complete_with_checkpoints() {
    let temp_dir = workspace();
    write_dataset(&temp_dir, "train.jsonl", &jsonl(12));
    write_run(&temp_dir, "alpha", "train.jsonl", 2);
    write_run(&temp_dir, "beta", "train.jsonl", 1);

    let output = tuneforge(&temp_dir)
        .args(["--log-level", "error", "train", "alpha.toml", "beta.toml", "--json", "--max-concurrent", "1"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let jobs = stdout_json(&output.stdout);
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 2);

    for (job, epochs) in jobs.iter().zip([2, 1]) {
        assert_eq!(job["status"], "completed");
        assert_eq!(job["progress"]["percent_complete"], 100.0);
        assert_eq!(job["progress"]["total_steps"], 3 * epochs);
        assert_eq!(job["checkpoints"].as_array().unwrap().len(), epochs as usize);
        assert!(job["evaluation"]["final_loss"].is_number());
    }
}

#[test]
fn test_train_persists_checkpoints_to_dir() {
    let temp_dir = workspace();
    write_dataset(&temp_dir, "train.jsonl", &jsonl(12));
    write_run(&temp_dir, "persisted", "train.jsonl", 2);

    let output = tuneforge(&temp_dir)
        .args(["--log-level", "error", "train", "persisted.toml", "--json", "--checkpoint-dir", "ckpts"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let jobs = stdout_json(&output.stdout);
    let checkpoints = jobs[0]["checkpoints"].as_array().unwrap();
    assert_eq!(checkpoints.len(), 2);
    for checkpoint in checkpoints {
        let path = checkpoint["path"].as_str().unwrap();
        let path = if Path::new(path).is_absolute() { Path::new(path).to_path_buf() } else { temp_dir.path().join(path) };
        assert!(path.exists(), "missing checkpoint manifest {}", path.display());
    }
    assert_eq!(checkpoints.iter().filter(|c| c["is_best"] == true).count(), 1);
}

#[test]
fn test_train_human_output_prints_summary() {
    let temp_dir = workspace();
    write_dataset(&temp_dir, "train.jsonl", &jsonl(12));
    write_run(&temp_dir, "gamma", "train.jsonl", 1);

    tuneforge(&temp_dir)
        .args(["train", "gamma.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[gamma]"))
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("checkpoint epoch 1"))
        .stdout(predicate::str::contains("Quote"))
        .stdout(predicate::str::contains("USD"));
}

#[test]
fn test_train_rejects_zero_concurrency_flag() {
    let temp_dir = workspace();
    write_dataset(&temp_dir, "train.jsonl", &jsonl(12));
    write_run(&temp_dir, "idle", "train.jsonl", 1);

    tuneforge(&temp_dir)
        .args(["train", "idle.toml", "--max-concurrent", "0"])
        .timeout(Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--max-concurrent"));
}

#[test]
fn test_train_rejects_zero_concurrency_from_config() {
    let temp_dir = workspace();
    fs::write(
        temp_dir.path().join(".tuneforgerc"),
        "[training]\nmax_concurrent_jobs = 0\nstep_delay_ms = 0\nvalidation_delay_ms = 0\nevaluation_delay_ms = 0\n",
    )
    .unwrap();
    write_dataset(&temp_dir, "train.jsonl", &jsonl(12));
    write_run(&temp_dir, "idle", "train.jsonl", 1);

    tuneforge(&temp_dir)
        .args(["train", "idle.toml"])
        .timeout(Duration::from_secs(30))
        .assert()
        .failure()
        .stdout(predicate::str::contains("[idle]").not())
        .stderr(predicate::str::contains("max_concurrent_jobs must be >= 1"));
}

#[test]
fn test_train_bad_run_submits_nothing() {
    let temp_dir = workspace();
    write_dataset(&temp_dir, "train.jsonl", &jsonl(12));
    write_dataset(&temp_dir, "tiny.jsonl", &jsonl(1));
    write_run(&temp_dir, "good", "train.jsonl", 1);
    write_run(&temp_dir, "bad", "tiny.jsonl", 1);

    tuneforge(&temp_dir)
        .args(["train", "good.toml", "bad.toml"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[good]").not())
        .stderr(predicate::str::contains("Run 'bad' is not trainable"));
}

#[test]
fn test_train_requires_run_files() {
    let temp_dir = workspace();

    tuneforge(&temp_dir).arg("train").assert().failure();
}
