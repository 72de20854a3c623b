//! Integration tests for the `launchpad-cli bert` command.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn launchpad(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("launchpad-cli").unwrap();
    cmd.current_dir(temp_dir.path()).env("HOME", temp_dir.path());
    cmd
}

#[test]
fn test_bert_dry_run_prints_job() {
    let temp_dir = TempDir::new().unwrap();

    launchpad(&temp_dir)
        .args(["--dry_run", "bert", "--gpu_num_per_node", "2", "--batch_size_per_device", "8"])
        .args(["--data_dir", "wiki"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"PretrainJob\""))
        .stdout(predicate::str::contains("\"total_batch_size\": 16"))
        .stdout(predicate::str::contains("polynomial_conf"));
}

#[test]
fn test_bert_synthetic_run_saves_snapshots() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("wiki");
    std::fs::create_dir_all(&data_dir).unwrap();
    let models = temp_dir.path().join("models");

    launchpad(&temp_dir)
        .args(["bert", "--iter_num", "4", "--skip_iter_num", "1", "--model_save_every_n_iter", "5"])
        .args(["--seq_length", "128", "--max_predictions_per_seq", "20", "--save_last_snapshot"])
        .arg("--data_dir")
        .arg(&data_dir)
        .arg("--model_save_dir")
        .arg(&models)
        .assert()
        .success()
        .stdout(predicate::str::contains("Running bert: num_gpu_per_node = 1, num_nodes = 1."))
        .stdout(predicate::str::contains("iter 3, total_loss:"))
        .stdout(predicate::str::contains("average speed:"))
        .stdout(predicate::str::contains("Pretraining complete"));

    assert!(models.join("snapshot_5").join("snapshot.json").is_file());
    assert!(models.join("last_snapshot").join("snapshot.json").is_file());
    assert!(models.join("snapshots.json").is_file());
}

#[test]
fn test_bert_requires_data_dir_flag() {
    let temp_dir = TempDir::new().unwrap();

    launchpad(&temp_dir)
        .args(["--dry_run", "bert", "--iter_num", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--data_dir"));
}

#[test]
fn test_bert_missing_data_dir_fails() {
    let temp_dir = TempDir::new().unwrap();

    launchpad(&temp_dir)
        .args(["bert", "--data_dir", "does-not-exist", "--iter_num", "1", "--skip_iter_num", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("data directory does not exist"));
}

#[test]
fn test_bert_multi_node_requires_node_list() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("wiki");
    std::fs::create_dir_all(&data_dir).unwrap();

    launchpad(&temp_dir)
        .args(["bert", "--node_num", "2"])
        .arg("--data_dir")
        .arg(&data_dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("node address"));
}
