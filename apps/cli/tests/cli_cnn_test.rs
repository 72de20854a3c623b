//! Integration tests for the `launchpad-cli cnn` command.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn launchpad(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("launchpad-cli").unwrap();
    cmd.current_dir(temp_dir.path()).env("HOME", temp_dir.path());
    cmd
}

#[test]
fn test_cnn_dry_run_defaults() {
    let temp_dir = TempDir::new().unwrap();

    launchpad(&temp_dir)
        .args(["--dry_run", "cnn"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"epoch_size\": 40037"))
        .stdout(predicate::str::contains("\"eval_job\": null"))
        .stdout(predicate::str::contains("momentum_conf"));
}

#[test]
fn test_cnn_synthetic_run_with_snapshots_and_summary() {
    let temp_dir = TempDir::new().unwrap();
    let models = temp_dir.path().join("models");
    let logs = temp_dir.path().join("logs");

    launchpad(&temp_dir)
        .args(["--seed", "3", "cnn", "--num_examples", "32", "--batch_size_per_device", "8"])
        .args(["--num_epochs", "2", "--image_size", "32", "--num_classes", "10"])
        .args(["--warmup_epochs", "0", "--save_snapshot_after_epoch", "0", "--loss_print_every_n_iter", "2"])
        .arg("--model_save_dir")
        .arg(&models)
        .arg("--log_dir")
        .arg(&logs)
        .assert()
        .success()
        .stdout(predicate::str::contains("Running resnet50: num_gpu_per_node = 1, num_nodes = 1."))
        .stdout(predicate::str::contains("train: epoch 0, iter 2, loss:"))
        .stdout(predicate::str::contains("Saving model to"))
        .stdout(predicate::str::contains("Training complete"));

    assert!(models.join("snapshot_initial_model").is_dir());
    assert!(models.join("snapshot_epoch_1").is_dir());
    assert!(!models.join("snapshot_epoch_0").exists());
    assert!(logs.join("summary.csv").is_file());
}

#[test]
fn test_cnn_restore_from_missing_dir_fails() {
    let temp_dir = TempDir::new().unwrap();

    launchpad(&temp_dir)
        .args(["cnn", "--num_examples", "8", "--num_epochs", "1", "--warmup_epochs", "0"])
        .args(["--model_load_dir", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("model load directory does not exist"));
}

#[test]
fn test_unknown_backend_is_rejected() {
    let temp_dir = TempDir::new().unwrap();

    launchpad(&temp_dir)
        .args(["--backend", "tpu", "cnn", "--num_examples", "8", "--num_epochs", "1", "--warmup_epochs", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown backend 'tpu'"));
}

#[test]
fn test_local_config_supplies_backend() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join(".launchpadrc"), "backend = \"tpu\"\n").unwrap();

    launchpad(&temp_dir)
        .args(["cnn", "--num_examples", "8", "--num_epochs", "1", "--warmup_epochs", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown backend 'tpu'"));
}
