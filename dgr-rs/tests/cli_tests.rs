//! Integration tests for the dgr CLI.

use assert_cmd::Command;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper function to create a test configuration file.
fn create_test_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let config_path = dir.join("config.yaml");
    fs::write(&config_path, content).expect("Failed to write test config");
    config_path
}

/// Helper function to run the dgr CLI with given arguments.
fn run_cli(args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("dgr").expect("Failed to find dgr binary");
    cmd.args(args);
    cmd
}

/// A configuration that trains in well under a second.
fn tiny_config_yaml(checkpoint_dir: &Path) -> String {
    format!(
        r#"
experiment: permuted-clusters
replay_mode: generative-replay
checkpoint_dir: "{}"
seed: 3

data:
  tasks: 2
  examples_per_task: 60
  test_examples_per_task: 20
  input_dim: 6
  classes: 3

generator:
  z_size: 3
  g_hidden_size: 8
  c_hidden_size: 8
  critic_updates_per_generator_update: 1

solver:
  depth: 1
  hidden_size: 8

training:
  generator_iterations: 3
  solver_iterations: 3
  batch_size: 10
  test_size: 20
  sample_size: 6
"#,
        checkpoint_dir.display()
    )
}

#[test]
fn test_validate_command_valid_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = create_test_config(temp_dir.path(), &tiny_config_yaml(temp_dir.path()));

    run_cli(&["validate", config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicates::str::contains("Configuration is valid"))
        .stdout(predicates::str::contains("generative-replay"));
}

#[test]
fn test_validate_command_out_of_range_importance() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = create_test_config(
        temp_dir.path(),
        "experiment: permuted-clusters\ntraining:\n  importance_of_new_task: 1.5\n",
    );

    run_cli(&["validate", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicates::str::contains("importance_of_new_task"));
}

#[test]
fn test_validate_command_zero_test_size() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = create_test_config(
        temp_dir.path(),
        "experiment: permuted-clusters\ntraining:\n  test_size: 0\n",
    );

    run_cli(&["validate", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicates::str::contains("test_size"));
}

#[test]
fn test_validate_command_unknown_replay_mode() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = create_test_config(temp_dir.path(), "replay_mode: partial-replay\n");

    run_cli(&["validate", config_path.to_str().unwrap()]).assert().failure();
}

#[test]
fn test_validate_command_missing_file() {
    run_cli(&["validate", "/nonexistent/config.yaml"]).assert().failure();
}

#[test]
fn test_train_command_help() {
    run_cli(&["train", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Train a scholar"))
        .stdout(predicates::str::contains("CONFIG"))
        .stdout(predicates::str::contains("--seed"));
}

#[test]
fn test_init_command_creates_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = temp_dir.path().join("generated.yaml");

    run_cli(&["init", output.to_str().unwrap(), "--preset", "clusters-shifted"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Configuration written"));

    let content = fs::read_to_string(&output).expect("config not written");
    assert!(content.contains("clusters-shifted"));
    run_cli(&["validate", output.to_str().unwrap()]).assert().success();
}

#[test]
fn test_init_command_unknown_preset() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = temp_dir.path().join("generated.yaml");

    run_cli(&["init", output.to_str().unwrap(), "--preset", "svhn-mnist"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("undefined experiment"));
    assert!(!output.exists());
}

#[test]
fn test_train_then_test() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let checkpoints = temp_dir.path().join("checkpoints");
    let config_path = create_test_config(temp_dir.path(), &tiny_config_yaml(&checkpoints));
    let config = config_path.to_str().unwrap();

    run_cli(&["train", config])
        .env("DGR_FORCE_CPU", "1")
        .assert()
        .success()
        .stdout(predicates::str::contains("Task 1: replay None"))
        .stdout(predicates::str::contains("Task 2: replay Generative"))
        .stdout(predicates::str::contains("Training complete"));
    assert!(checkpoints.join("task-2").join("scholar.json").exists());

    run_cli(&["test", config])
        .assert()
        .success()
        .stdout(predicates::str::contains("after 2 tasks"))
        .stdout(predicates::str::contains("Task 2: precision"))
        .stdout(predicates::str::contains("6 samples"));
}

#[test]
fn test_test_command_missing_checkpoint() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = create_test_config(temp_dir.path(), &tiny_config_yaml(&temp_dir.path().join("none")));

    run_cli(&["test", config_path.to_str().unwrap()]).assert().failure();
}

#[test]
fn test_cli_help() {
    run_cli(&["--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Deep Generative Replay"))
        .stdout(predicates::str::contains("validate"))
        .stdout(predicates::str::contains("train"))
        .stdout(predicates::str::contains("test"))
        .stdout(predicates::str::contains("init"));
}

#[test]
fn test_cli_version() {
    run_cli(&["--version"])
        .assert()
        .success()
        .stdout(predicates::str::contains("dgr"));
}
