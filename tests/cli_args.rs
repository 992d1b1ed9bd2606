//! Integration tests for CLI argument handling
//!
//! Runs the built binary for the subcommands that do not need the network.

use std::process::Command;

use tempfile::TempDir;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_vesselcast"))
        .args(args)
        .env_remove("VESSELCAST_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute vesselcast")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("vesselcast"), "Help should mention vesselcast");
    assert!(stdout.contains("run"), "Help should mention the run subcommand");
    assert!(stdout.contains("print-config"), "Help should mention print-config");
}

#[test]
fn test_print_config_without_file_prints_defaults() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("config.toml");

    let output = run_cli(&["--config", path.to_str().unwrap(), "print-config"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("interval-minutes = 60"), "got: {}", stdout);
    assert!(stdout.contains("max-forecast-hours = 12"));
    assert!(stdout.contains("[packages]"));
}

#[test]
fn test_print_config_reflects_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "interval-minutes = 15\nauto-enable-moving = true\n")
        .expect("Failed to write config");

    let output = run_cli(&["--config", path.to_str().unwrap(), "print-config"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("interval-minutes = 15"));
    assert!(stdout.contains("auto-enable-moving = true"));
}

#[test]
fn test_invalid_config_prints_error_and_exits() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[packages]\ndaily = [\"tides\"]\n").expect("Failed to write config");

    let output = run_cli(&["--config", path.to_str().unwrap(), "print-config"]);

    assert!(!output.status.success(), "Expected invalid config to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("tides"), "Should name the bad package: {}", stderr);
}

#[test]
fn test_run_without_api_key_fails() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("config.toml");

    let output = run_cli(&["--config", path.to_str().unwrap(), "run"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No API key"), "got: {}", stderr);
}

#[test]
fn test_missing_subcommand_fails() {
    let output = run_cli(&[]);
    assert!(!output.status.success());
}
