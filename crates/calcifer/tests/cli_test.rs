//! Integration tests for the `calcifer` binary.
//!
//! These validate argument parsing, help output, and config checking --
//! all without a broker or any devices attached.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `calcifer` binary with env isolation.
fn calcifer_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("calcifer");
    cmd.env("HOME", "/tmp/calcifer-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/calcifer-test-nonexistent")
        .env_remove("RUST_LOG");
    cmd
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let output = calcifer_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "expected exit code 2");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "expected 'Usage' in:\n{stderr}");
}

#[test]
fn help_flag_names_the_commands() {
    calcifer_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("digital-twin")
            .and(predicate::str::contains("run"))
            .and(predicate::str::contains("check-config")),
    );
}

#[test]
fn version_flag() {
    calcifer_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("calcifer"));
}

// ── check-config ────────────────────────────────────────────────────

#[test]
fn check_config_accepts_defaults() {
    // No config file anywhere: pure defaults must validate.
    calcifer_cmd().args(["-v", "check-config"]).assert().success();
}

#[test]
fn check_config_accepts_a_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calcifer.toml");
    std::fs::write(&path, "[reconcile]\ndebounce_ms = 25\n").unwrap();

    calcifer_cmd()
        .args(["--config", path.to_str().unwrap(), "check-config"])
        .assert()
        .success();
}

#[test]
fn check_config_rejects_degenerate_tuning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calcifer.toml");
    std::fs::write(&path, "[rule]\nevaluation_timeout_ms = 0\n").unwrap();

    calcifer_cmd()
        .args(["--config", path.to_str().unwrap(), "check-config"])
        .assert()
        .failure()
        .code(78);
}
