//! Command-line interface tests.
//!
//! Each test pins the token root and log directory into a private tempdir via
//! environment overrides, so tests never touch the user's real configuration
//! or token inventory.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn canaryd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("canaryd").unwrap();
    cmd.env("CANARYD_TOKENS__ROOT", dir.join("tokens"))
        .env("CANARYD_ALERTING__LOG_DIR", dir.join("logs"));
    cmd
}

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("canaryd")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("generate")
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("export")),
        );
}

#[test]
fn generate_plants_tokens_and_manifest() {
    let dir = tempfile::tempdir().unwrap();

    canaryd(dir.path())
        .arg("generate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Planted 5 decoy tokens"));

    assert!(dir.path().join("tokens/manifest.json").exists());
    assert!(dir.path().join("tokens/.aws/credentials").exists());
    assert!(dir.path().join("tokens/.ssh/id_rsa").exists());
}

#[test]
fn status_reports_inventory_and_alert_counts() {
    let dir = tempfile::tempdir().unwrap();

    canaryd(dir.path()).arg("generate").assert().success();

    canaryd(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Tokens:      5")
                .and(predicate::str::contains("0 total")),
        );
}

#[test]
fn status_without_manifest_reports_empty_inventory() {
    let dir = tempfile::tempdir().unwrap();

    canaryd(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tokens:      0"));
}

#[test]
fn clean_removes_generated_tokens() {
    let dir = tempfile::tempdir().unwrap();

    canaryd(dir.path()).arg("generate").assert().success();
    canaryd(dir.path())
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 5 decoy tokens"));

    assert!(!dir.path().join("tokens/manifest.json").exists());
    assert!(!dir.path().join("tokens/.aws/credentials").exists());
}

#[test]
fn export_with_no_alerts_prints_empty_array() {
    let dir = tempfile::tempdir().unwrap();

    canaryd(dir.path())
        .args(["export", "--hours", "24"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn read_only_queries_create_no_log_directory() {
    let dir = tempfile::tempdir().unwrap();

    canaryd(dir.path()).arg("status").assert().success();
    canaryd(dir.path()).arg("export").assert().success();

    assert!(!dir.path().join("logs").exists());
}

#[test]
fn explicit_config_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("canaryd.yaml");
    std::fs::write(
        &config_path,
        "tokens:\n  generate_ssh: false\n  generate_database: false\n",
    )
    .unwrap();

    canaryd(dir.path())
        .args(["--config", config_path.to_str().unwrap(), "generate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Planted 3 decoy tokens"));

    assert!(!dir.path().join("tokens/.ssh/id_rsa").exists());
}

#[test]
fn missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();

    canaryd(dir.path())
        .args(["--config", "/nonexistent/canaryd.yaml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
