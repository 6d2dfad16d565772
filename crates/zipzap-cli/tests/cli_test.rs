//! End-to-end tests for the zipzap binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use zipzap_testing::assertions::assert_file_contents;
use zipzap_testing::fixtures::{create_scenario_tree, write_zip, ZipFixture, ALPHA, GAMMA_LOCAL};
use zipzap_testing::TestDir;

fn zipzap() -> Command {
    Command::cargo_bin("zipzap").unwrap()
}

#[test]
fn test_help_lists_subcommands() {
    zipzap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("clear"));
}

#[test]
fn test_run_extracts_scenario_tree() {
    let test_dir = TestDir::new().unwrap();
    let scenario = create_scenario_tree(&test_dir).unwrap();

    zipzap()
        .args(["--no-log-file", "run"])
        .arg(test_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed: 2"))
        .stdout(predicate::str::contains("Failed:    0"));

    assert_file_contents(&test_dir.join("alpha.txt"), ALPHA).unwrap();
    assert_file_contents(&scenario.conflicting, GAMMA_LOCAL).unwrap();
    assert!(test_dir.join("sub/gamma_1.txt").exists());
}

#[test]
fn test_run_json_summary() {
    let test_dir = TestDir::new().unwrap();
    create_scenario_tree(&test_dir).unwrap();

    let output = zipzap()
        .args(["--no-log-file", "run", "--json"])
        .arg(test_dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["completed"], 2);
    assert_eq!(summary["failed"].as_array().unwrap().len(), 0);

    // Second run does nothing new
    let output = zipzap()
        .args(["--no-log-file", "run", "--json"])
        .arg(test_dir.path())
        .output()
        .unwrap();
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["completed"], 0);
    assert_eq!(summary["skipped"], 2);
}

#[test]
fn test_status_and_clear() {
    let test_dir = TestDir::new().unwrap();
    create_scenario_tree(&test_dir).unwrap();

    zipzap()
        .args(["--no-log-file", "status"])
        .arg(test_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No progress recorded"));

    zipzap()
        .args(["--no-log-file", "run"])
        .arg(test_dir.path())
        .assert()
        .success();

    zipzap()
        .args(["--no-log-file", "status"])
        .arg(test_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("completed: 2"));

    zipzap()
        .args(["--no-log-file", "clear"])
        .arg(test_dir.path())
        .assert()
        .success();
    assert!(!test_dir.join(".zipzap-progress.json").exists());
}

#[test]
fn test_failed_archive_exit_code() {
    let test_dir = TestDir::new().unwrap();
    fs::write(test_dir.join("broken.zip"), b"PK\x03\x04 not really").unwrap();

    zipzap()
        .args(["--no-log-file", "run"])
        .arg(test_dir.path())
        .assert()
        .code(4)
        .stdout(predicate::str::contains("broken.zip"));
}

#[test]
fn test_missing_directory_exit_code() {
    let test_dir = TestDir::new().unwrap();

    zipzap()
        .args(["--no-log-file", "run"])
        .arg(test_dir.join("nowhere"))
        .assert()
        .code(2);
}

#[test]
fn test_usage_error_exit_code() {
    zipzap().args(["run", "--on-conflict", "sometimes", "."]).assert().code(3);
    zipzap().arg("frobnicate").assert().code(3);
}

#[test]
fn test_unknown_format_is_rejected() {
    let test_dir = TestDir::new().unwrap();

    zipzap()
        .args(["--no-log-file", "run", "--formats", "zip,rar"])
        .arg(test_dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("rar"));
}

#[test]
fn test_log_file_records_run() {
    let test_dir = TestDir::new().unwrap();
    let workdir = TestDir::new().unwrap();
    write_zip(&test_dir.join("a.zip"), &[ZipFixture::file("a.txt", b"a")]).unwrap();

    zipzap()
        .current_dir(workdir.path())
        .arg("run")
        .arg(test_dir.path())
        .assert()
        .success();

    let log = fs::read_to_string(workdir.join("zipzap.log")).unwrap();
    assert!(log.contains("a.zip"));
}
