//! CLI test cases.
//!
//! These use the `echo` engine, which treats each image's bytes as its text,
//! so they need no network access or credentials. Each test runs in its own
//! scratch directory, so `config.json` never leaks between tests.

use std::{fs, path::Path, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary, running in `dir`.
fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("text-extractor").unwrap();
    cmd.current_dir(dir)
        .env_remove("TEXT_EXTRACTOR_CONFIG")
        .env("RUST_LOG", "warn");
    cmd
}

/// An `extract` command using the echo engine and no pacing delay.
fn extract(dir: &Path) -> Command {
    let mut cmd = cmd(dir);
    cmd.args(["extract", "--engine", "echo", "--delay-ms", "0"]);
    cmd
}

#[test]
fn test_help() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path()).arg("--help").assert().success();
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path()).arg("--version").assert().success();
}

#[test]
fn test_extract_writes_text_and_log() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.png"), "Hello\nWorld\n").unwrap();
    fs::write(dir.path().join("blank.png"), "").unwrap();

    extract(dir.path())
        .args(["--output-dir", "out", "hello.png", "blank.png"])
        .assert()
        .success();

    let out = dir.path().join("out");
    assert_eq!(
        fs::read_to_string(out.join("hello.png.txt")).unwrap(),
        "Hello\nWorld"
    );
    assert_eq!(
        fs::read_to_string(out.join("blank.png.txt")).unwrap(),
        "No text detected."
    );
    let log = fs::read_to_string(out.join("processing_log.txt")).unwrap();
    assert!(log.contains("Processing file: hello.png"));
    assert!(log.contains("Finished processing: blank.png"));
    assert!(log.ends_with("All files have been processed.\n"));
}

#[test]
fn test_extract_without_output_dir_fails() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.png"), "Hello").unwrap();

    extract(dir.path())
        .arg("hello.png")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No output directory configured"));
    assert!(!dir.path().join("hello.png.txt").exists());
}

#[test]
fn test_output_dir_is_remembered() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.png"), "first").unwrap();
    fs::write(dir.path().join("b.png"), "second").unwrap();

    extract(dir.path())
        .args(["--output-dir", "out", "a.png"])
        .assert()
        .success();
    extract(dir.path()).arg("b.png").assert().success();

    assert_eq!(
        fs::read_to_string(dir.path().join("out/b.png.txt")).unwrap(),
        "second"
    );
    let log = fs::read_to_string(dir.path().join("out/processing_log.txt")).unwrap();
    assert_eq!(log.matches("All files have been processed.").count(), 2);
}

#[test]
fn test_config_set_output_dir_and_show() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .args(["config", "set-output-dir", "texts"])
        .assert()
        .success();
    cmd(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""output_dir": "texts""#));
}

#[test]
fn test_config_path_can_be_overridden() {
    let dir = tempfile::tempdir().unwrap();
    cmd(dir.path())
        .args(["--config", "settings.json", "config", "set-output-dir", "x"])
        .assert()
        .success();
    assert!(dir.path().join("settings.json").exists());
    assert!(!dir.path().join("config.json").exists());
}

#[test]
fn test_extract_report_and_print() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("note.png"), "Remember the milk").unwrap();

    extract(dir.path())
        .args([
            "--output-dir",
            "out",
            "--report",
            "report.jsonl",
            "--print",
            "note.png",
            "missing.pdf",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Remember the milk"));

    let report = fs::read_to_string(dir.path().join("report.jsonl")).unwrap();
    let records = report
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["path"], "note.png");
    assert_eq!(records[0]["status"], "ok");
    assert_eq!(records[1]["path"], "missing.pdf");
    assert_eq!(records[1]["kind"], "document");
    assert_eq!(records[1]["status"], "failed");

    // Even failed files get an output file.
    let failed = fs::read_to_string(dir.path().join("out/missing.pdf.txt")).unwrap();
    assert!(failed.starts_with("Error: "));
}
