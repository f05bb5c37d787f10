//! Integration tests for the focusdns binary
//!
//! Only commands that work without privileges are exercised.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn focusdns() -> Command {
    let mut cmd = Command::cargo_bin("focusdns").unwrap();
    cmd.env("RUST_LOG", "error").env("NO_COLOR", "1");
    cmd
}

fn generated_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("focusdns.toml");
    focusdns()
        .args(["config", "generate", "-o"])
        .arg(&path)
        .assert()
        .success();
    path
}

fn write_rules(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("rules.json");
    std::fs::write(&path, content).unwrap();
    path
}

// ====== General Tests ======

#[test]
fn test_help_lists_commands() {
    focusdns()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_completions() {
    focusdns()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("focusdns"));
}

#[test]
fn test_powershell_completions() {
    focusdns()
        .args(["completions", "powershell"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Register-ArgumentCompleter"));
}

// ====== Config Tests ======

#[test]
fn test_generate_then_validate() {
    let dir = TempDir::new().unwrap();
    let path = generated_config(&dir);

    focusdns()
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_validate_reports_bad_rules() {
    let dir = TempDir::new().unwrap();
    let path = generated_config(&dir);
    let rules = write_rules(
        dir.path(),
        r#"[{"domain": "bad.example", "blockType": "pattern", "pattern": "("}]"#,
    );

    focusdns()
        .args(["config", "validate"])
        .arg(&path)
        .arg("--rules")
        .arg(&rules)
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.example"));
}

#[test]
fn test_validate_missing_file() {
    focusdns()
        .args(["config", "validate", "/nonexistent/focusdns.toml"])
        .assert()
        .failure();
}

#[test]
fn test_show_config() {
    let dir = TempDir::new().unwrap();
    let path = generated_config(&dir);

    focusdns()
        .args(["config", "show", "-f"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("video.example"));
}

// ====== Check Tests ======

#[test]
fn test_check_classifies_domains() {
    let dir = TempDir::new().unwrap();
    let path = generated_config(&dir);

    focusdns()
        .args(["check", "-c"])
        .arg(&path)
        .args(["www.video.example", "cdn.news.example", "dns.google"])
        .assert()
        .success()
        .stdout(predicate::str::contains("BLOCKED  www.video.example"))
        .stdout(predicate::str::contains("ALLOWED  cdn.news.example"))
        .stdout(predicate::str::contains("CRITICAL dns.google"));
}

#[test]
fn test_check_with_rules_file_and_dump() {
    let dir = TempDir::new().unwrap();
    let path = generated_config(&dir);
    let rules = write_rules(dir.path(), r#"[{"domain": "blocked.test", "blockType": "exact"}]"#);

    focusdns()
        .args(["check", "--dump", "-c"])
        .arg(&path)
        .arg("-r")
        .arg(&rules)
        .arg("blocked.test")
        .assert()
        .success()
        .stdout(predicate::str::contains("BLOCKED"))
        .stdout(predicate::str::contains("response "))
        // Answer section ends with 127.0.0.1
        .stdout(predicate::str::contains("7f000001\n"));
}

// ====== Run Tests ======

#[test]
fn test_run_dry_run() {
    let dir = TempDir::new().unwrap();
    let path = generated_config(&dir);

    focusdns()
        .args(["run", "--dry-run", "-q", "-d", "25", "-c"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("4 rules (0 rejected), session for 25 min"));
}
