//! CLI-level smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_completions_generate() {
    Command::cargo_bin("embark")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("embark"));
}

#[test]
fn test_build_rejects_unconfigured_directory() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("embark")
        .unwrap()
        .args(["build"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_unknown_subcommand_fails() {
    Command::cargo_bin("embark")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .failure();
}
