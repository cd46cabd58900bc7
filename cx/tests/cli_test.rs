//! CLI contract smoke tests

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_process_command() {
    Command::cargo_bin("cx")
        .expect("cx binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("process"));
}

#[test]
fn test_process_help_lists_contract_flags() {
    Command::cargo_bin("cx")
        .expect("cx binary")
        .args(["process", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--out-dir"))
        .stdout(predicate::str::contains("--tech"))
        .stdout(predicate::str::contains("--jurisdiction-file"))
        .stdout(predicate::str::contains("--rate-limit"))
        .stdout(predicate::str::contains("--chunk-size"))
        .stdout(predicate::str::contains("--search-engine"))
        .stdout(predicate::str::contains("--ocr-exe"))
        .stdout(predicate::str::contains("--log-level"));
}

#[test]
fn test_process_without_required_args_fails() {
    Command::cargo_bin("cx")
        .expect("cx binary")
        .arg("process")
        .assert()
        .failure();
}

#[test]
fn test_unknown_subcommand_fails() {
    Command::cargo_bin("cx")
        .expect("cx binary")
        .arg("extract")
        .assert()
        .failure();
}
