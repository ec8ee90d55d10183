use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_run_info_flags() {
    let mut cmd = Command::cargo_bin("nimbus").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--monitor"))
        .stdout(predicate::str::contains("--project"))
        .stdout(predicate::str::contains("--stack"))
        .stdout(predicate::str::contains("--parallel"));
}

#[test]
fn missing_program_file_fails_cleanly() {
    let mut cmd = Command::cargo_bin("nimbus").unwrap();
    cmd.args([
        "/nonexistent/program.json",
        "--project",
        "proj",
        "--stack",
        "dev",
        "--monitor",
        "127.0.0.1:1",
        "--engine",
        "127.0.0.1:1",
        "--loader",
        "127.0.0.1:1",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to read program"));
}
