//! Smoke tests for the dbo binary

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_demo_help() {
    let mut cmd = Command::cargo_bin("dbo").unwrap();
    cmd.arg("demo").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Rows per INSERT statement"));
}

#[test]
fn test_demo_rejects_empty_batch() {
    let mut cmd = Command::cargo_bin("dbo").unwrap();
    cmd.arg("demo").arg("--batch").arg("0");

    cmd.assert().failure();
}

#[test]
fn test_unreachable_database_fails() {
    let mut cmd = Command::cargo_bin("dbo").unwrap();
    cmd.arg("ping").arg("--database-url").arg("mysql://nowhere/db");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to connect to database"));
}

// === SQLite round trip ===

#[cfg(not(feature = "postgres"))]
#[test]
fn test_demo_then_count() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("cli.db").display());

    for _ in 0..2 {
        Command::cargo_bin("dbo")
            .unwrap()
            .args(["demo", "--batch", "5", "--batch-size", "2", "--database-url", &url])
            .assert()
            .success()
            .stdout(predicate::str::contains("test_table now holds 5"));
    }

    Command::cargo_bin("dbo")
        .unwrap()
        .args(["count", "--json", "--database-url", &url])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""count":5"#));
}
