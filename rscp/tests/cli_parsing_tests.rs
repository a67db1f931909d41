//! CLI Argument Parsing Tests
//!
//! These tests verify that command-line arguments are parsed and validated before any
//! connection is attempted. None of them needs a reachable host.

use assert_cmd::Command;

#[test]
fn test_help_runs() {
    Command::cargo_bin("rscp")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn test_version_runs() {
    Command::cargo_bin("rscp")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

/// Byte sizes with units are accepted for --limit
#[test]
fn test_limit_accepts_units() {
    for value in ["0", "1024", "512KiB", "10MB", "1GiB"] {
        Command::cargo_bin("rscp")
            .unwrap()
            .args(["--limit", value, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_limit_rejects_garbage() {
    Command::cargo_bin("rscp")
        .unwrap()
        .args(["--limit", "fast", "a", "host:/b"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("--limit"));
}

#[test]
fn test_short_options() {
    Command::cargo_bin("rscp")
        .unwrap()
        .args(["-l", "alice", "-P", "2222", "-i", "/tmp/key", "-vv", "--help"])
        .assert()
        .success();
}

#[test]
fn test_port_must_be_a_number() {
    Command::cargo_bin("rscp")
        .unwrap()
        .args(["-P", "ssh", "a", "host:/b"])
        .assert()
        .failure();
}

#[test]
fn test_missing_destination() {
    Command::cargo_bin("rscp")
        .unwrap()
        .arg("only-one-path")
        .assert()
        .failure()
        .code(1)
        .stderr(predicates::str::contains("source and a destination"));
}

#[test]
fn test_no_paths_at_all() {
    Command::cargo_bin("rscp")
        .unwrap()
        .assert()
        .failure()
        .code(1)
        .stderr(predicates::str::contains("source and a destination"));
}

#[test]
fn test_both_sides_local() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("a.txt");
    std::fs::write(&source, "a").unwrap();
    Command::cargo_bin("rscp")
        .unwrap()
        .args([
            source.to_str().unwrap(),
            dir.path().join("b.txt").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicates::str::contains("one side must be remote"));
}

#[test]
fn test_both_sides_remote() {
    Command::cargo_bin("rscp")
        .unwrap()
        .args(["host1:/a", "host2:/b"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("one side must be local"));
}

#[test]
fn test_user_conflict() {
    Command::cargo_bin("rscp")
        .unwrap()
        .args(["-l", "alice", "file.txt", "bob@host:/tmp/"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("conflicts with --user"));
}

#[test]
fn test_quiet_suppresses_errors() {
    Command::cargo_bin("rscp")
        .unwrap()
        .args(["-q", "host1:/a", "host2:/b"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicates::str::is_empty());
}

#[test]
fn test_ls_requires_remote_location() {
    Command::cargo_bin("rscp")
        .unwrap()
        .args(["--ls", "/local/dir"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("remote location"));
}

#[test]
fn test_ls_takes_one_location() {
    Command::cargo_bin("rscp")
        .unwrap()
        .args(["--ls", "h:/a", "h:/b"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("exactly one remote location"));
}

#[test]
fn test_zero_buffer_size_rejected() {
    Command::cargo_bin("rscp")
        .unwrap()
        .args(["--buffer-size", "0", "a", "host:/b"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("buffer_size"));
}
