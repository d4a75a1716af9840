mod common;

use assert_cmd::Command;
use common::build_fixture;
use predicates::prelude::*;

#[test]
fn list_streams_reports_both_streams() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.ifhd");
    build_fixture(&path);

    Command::cargo_bin("ifhd")
        .unwrap()
        .args(["list-streams", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("cam0"))
        .stdout(predicate::str::contains("imu0"));
}

#[test]
fn list_streams_extension_flag_also_prints_extensions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.ifhd");
    build_fixture(&path);

    Command::cargo_bin("ifhd")
        .unwrap()
        .args(["list-streams", path.to_str().unwrap(), "--extension"])
        .assert()
        .success()
        .stdout(predicate::str::contains("notes"));
}

#[test]
fn list_streams_on_missing_file_reports_an_error() {
    Command::cargo_bin("ifhd")
        .unwrap()
        .args(["list-streams", "/nonexistent/path.ifhd"])
        .assert()
        .failure();
}
