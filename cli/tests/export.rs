mod common;

use assert_cmd::Command;
use common::build_fixture;

#[test]
fn export_writes_one_file_per_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.ifhd");
    build_fixture(&path);
    let out_dir = dir.path().join("out");

    Command::cargo_bin("ifhd")
        .unwrap()
        .args([
            "export",
            path.to_str().unwrap(),
            "--stream",
            "cam0",
            "--output-dir",
            out_dir.to_str().unwrap(),
        ])
        .assert()
        .success();

    let exported = std::fs::read(out_dir.join("cam0.bin")).unwrap();
    assert_eq!(exported, b"frame-0frame-1");
}

#[test]
fn export_writes_extension_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.ifhd");
    build_fixture(&path);
    let out_dir = dir.path().join("out");

    Command::cargo_bin("ifhd")
        .unwrap()
        .args([
            "export",
            path.to_str().unwrap(),
            "--extension",
            "notes",
            "--output-dir",
            out_dir.to_str().unwrap(),
        ])
        .assert()
        .success();

    let exported = std::fs::read(out_dir.join("notes.ext")).unwrap();
    assert_eq!(exported, b"hello");
}

#[test]
fn export_with_no_targets_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.ifhd");
    build_fixture(&path);

    Command::cargo_bin("ifhd")
        .unwrap()
        .args(["export", path.to_str().unwrap()])
        .assert()
        .failure();
}
