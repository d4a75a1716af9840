mod common;

use assert_cmd::Command;
use common::build_fixture;
use ifhd::reader::ReadOptions;
use ifhd::Reader;
use std::io::Write as _;

#[test]
fn modify_replaces_an_existing_extension_from_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.ifhd");
    build_fixture(&path);

    let input = dir.path().join("payload.bin");
    std::fs::File::create(&input).unwrap().write_all(b"updated").unwrap();

    Command::cargo_bin("ifhd")
        .unwrap()
        .args([
            "modify",
            path.to_str().unwrap(),
            "--extension",
            "notes",
            "--input",
            input.to_str().unwrap(),
        ])
        .assert()
        .success();

    let mut reader = Reader::open(&path, ReadOptions::empty()).unwrap();
    let ext = reader.find_extension("notes").unwrap();
    assert_eq!(ext.data, b"updated");
}

#[test]
fn modify_adds_a_new_extension_via_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.ifhd");
    build_fixture(&path);

    Command::cargo_bin("ifhd")
        .unwrap()
        .args([
            "modify",
            path.to_str().unwrap(),
            "--extension",
            "gps_origin",
            "--userid",
            "42",
        ])
        .write_stdin(b"lat=0,lon=0".to_vec())
        .assert()
        .success();

    let mut reader = Reader::open(&path, ReadOptions::empty()).unwrap();
    let ext = reader.find_extension("gps_origin").unwrap();
    assert_eq!(ext.data, b"lat=0,lon=0");
    assert_eq!(ext.descriptor.user_id, 42);
}
