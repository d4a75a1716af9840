mod common;

use assert_cmd::Command;
use common::build_fixture;
use ifhd::reader::{ReadChunkFlags, ReadOptions};
use ifhd::Reader;

#[test]
fn create_without_input_produces_an_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("new.ifhd");

    Command::cargo_bin("ifhd")
        .unwrap()
        .args(["create", out.to_str().unwrap(), "--fileversion", "adtf3ns"])
        .assert()
        .success();

    let reader = Reader::open(&out, ReadOptions::empty()).unwrap();
    assert_eq!(reader.file_version(), ifhd::version::V0500);
    assert_eq!(reader.chunk_count(), 0);
}

#[test]
fn create_with_input_copies_chunks_and_renames_a_stream() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.ifhd");
    build_fixture(&source);
    let out = dir.path().join("copy.ifhd");

    Command::cargo_bin("ifhd")
        .unwrap()
        .args([
            "create",
            out.to_str().unwrap(),
            "--fileversion",
            "adtf3ns",
            "--input",
            source.to_str().unwrap(),
            "--stream",
            "cam0=front_camera",
        ])
        .assert()
        .success();

    let mut reader = Reader::open(&out, ReadOptions::empty()).unwrap();
    assert_eq!(reader.chunk_count(), 3);
    let names: Vec<String> = reader.streams().into_iter().map(|s| s.name).collect();
    assert!(names.contains(&"front_camera".to_string()));
    assert!(names.contains(&"imu0".to_string()));

    reader.reset().unwrap();
    let mut buf = Vec::new();
    let h = reader.read_chunk(&mut buf, ReadChunkFlags::empty()).unwrap();
    assert_eq!(buf, b"frame-0");
    assert_eq!(h.timestamp, 0);
}

#[test]
fn create_rejects_malformed_stream_rename() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.ifhd");
    build_fixture(&source);
    let out = dir.path().join("copy.ifhd");

    Command::cargo_bin("ifhd")
        .unwrap()
        .args([
            "create",
            out.to_str().unwrap(),
            "--fileversion",
            "adtf3ns",
            "--input",
            source.to_str().unwrap(),
            "--stream",
            "not-a-rename-pair",
        ])
        .assert()
        .failure();
}
