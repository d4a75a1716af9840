mod common;

use assert_cmd::Command;
use common::build_fixture;
use predicates::prelude::*;

#[test]
fn list_extensions_prints_the_notes_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.ifhd");
    build_fixture(&path);

    Command::cargo_bin("ifhd")
        .unwrap()
        .args(["list-extensions", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("notes"));
}
