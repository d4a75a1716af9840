use anyhow::Result;
use ifhd::extension::write_extension;
use ifhd::reader::ReadOptions;
use ifhd::writer::WriterConfig;
use ifhd::{Reader, Writer};

#[test]
fn extensions_written_during_recording_are_readable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ext.ifhd");

    let mut w = Writer::create(&path, WriterConfig::default(), None)?;
    w.set_stream_name(1, "cam0");
    w.write_chunk(1, b"frame", 0, 0)?;
    w.get_extension_stream("calibration", 7, 1, 1)?;
    w.write_to_extension_stream("calibration", b"intrinsics=...")?;
    w.close()?;

    let mut r = Reader::open(&path, ReadOptions::empty())?;
    let ext = r.find_extension("calibration").expect("extension present");
    assert_eq!(ext.data, b"intrinsics=...");
    assert_eq!(ext.descriptor.user_id, 7);
    assert_eq!(ext.descriptor.type_id, 1);
    Ok(())
}

#[test]
fn write_extension_patches_an_existing_file_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("patched.ifhd");

    let mut w = Writer::create(&path, WriterConfig::default(), None)?;
    w.set_stream_name(1, "cam0");
    w.write_chunk(1, b"frame", 0, 0)?;
    w.close()?;

    write_extension(&path, "notes", b"hello", 1, 2, 3, 0)?;

    let mut r = Reader::open(&path, ReadOptions::empty())?;
    let ext = r.find_extension("notes").expect("extension present");
    assert_eq!(ext.data, b"hello");
    assert_eq!(ext.descriptor.version_id, 3);
    Ok(())
}
