use anyhow::Result;
use ifhd::reader::{ReadChunkFlags, ReadOptions, SeekFlags, SeekFormat};
use ifhd::writer::WriterConfig;
use ifhd::{Reader, Writer};

fn build(path: &std::path::Path) -> Result<()> {
    let mut w = Writer::create(path, WriterConfig::default(), None)?;
    w.set_stream_name(1, "cam0");
    for i in 0..10u64 {
        w.write_chunk(1, format!("frame-{i}").as_bytes(), i * 10_000_000, 0)?;
    }
    w.close()?;
    Ok(())
}

#[test]
fn seek_by_stream_index_lands_on_the_requested_chunk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("seek_index.ifhd");
    build(&path)?;

    let mut r = Reader::open(&path, ReadOptions::empty())?;
    r.seek(1, 5, SeekFormat::StreamIndex, SeekFlags::empty())?;

    let mut buf = Vec::new();
    let h = r.read_chunk(&mut buf, ReadChunkFlags::empty())?;
    assert_eq!(buf, b"frame-5");
    assert_eq!(h.timestamp, 50_000_000);
    Ok(())
}

#[test]
fn seek_by_time_finds_the_first_chunk_at_or_after_position() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("seek_time.ifhd");
    build(&path)?;

    let mut r = Reader::open(&path, ReadOptions::empty())?;
    r.seek(1, 35_000_000, SeekFormat::ChunkTime, SeekFlags::empty())?;

    let mut buf = Vec::new();
    let h = r.read_chunk(&mut buf, ReadChunkFlags::empty())?;
    assert_eq!(buf, b"frame-4");
    assert_eq!(h.timestamp, 40_000_000);
    Ok(())
}

#[test]
fn seek_before_time_offset_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("seek_oob.ifhd");

    let mut w = Writer::create(&path, WriterConfig::default(), None)?;
    w.set_stream_name(1, "cam0");
    w.write_chunk(1, b"first", 100_000_000, 0)?;
    w.write_chunk(1, b"second", 200_000_000, 0)?;
    w.close()?;

    let mut r = Reader::open(&path, ReadOptions::empty())?;
    let err = r
        .seek(1, 0, SeekFormat::ChunkTime, SeekFlags::empty())
        .unwrap_err();
    assert_matches::assert_matches!(err, ifhd::IfhdError::OutOfRange { .. });
    Ok(())
}
