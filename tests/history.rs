use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use ifhd::reader::{ReadChunkFlags, ReadOptions};
use ifhd::writer::WriterConfig;
use ifhd::{Reader, Writer};

#[test]
fn ring_buffer_wraps_and_reports_dropped_chunks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.ifhd");

    let dropped = Rc::new(RefCell::new(Vec::new()));
    let dropped_clone = dropped.clone();
    let config = WriterConfig {
        history_size: Some(512),
        ..WriterConfig::default()
    };
    let mut w = Writer::create(
        &path,
        config,
        Some(Box::new(move |chunk_index, stream_id| {
            dropped_clone.borrow_mut().push((chunk_index, stream_id));
        })),
    )?;
    w.set_stream_name(1, "telemetry");
    for i in 0..100u64 {
        w.write_chunk(1, &[0u8; 32], i * 1_000, 0)?;
    }
    w.quit_history()?;
    w.close()?;

    assert!(!dropped.borrow().is_empty(), "ring buffer should have evicted early chunks");

    let mut r = Reader::open(&path, ReadOptions::empty())?;
    r.reset()?;
    let mut buf = Vec::new();
    let mut remaining = 0;
    loop {
        match r.read_chunk(&mut buf, ReadChunkFlags::empty()) {
            Ok(_) => remaining += 1,
            Err(ifhd::IfhdError::EndOfFile) => break,
            Err(e) => return Err(e.into()),
        }
    }
    assert!(remaining < 100, "some chunks should have been overwritten");
    assert!(remaining > 0, "the most recent chunks should survive");
    Ok(())
}
