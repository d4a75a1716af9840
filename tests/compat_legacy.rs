//! Hand-assembles a `0x0110` legacy-layout file (no public writer produces
//! one) and verifies the current [`ifhd::Reader`] reads it transparently.

use anyhow::Result;
use byteorder::{WriteBytesExt, LE};
use ifhd::chunk::align_up;
use ifhd::reader::{ReadChunkFlags, ReadOptions};
use ifhd::Reader;
use std::io::Write as _;

const LEGACY_HEADER_SIZE: u64 = 2048;
const LEGACY_CHUNK_HEADER_SIZE: u64 = 32;
const LEGACY_DESCRIPTION_LEN: usize = 1912;

fn write_legacy_file(path: &std::path::Path, chunks: &[(u64, u32, &[u8])]) {
    let mut data = Vec::new();
    for (timestamp, flags, payload) in chunks {
        let mut chunk = Vec::new();
        chunk.write_u64::<LE>(*timestamp).unwrap();
        chunk.write_u64::<LE>(u64::MAX).unwrap(); // ref_index
        chunk
            .write_u32::<LE>(LEGACY_CHUNK_HEADER_SIZE as u32 + payload.len() as u32)
            .unwrap();
        chunk.write_u32::<LE>(*flags).unwrap();
        chunk.write_u64::<LE>(0).unwrap(); // reserved
        chunk.extend_from_slice(payload);

        let padded = align_up(chunk.len() as u64) as usize;
        chunk.resize(padded, 0xEE);
        data.extend_from_slice(&chunk);
    }

    let mut header = Vec::new();
    header.write_u32::<LE>(0).unwrap(); // file_id
    header.write_u32::<LE>(0x0110).unwrap(); // version_id
    header.write_u64::<LE>(LEGACY_HEADER_SIZE + data.len() as u64).unwrap(); // extension_offset
    header.write_u32::<LE>(0).unwrap(); // extension_count
    header.write_u32::<LE>(0).unwrap(); // reserved1
    header.write_u64::<LE>(LEGACY_HEADER_SIZE).unwrap(); // data_offset
    header.write_u64::<LE>(data.len() as u64).unwrap(); // data_size
    header.write_u64::<LE>(0).unwrap(); // index_count
    header.write_u64::<LE>(0).unwrap(); // index_offset
    header.write_u64::<LE>(0).unwrap(); // duration
    header.write_u64::<LE>(0).unwrap(); // date_time
    header.write_u64::<LE>(chunks.len() as u64).unwrap(); // chunk_count
    header.write_u64::<LE>(0).unwrap(); // max_chunk_size
    for _ in 0..6 {
        header.write_u64::<LE>(0).unwrap(); // reserved2
    }
    header.extend_from_slice(&[0u8; LEGACY_DESCRIPTION_LEN]);
    assert_eq!(header.len() as u64, LEGACY_HEADER_SIZE);

    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&header).unwrap();
    file.write_all(&data).unwrap();
}

#[test]
fn reads_a_legacy_file_through_the_same_reader_facade() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("legacy.ifhd");
    write_legacy_file(&path, &[(100_000, 0, b"aaaa"), (200_000, 1, b"bb")]);

    let mut r = Reader::open(&path, ReadOptions::empty())?;
    assert_eq!(r.file_version(), 0x0110);
    assert_eq!(r.chunk_count(), 2);

    r.reset()?;
    let mut buf = Vec::new();
    let h1 = r.read_chunk(&mut buf, ReadChunkFlags::empty())?;
    assert_eq!(buf, b"aaaa");
    // legacy timestamps are microseconds on disk; the reader normalizes
    // every timestamp it hands back to nanoseconds.
    assert_eq!(h1.timestamp, 100_000_000);
    assert_eq!(h1.stream_id, ifhd::legacy::LEGACY_STREAM_ID);

    let h2 = r.read_chunk(&mut buf, ReadChunkFlags::empty())?;
    assert_eq!(buf, b"bb");
    assert_eq!(h2.timestamp, 200_000_000);

    assert_matches::assert_matches!(
        r.read_chunk(&mut buf, ReadChunkFlags::empty()),
        Err(ifhd::IfhdError::EndOfFile)
    );
    Ok(())
}

#[test]
fn legacy_extension_surface_exposes_only_storage_info() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("legacy_ext.ifhd");
    write_legacy_file(&path, &[(0, 0, b"x")]);

    let mut r = Reader::open(&path, ReadOptions::empty())?;
    assert_eq!(r.extension_count(), 0);
    assert!(r.find_extension("storage_info").is_some());
    assert!(r.find_extension("nonexistent").is_none());
    Ok(())
}
