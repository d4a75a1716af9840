//! Compatibility decoder for the pre-history file versions `0x0100`/`0x0110`:
//! a smaller single-stream, no-history header layout, a 64-byte extension
//! descriptor, and a single synthesized `storage_info` extension in place of
//! the current format's extension catalog.

use binrw::{BinRead, BinWrite};

use crate::chunk::{ChunkHeader, CHUNK_HEADER_SIZE};
use crate::error::{IfhdError, IfhdResult};
use crate::extension::{Extension, ExtensionDescriptor};
use crate::header::ByteOrder;
use crate::io::AlignedFile;

/// Size in bytes of the v110 file header (also used for v100; both versions
/// share one compatibility layout, see DESIGN.md).
pub const LEGACY_HEADER_SIZE: u64 = 2048;
const LEGACY_DESCRIPTION_LEN: usize = 1912;
const LEGACY_CHUNK_HEADER_SIZE: u64 = 32;

fn endian_of(order: ByteOrder) -> binrw::Endian {
    match order {
        ByteOrder::Little => binrw::Endian::Little,
        ByteOrder::Big => binrw::Endian::Big,
    }
}

#[derive(Debug, Clone, BinRead, BinWrite)]
struct RawLegacyHeader {
    file_id: u32,
    version_id: u32,
    extension_offset: u64,
    extension_count: u32,
    reserved1: u32,
    data_offset: u64,
    data_size: u64,
    index_count: u64,
    index_offset: u64,
    duration: u64,
    date_time: u64,
    chunk_count: u64,
    max_chunk_size: u64,
    reserved2: [u64; 6],
    description: [u8; LEGACY_DESCRIPTION_LEN],
}

const _: () = {
    let size = 4 + 4 + 8 + 4 + 4 + 8 + 8 + 8 + 8 + 8 + 8 + 8 + 8 + 6 * 8 + LEGACY_DESCRIPTION_LEN;
    assert!(size as u64 == LEGACY_HEADER_SIZE);
};

/// Parsed form of a legacy (`0x0100`/`0x0110`) file header.
#[derive(Debug, Clone)]
pub struct LegacyHeader {
    pub version_id: u32,
    pub extension_offset: u64,
    pub extension_count: u32,
    pub data_offset: u64,
    pub data_size: u64,
    pub index_count: u64,
    pub index_offset: u64,
    pub duration: u64,
    pub date_time: u64,
    pub chunk_count: u64,
    pub max_chunk_size: u64,
    description: Vec<u8>,
}

impl LegacyHeader {
    pub fn parse(buf: &[u8; LEGACY_HEADER_SIZE as usize], order: ByteOrder) -> IfhdResult<Self> {
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let raw = RawLegacyHeader::read_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("malformed legacy header: {e}")))?;
        let end = raw.description.iter().position(|&b| b == 0).unwrap_or(raw.description.len());
        Ok(Self {
            version_id: raw.version_id,
            extension_offset: raw.extension_offset,
            extension_count: raw.extension_count,
            data_offset: raw.data_offset,
            data_size: raw.data_size,
            index_count: raw.index_count,
            index_offset: raw.index_offset,
            duration: raw.duration,
            date_time: raw.date_time,
            chunk_count: raw.chunk_count,
            max_chunk_size: raw.max_chunk_size,
            description: raw.description[..end].to_vec(),
        })
    }

    pub fn description(&self) -> String {
        String::from_utf8_lossy(&self.description).into_owned()
    }
}

/// 32-byte legacy chunk header: no `stream_id`/`stream_index`/back-link, since
/// v110 files carry exactly one implicit stream.
#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
struct RawLegacyChunkHeader {
    timestamp: u64,
    ref_index: u64,
    size: u32,
    flags: u32,
    reserved: u64,
}

const _: () = {
    let size = 8 + 8 + 4 + 4 + 8;
    assert!(size as u64 == LEGACY_CHUNK_HEADER_SIZE);
};

/// The implicit stream id every legacy chunk is normalized onto.
pub const LEGACY_STREAM_ID: u16 = 1;

/// Wraps a legacy-format file and exposes the same iteration primitives
/// [`crate::reader::Reader`] uses for current-format files, normalizing
/// legacy records into [`ChunkHeader`] so callers don't need a second type.
pub struct LegacyReader {
    file: AlignedFile,
    pub header: LegacyHeader,
    order: ByteOrder,
    pos: u64,
    next_stream_index: u64,
}

impl LegacyReader {
    pub fn open(mut file: AlignedFile, order: ByteOrder) -> IfhdResult<Self> {
        let mut buf = [0u8; LEGACY_HEADER_SIZE as usize];
        file.set_file_pos(0, crate::io::SeekAnchor::Begin)?;
        file.read_all(&mut buf)?;
        let header = LegacyHeader::parse(&buf, order)?;
        let pos = header.data_offset;
        Ok(Self {
            file,
            header,
            order,
            pos,
            next_stream_index: 0,
        })
    }

    pub fn reset(&mut self) -> IfhdResult<()> {
        self.pos = self.header.data_offset;
        self.next_stream_index = 0;
        Ok(())
    }

    /// Reads the chunk header at the current position without advancing,
    /// normalized into the current-format [`ChunkHeader`] shape.
    pub fn query_chunk_info(&mut self) -> IfhdResult<ChunkHeader> {
        let data_end = self.header.data_offset + self.header.data_size;
        if self.pos >= data_end {
            return Err(IfhdError::EndOfFile);
        }
        self.file.set_file_pos(self.pos as i64, crate::io::SeekAnchor::Begin)?;
        let mut buf = [0u8; LEGACY_CHUNK_HEADER_SIZE as usize];
        self.file.read_all(&mut buf)?;
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let raw = RawLegacyChunkHeader::read_options(&mut cursor, endian_of(self.order), ())
            .map_err(|e| IfhdError::invalid_file(format!("malformed legacy chunk header: {e}")))?;

        Ok(ChunkHeader {
            timestamp: raw.timestamp,
            ref_master_table_index: raw.ref_index as u32,
            offset_to_previous_chunk: 0,
            size: raw.size,
            stream_id: LEGACY_STREAM_ID,
            flags: raw.flags as u16,
            stream_index: self.next_stream_index,
        })
    }

    pub fn read_chunk(&mut self, out: &mut Vec<u8>) -> IfhdResult<ChunkHeader> {
        let header = self.query_chunk_info()?;
        let payload_len = header.size.saturating_sub(CHUNK_HEADER_SIZE as u32) as usize;
        out.resize(payload_len, 0);
        self.file
            .set_file_pos((self.pos + LEGACY_CHUNK_HEADER_SIZE) as i64, crate::io::SeekAnchor::Begin)?;
        self.file.read_all(out)?;
        self.pos += crate::chunk::align_up(header.size as u64);
        self.next_stream_index += 1;
        Ok(header)
    }

    pub fn skip_chunk(&mut self) -> IfhdResult<()> {
        let header = self.query_chunk_info()?;
        self.pos += crate::chunk::align_up(header.size as u64);
        self.next_stream_index += 1;
        Ok(())
    }

    /// Synthesizes the single `storage_info` extension legacy files expose in
    /// place of a real extension catalog, built from header fields that don't
    /// fit the current format's extension-table shape.
    pub fn storage_info_extension(&self) -> Extension {
        let mut data = Vec::new();
        data.extend_from_slice(&self.header.date_time.to_le_bytes());
        data.extend_from_slice(&self.header.duration.to_le_bytes());
        data.extend_from_slice(&self.header.max_chunk_size.to_le_bytes());
        data.extend_from_slice(self.header.description().as_bytes());

        Extension {
            descriptor: ExtensionDescriptor {
                identifier: "storage_info".to_string(),
                stream_id: 0,
                user_id: 0,
                type_id: 0,
                version_id: self.header.version_id,
                data_offset: 0,
                data_size: data.len() as u64,
            },
            data,
        }
    }
}
