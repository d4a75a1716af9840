//! Fixed-layout records written inline in the data region: chunk headers,
//! and the master/stream index-table entries that reference them.

use binrw::{BinRead, BinWrite};

use crate::error::{IfhdError, IfhdResult};
use crate::header::ByteOrder;
use crate::{CHUNK_ALIGNMENT, MAX_STREAM_NAME_LEN};

/// Size in bytes of one on-disk chunk header.
pub const CHUNK_HEADER_SIZE: u64 = 32;
/// Size in bytes of one on-disk master-table entry.
pub const CHUNK_REF_SIZE: u64 = 44;
/// Size in bytes of one on-disk per-stream-table entry.
pub const STREAM_REF_SIZE: u64 = 4;
/// Size in bytes of one on-disk stream-info-header extension prefix.
pub const STREAM_INFO_HEADER_SIZE: u64 = 256;
/// Size in bytes of one on-disk additional-index-info extension.
pub const ADDITIONAL_INDEX_INFO_SIZE: u64 = 32;

/// A chunk is marked as key data, forcing an index entry regardless of the
/// time-since-last-index heuristic.
pub const CHUNK_FLAG_KEYDATA: u16 = 0x01;
pub const CHUNK_FLAG_INFO: u16 = 0x02;
pub const CHUNK_FLAG_MARKER: u16 = 0x04;
pub const CHUNK_FLAG_TYPE: u16 = 0x08;
pub const CHUNK_FLAG_TRIGGER: u16 = 0x10;

fn endian_of(order: ByteOrder) -> binrw::Endian {
    match order {
        ByteOrder::Little => binrw::Endian::Little,
        ByteOrder::Big => binrw::Endian::Big,
    }
}

/// Rounds `n` up to the next multiple of [`CHUNK_ALIGNMENT`].
pub fn align_up(n: u64) -> u64 {
    let a = CHUNK_ALIGNMENT;
    (n + a - 1) / a * a
}

/// The 32-byte header preceding every chunk's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct ChunkHeader {
    pub timestamp: u64,
    pub ref_master_table_index: u32,
    pub offset_to_previous_chunk: u32,
    /// Includes the header itself: `payload_size = size - CHUNK_HEADER_SIZE`.
    pub size: u32,
    pub stream_id: u16,
    pub flags: u16,
    pub stream_index: u64,
}

impl ChunkHeader {
    pub fn payload_size(&self) -> u32 {
        self.size.saturating_sub(CHUNK_HEADER_SIZE as u32)
    }

    pub fn is_keydata(&self) -> bool {
        self.flags & CHUNK_FLAG_KEYDATA != 0
    }

    pub fn read(buf: &[u8; CHUNK_HEADER_SIZE as usize], order: ByteOrder) -> IfhdResult<Self> {
        let mut cursor = std::io::Cursor::new(&buf[..]);
        ChunkHeader::read_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("malformed chunk header: {e}")))
    }

    pub fn write(&self, order: ByteOrder) -> IfhdResult<[u8; CHUNK_HEADER_SIZE as usize]> {
        let mut out = [0u8; CHUNK_HEADER_SIZE as usize];
        let mut cursor = std::io::Cursor::new(&mut out[..]);
        self.write_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("failed to write chunk header: {e}")))?;
        Ok(out)
    }

    /// Applied to every freshly parsed chunk header: subtracts the index
    /// offsets introduced by history drops so values reflect the current
    /// logical view.
    pub fn adjust(&mut self, index_table_offset: u32, index_offset: u64) {
        self.ref_master_table_index = self.ref_master_table_index.saturating_sub(index_table_offset);
        self.stream_index = self.stream_index.saturating_sub(index_offset);
    }
}

/// A master-table entry (44 bytes): describes one indexed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct ChunkRef {
    pub timestamp: u64,
    pub size: u32,
    pub stream_id: u16,
    pub flags: u16,
    pub chunk_offset: u64,
    pub chunk_index: u64,
    pub stream_index: u64,
    pub ref_stream_table_index: u32,
}

impl ChunkRef {
    pub fn is_keydata(&self) -> bool {
        self.flags & CHUNK_FLAG_KEYDATA != 0
    }

    pub fn read(buf: &[u8; CHUNK_REF_SIZE as usize], order: ByteOrder) -> IfhdResult<Self> {
        let mut cursor = std::io::Cursor::new(&buf[..]);
        ChunkRef::read_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("malformed chunk ref: {e}")))
    }

    pub fn write(&self, order: ByteOrder) -> IfhdResult<[u8; CHUNK_REF_SIZE as usize]> {
        let mut out = [0u8; CHUNK_REF_SIZE as usize];
        let mut cursor = std::io::Cursor::new(&mut out[..]);
        self.write_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("failed to write chunk ref: {e}")))?;
        Ok(out)
    }
}

/// A per-stream-table entry (4 bytes): the index into the master table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct StreamRef {
    pub ref_master_table_index: u32,
}

impl StreamRef {
    pub fn read(buf: &[u8; STREAM_REF_SIZE as usize], order: ByteOrder) -> IfhdResult<Self> {
        let mut cursor = std::io::Cursor::new(&buf[..]);
        StreamRef::read_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("malformed stream ref: {e}")))
    }

    pub fn write(&self, order: ByteOrder) -> IfhdResult<[u8; STREAM_REF_SIZE as usize]> {
        let mut out = [0u8; STREAM_REF_SIZE as usize];
        let mut cursor = std::io::Cursor::new(&mut out[..]);
        self.write_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("failed to write stream ref: {e}")))?;
        Ok(out)
    }
}

/// Written as the prefix of extension `index{N}`: per-stream bookkeeping and name.
#[derive(Debug, Clone)]
pub struct StreamInfoHeader {
    pub stream_index_count: u64,
    pub first_time: u64,
    pub last_time: u64,
    pub info_data_size: u32,
    pub name: String,
}

#[derive(BinRead, BinWrite)]
struct RawStreamInfoHeader {
    stream_index_count: u64,
    first_time: u64,
    last_time: u64,
    info_data_size: u32,
    name: [u8; MAX_STREAM_NAME_LEN],
}

const _: () = {
    let size = 8 + 8 + 8 + 4 + MAX_STREAM_NAME_LEN;
    assert!(size as u64 == STREAM_INFO_HEADER_SIZE);
};

impl StreamInfoHeader {
    pub fn read(buf: &[u8; STREAM_INFO_HEADER_SIZE as usize], order: ByteOrder) -> IfhdResult<Self> {
        let mut cursor = std::io::Cursor::new(&buf[..]);
        let raw = RawStreamInfoHeader::read_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("malformed stream info header: {e}")))?;
        let end = raw.name.iter().position(|&b| b == 0).unwrap_or(raw.name.len());
        Ok(StreamInfoHeader {
            stream_index_count: raw.stream_index_count,
            first_time: raw.first_time,
            last_time: raw.last_time,
            info_data_size: raw.info_data_size,
            name: String::from_utf8_lossy(&raw.name[..end]).into_owned(),
        })
    }

    pub fn write(&self, order: ByteOrder) -> IfhdResult<[u8; STREAM_INFO_HEADER_SIZE as usize]> {
        if self.name.len() >= MAX_STREAM_NAME_LEN {
            return Err(IfhdError::invalid_argument("stream name too long"));
        }
        let mut name = [0u8; MAX_STREAM_NAME_LEN];
        name[..self.name.len()].copy_from_slice(self.name.as_bytes());
        let raw = RawStreamInfoHeader {
            stream_index_count: self.stream_index_count,
            first_time: self.first_time,
            last_time: self.last_time,
            info_data_size: self.info_data_size,
            name,
        };
        let mut out = [0u8; STREAM_INFO_HEADER_SIZE as usize];
        let mut cursor = std::io::Cursor::new(&mut out[..]);
        raw.write_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("failed to write stream info header: {e}")))?;
        Ok(out)
    }
}

/// Written as extension `index_add{N}`: offsets introduced by history drops.
/// Readers subtract these from raw indices to obtain logical ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
pub struct AdditionalIndexInfo {
    pub stream_index_offset: u64,
    pub stream_table_index_offset: u32,
    reserved: [u8; 20],
}

impl AdditionalIndexInfo {
    pub fn new(stream_index_offset: u64, stream_table_index_offset: u32) -> Self {
        Self {
            stream_index_offset,
            stream_table_index_offset,
            reserved: [0u8; 20],
        }
    }

    pub fn read(buf: &[u8; ADDITIONAL_INDEX_INFO_SIZE as usize], order: ByteOrder) -> IfhdResult<Self> {
        let mut cursor = std::io::Cursor::new(&buf[..]);
        AdditionalIndexInfo::read_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("malformed additional index info: {e}")))
    }

    pub fn write(&self, order: ByteOrder) -> IfhdResult<[u8; ADDITIONAL_INDEX_INFO_SIZE as usize]> {
        let mut out = [0u8; ADDITIONAL_INDEX_INFO_SIZE as usize];
        let mut cursor = std::io::Cursor::new(&mut out[..]);
        self.write_options(&mut cursor, endian_of(order), ())
            .map_err(|e| IfhdError::invalid_file(format!("failed to write additional index info: {e}")))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_16() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 16);
        assert_eq!(align_up(16), 16);
        assert_eq!(align_up(17), 32);
    }

    #[test]
    fn chunk_header_round_trips_both_orders() {
        let h = ChunkHeader {
            timestamp: 123456789,
            ref_master_table_index: 7,
            offset_to_previous_chunk: 96,
            size: 128,
            stream_id: 3,
            flags: CHUNK_FLAG_KEYDATA,
            stream_index: 42,
        };
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let bytes = h.write(order).unwrap();
            let back = ChunkHeader::read(&bytes, order).unwrap();
            assert_eq!(h, back);
        }
    }

    #[test]
    fn adjust_subtracts_history_offsets() {
        let mut h = ChunkHeader {
            timestamp: 0,
            ref_master_table_index: 10,
            offset_to_previous_chunk: 0,
            size: CHUNK_HEADER_SIZE as u32,
            stream_id: 1,
            flags: 0,
            stream_index: 100,
        };
        h.adjust(3, 40);
        assert_eq!(h.ref_master_table_index, 7);
        assert_eq!(h.stream_index, 60);
    }

    #[test]
    fn stream_info_header_round_trips() {
        let h = StreamInfoHeader {
            stream_index_count: 5,
            first_time: 1,
            last_time: 100,
            info_data_size: 0,
            name: "camera_front".to_string(),
        };
        let bytes = h.write(ByteOrder::Little).unwrap();
        let back = StreamInfoHeader::read(&bytes, ByteOrder::Little).unwrap();
        assert_eq!(back.name, "camera_front");
        assert_eq!(back.stream_index_count, 5);
    }
}
