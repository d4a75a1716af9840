//! The fixed 2048-byte file header and its byte-order normalization.

use binrw::{BinRead, BinWrite};

use crate::error::{IfhdError, IfhdResult};
use crate::MAGIC_LE_U32;

/// Size in bytes of the on-disk [`FileHeader`] record.
pub const HEADER_SIZE: u64 = 2048;

const DESCRIPTION_LEN: usize = 1912;
const RESERVED_LEN: usize = 30;

/// Byte order a file's management structures (header, extensions, chunk
/// headers, index tables) are stored in. Independent of the host's native
/// order; [`stream_to_host`]/[`host_to_stream`] swap as needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ByteOrder {
    Little = 1,
    Big = 2,
}

impl ByteOrder {
    pub fn host() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    pub fn from_u8(v: u8) -> IfhdResult<Self> {
        match v {
            1 => Ok(ByteOrder::Little),
            2 => Ok(ByteOrder::Big),
            other => Err(IfhdError::invalid_file(format!(
                "unsupported header byte order {other}"
            ))),
        }
    }

    fn binrw_endian(self) -> binrw::Endian {
        match self {
            ByteOrder::Little => binrw::Endian::Little,
            ByteOrder::Big => binrw::Endian::Big,
        }
    }
}

/// The file header, read/written once at offset 0.
///
/// Fields mirror the on-disk layout exactly; `description` is split on
/// demand into a short/long pair by [`FileHeader::short_description`] /
/// [`FileHeader::long_description`].
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub version_id: u32,
    pub flags: u32,
    pub extension_count: u32,
    pub extension_offset: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub chunk_count: u64,
    pub max_chunk_size: u64,
    pub duration: u64,
    pub file_time: u64,
    pub header_byte_order: ByteOrder,
    pub time_offset: u64,
    pub patch_number: u8,
    pub first_chunk_offset: u64,
    pub continuous_offset: u64,
    pub ring_buffer_end_offset: u64,
    description: Vec<u8>,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            version_id: crate::version::V0500,
            flags: 0,
            extension_count: 0,
            extension_offset: HEADER_SIZE,
            data_offset: HEADER_SIZE,
            data_size: 0,
            chunk_count: 0,
            max_chunk_size: 0,
            duration: 0,
            file_time: 0,
            header_byte_order: ByteOrder::host(),
            time_offset: 0,
            patch_number: 0,
            first_chunk_offset: HEADER_SIZE,
            continuous_offset: HEADER_SIZE,
            ring_buffer_end_offset: HEADER_SIZE,
            description: Vec::new(),
        }
    }
}

impl FileHeader {
    /// Invariant: `data_offset <= first_chunk_offset <= ring_buffer_end_offset`.
    pub fn check_offset_invariant(&self) -> IfhdResult<()> {
        if self.data_offset <= self.first_chunk_offset
            && self.first_chunk_offset <= self.ring_buffer_end_offset
        {
            Ok(())
        } else {
            Err(IfhdError::invalid_file(
                "data_offset <= first_chunk_offset <= ring_buffer_end_offset violated",
            ))
        }
    }

    pub fn set_description(&mut self, text: &str) {
        self.description = text.as_bytes().to_vec();
        self.description.truncate(DESCRIPTION_LEN);
    }

    pub fn description(&self) -> String {
        String::from_utf8_lossy(&self.description).into_owned()
    }

    /// The portion of the description up to (not including) the first `\n`.
    pub fn short_description(&self) -> String {
        let full = self.description();
        full.split('\n').next().unwrap_or("").to_string()
    }

    /// The portion of the description after the first `\n`, or empty.
    pub fn long_description(&self) -> String {
        let full = self.description();
        match full.split_once('\n') {
            Some((_, rest)) => rest.to_string(),
            None => String::new(),
        }
    }

    pub fn set_date_time(&mut self, unix_seconds: u64) {
        self.file_time = unix_seconds;
    }

    pub fn date_time(&self) -> u64 {
        self.file_time
    }

    /// Deserialize the header from its raw 2048-byte on-disk form, swapping
    /// multi-byte fields if the stored byte order differs from the host's.
    pub fn parse(buf: &[u8; HEADER_SIZE as usize]) -> IfhdResult<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC_LE_U32 {
            let swapped = u32::from_be_bytes(buf[0..4].try_into().unwrap());
            if swapped != MAGIC_LE_U32 {
                return Err(IfhdError::invalid_file("magic mismatch"));
            }
        }

        let byte_order = ByteOrder::from_u8(buf[72])?;
        let endian = byte_order.binrw_endian();

        let mut cursor = std::io::Cursor::new(&buf[4..]);
        let raw = RawHeaderTail::read_options(&mut cursor, endian, ())
            .map_err(|e| IfhdError::invalid_file(format!("malformed header: {e}")))?;

        Ok(FileHeader {
            version_id: raw.version_id,
            flags: raw.flags,
            extension_count: raw.extension_count,
            extension_offset: raw.extension_offset,
            data_offset: raw.data_offset,
            data_size: raw.data_size,
            chunk_count: raw.chunk_count,
            max_chunk_size: raw.max_chunk_size,
            duration: raw.duration,
            file_time: raw.file_time,
            header_byte_order: byte_order,
            time_offset: raw.time_offset,
            patch_number: raw.patch_number,
            first_chunk_offset: raw.first_chunk_offset,
            continuous_offset: raw.continuous_offset,
            ring_buffer_end_offset: raw.ring_buffer_end_offset,
            description: {
                let end = raw
                    .description
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(raw.description.len());
                raw.description[..end].to_vec()
            },
        })
    }

    /// Serialize the header to its raw 2048-byte on-disk form, swapping
    /// multi-byte fields to `header_byte_order` if it differs from the host's.
    pub fn serialize(&self) -> IfhdResult<[u8; HEADER_SIZE as usize]> {
        let endian = self.header_byte_order.binrw_endian();
        let mut out = [0u8; HEADER_SIZE as usize];
        out[0..4].copy_from_slice(&MAGIC_LE_U32.to_le_bytes());

        let mut description = [0u8; DESCRIPTION_LEN];
        let n = self.description.len().min(DESCRIPTION_LEN);
        description[..n].copy_from_slice(&self.description[..n]);

        let raw = RawHeaderTail {
            version_id: self.version_id,
            flags: self.flags,
            extension_count: self.extension_count,
            extension_offset: self.extension_offset,
            data_offset: self.data_offset,
            data_size: self.data_size,
            chunk_count: self.chunk_count,
            max_chunk_size: self.max_chunk_size,
            duration: self.duration,
            file_time: self.file_time,
            header_byte_order: self.header_byte_order as u8,
            time_offset: self.time_offset,
            patch_number: self.patch_number,
            first_chunk_offset: self.first_chunk_offset,
            continuous_offset: self.continuous_offset,
            ring_buffer_end_offset: self.ring_buffer_end_offset,
            reserved: [0u8; RESERVED_LEN],
            description,
        };

        let mut cursor = std::io::Cursor::new(&mut out[4..]);
        raw.write_options(&mut cursor, endian, ())
            .map_err(|e| IfhdError::invalid_file(format!("failed to serialize header: {e}")))?;
        Ok(out)
    }
}

#[derive(BinRead, BinWrite)]
struct RawHeaderTail {
    version_id: u32,
    flags: u32,
    extension_count: u32,
    extension_offset: u64,
    data_offset: u64,
    data_size: u64,
    chunk_count: u64,
    max_chunk_size: u64,
    duration: u64,
    file_time: u64,
    header_byte_order: u8,
    time_offset: u64,
    patch_number: u8,
    first_chunk_offset: u64,
    continuous_offset: u64,
    ring_buffer_end_offset: u64,
    reserved: [u8; RESERVED_LEN],
    description: [u8; DESCRIPTION_LEN],
}

// Compile-time size sanity check: keeps the reserved/description split
// consistent with the 2048-byte on-disk header any time a field is added.
const _: () = {
    const MAGIC_LEN: usize = 4;
    let tail = MAGIC_LEN
        + 4 + 4 + 4 + 8 + 8 + 8 + 8 + 8 + 8 + 8 + 1 + 8 + 1 + 8 + 8 + 8
        + RESERVED_LEN
        + DESCRIPTION_LEN;
    assert!(tail as u64 == HEADER_SIZE);
};


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_splits_on_first_newline() {
        let mut h = FileHeader::default();
        h.set_description("short\nlong part one\nlong part two");
        assert_eq!(h.short_description(), "short");
        assert_eq!(h.long_description(), "long part one\nlong part two");
    }

    #[test]
    fn header_round_trips() {
        let mut h = FileHeader::default();
        h.set_description("round\ntrip");
        h.chunk_count = 42;
        h.data_size = 123456;
        let bytes = h.serialize().unwrap();
        let back = FileHeader::parse(&bytes).unwrap();
        assert_eq!(back.chunk_count, 42);
        assert_eq!(back.data_size, 123456);
        assert_eq!(back.description(), "round\ntrip");
    }

    #[test]
    fn offset_invariant_enforced() {
        let mut h = FileHeader::default();
        h.first_chunk_offset = h.data_offset - 1;
        assert!(h.check_offset_invariant().is_err());
    }
}
