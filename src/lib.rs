#![doc = include_str!("../README.md")]

pub mod chunk;
pub mod error;
pub mod extension;
pub mod header;
pub mod index;
pub mod io;
pub mod legacy;
pub mod reader;
pub mod registry;
pub mod ring;
pub mod writer;

pub use error::{IfhdError, IfhdResult};
pub use extension::{write_extension, Extension, ExtensionCatalog};
pub use header::FileHeader;
pub use reader::{Reader, SeekFlags, SeekFormat};
pub use writer::{Writer, WriterConfig};

/// Magic bytes that open every IFHD file: ASCII `I`, `F`, `H`, `D`.
pub const MAGIC: [u8; 4] = *b"IFHD";

/// The `u32` representation of [`MAGIC`] as it is actually stored on a
/// little-endian-order file.
pub const MAGIC_LE_U32: u32 = 0x4448_4649;

/// Highest stream id a chunk may belong to. Stream id `0` is reserved for
/// whole-file/master operations.
pub const MAX_STREAMS: u16 = 512;

/// Length in bytes of an extension identifier field.
pub const MAX_EXTENSION_IDENTIFIER_LEN: usize = 384;

/// Length in bytes of a stream name field.
pub const MAX_STREAM_NAME_LEN: usize = 228;

/// Every chunk header begins on a boundary that is a multiple of this many bytes.
pub const CHUNK_ALIGNMENT: u64 = 16;

/// Padding byte value written between a chunk's payload and the next chunk
/// header. Readers must ignore it, never assume it.
pub const PADDING_BYTE: u8 = 0xEE;

/// Default minimum wall-clock gap, in microseconds, between successive
/// per-stream master-index entries. See [`index`].
pub const DEFAULT_INDEX_DELAY_US: u64 = 1_000_000;

/// File format version identifiers this crate understands, in the order they
/// were introduced. See [`header::Version`].
pub mod version {
    /// ADTF 2.0 through 2.12, no history support. Compatibility-mode only.
    pub const V0100: u32 = 0x0100;
    /// ADTF 2.13 legacy variant. Compatibility-mode only.
    pub const V0110: u32 = 0x0110;
    /// Beta of the 2.x-with-history layout; treated like [`V0201`] on read.
    pub const V0200: u32 = 0x0200;
    /// ADTF 2.0-2.12 (no history) / early 2.13.
    pub const V0201: u32 = 0x0201;
    /// ADTF >= 2.13 with file-buffered history, ring-buffer-end not yet stored.
    pub const V0300: u32 = 0x0300;
    /// ADTF >= 2.13.1 with file-buffered history, ring-buffer-end stored.
    pub const V0301: u32 = 0x0301;
    /// ADTF 3.x, microsecond timestamps.
    pub const V0400: u32 = 0x0400;
    /// Current version: nanosecond timestamps.
    pub const V0500: u32 = 0x0500;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_round_trips_through_le_u32() {
        assert_eq!(u32::from_le_bytes(MAGIC), MAGIC_LE_U32);
    }
}
