//! The extension catalog: arbitrary named binary blobs stored alongside chunks.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use binrw::{BinRead, BinWrite};

use crate::error::{IfhdError, IfhdResult};
use crate::header::{ByteOrder, FileHeader, HEADER_SIZE};
use crate::MAX_EXTENSION_IDENTIFIER_LEN;

/// Identifier reserved for the writer-generated file GUID; never user-writable.
pub const RESERVED_GUID_IDENTIFIER: &str = "GUID";

/// Reserved identifier prefixes for index-table extensions.
pub const RESERVED_INDEX_PREFIX: &str = "index";
pub const RESERVED_INDEX_ADD_PREFIX: &str = "index_add";

/// Size in bytes of one on-disk extension descriptor.
pub const EXTENSION_DESCRIPTOR_SIZE: u64 = 512;

const RESERVED1_LEN: usize = 2;
const RESERVED_LEN: usize = 96;

/// One entry in the extension table (512 bytes on disk).
#[derive(Debug, Clone)]
pub struct ExtensionDescriptor {
    pub identifier: String,
    pub stream_id: u16,
    pub user_id: u32,
    pub type_id: u32,
    pub version_id: u32,
    pub data_offset: u64,
    pub data_size: u64,
}

#[derive(BinRead, BinWrite)]
struct RawExtensionDescriptor {
    identifier: [u8; MAX_EXTENSION_IDENTIFIER_LEN],
    stream_id: u16,
    reserved1: [u8; RESERVED1_LEN],
    user_id: u32,
    type_id: u32,
    version_id: u32,
    data_offset: u64,
    data_size: u64,
    reserved: [u8; RESERVED_LEN],
}

const _: () = {
    let size = MAX_EXTENSION_IDENTIFIER_LEN + 2 + RESERVED1_LEN + 4 + 4 + 4 + 8 + 8 + RESERVED_LEN;
    assert!(size as u64 == EXTENSION_DESCRIPTOR_SIZE);
};

impl ExtensionDescriptor {
    fn from_raw(raw: RawExtensionDescriptor) -> Self {
        let end = raw
            .identifier
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(raw.identifier.len());
        ExtensionDescriptor {
            identifier: String::from_utf8_lossy(&raw.identifier[..end]).into_owned(),
            stream_id: raw.stream_id,
            user_id: raw.user_id,
            type_id: raw.type_id,
            version_id: raw.version_id,
            data_offset: raw.data_offset,
            data_size: raw.data_size,
        }
    }

    fn to_raw(&self) -> IfhdResult<RawExtensionDescriptor> {
        let bytes = self.identifier.as_bytes();
        if bytes.len() >= MAX_EXTENSION_IDENTIFIER_LEN {
            return Err(IfhdError::invalid_argument("extension identifier too long"));
        }
        let mut identifier = [0u8; MAX_EXTENSION_IDENTIFIER_LEN];
        identifier[..bytes.len()].copy_from_slice(bytes);
        Ok(RawExtensionDescriptor {
            identifier,
            stream_id: self.stream_id,
            reserved1: [0u8; RESERVED1_LEN],
            user_id: self.user_id,
            type_id: self.type_id,
            version_id: self.version_id,
            data_offset: self.data_offset,
            data_size: self.data_size,
            reserved: [0u8; RESERVED_LEN],
        })
    }

    fn read(buf: &[u8], endian: binrw::Endian) -> IfhdResult<Self> {
        let mut cursor = std::io::Cursor::new(buf);
        let raw = RawExtensionDescriptor::read_options(&mut cursor, endian, ())
            .map_err(|e| IfhdError::invalid_file(format!("malformed extension descriptor: {e}")))?;
        Ok(Self::from_raw(raw))
    }

    fn write(&self, endian: binrw::Endian) -> IfhdResult<Vec<u8>> {
        let raw = self.to_raw()?;
        let mut buf = Vec::with_capacity(EXTENSION_DESCRIPTOR_SIZE as usize);
        let mut cursor = std::io::Cursor::new(&mut buf);
        raw.write_options(&mut cursor, endian, ())
            .map_err(|e| IfhdError::invalid_file(format!("failed to write extension descriptor: {e}")))?;
        Ok(buf)
    }
}

/// An in-memory extension: its descriptor plus owned payload bytes.
#[derive(Debug, Clone)]
pub struct Extension {
    pub descriptor: ExtensionDescriptor,
    pub data: Vec<u8>,
}

/// Owns the in-memory extension list and payloads for a file being written,
/// or the parsed extensions of a file that has been opened for reading.
#[derive(Debug, Default)]
pub struct ExtensionCatalog {
    extensions: Vec<Extension>,
}

impl ExtensionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Appends a new extension in memory. Materialization to disk happens at
    /// writer close. Rejects the reserved `GUID` identifier and empty
    /// identifiers, with `InvalidArgument`.
    pub fn append_extension(
        &mut self,
        identifier: &str,
        data: Vec<u8>,
        user_id: u32,
        type_id: u32,
        version_id: u32,
        stream_id: u16,
    ) -> IfhdResult<()> {
        if identifier.is_empty() {
            return Err(IfhdError::invalid_argument("extension identifier is empty"));
        }
        if identifier == RESERVED_GUID_IDENTIFIER {
            return Err(IfhdError::invalid_argument(
                "GUID is a reserved identifier and cannot be appended externally",
            ));
        }
        self.extensions.push(Extension {
            descriptor: ExtensionDescriptor {
                identifier: identifier.to_string(),
                stream_id,
                user_id,
                type_id,
                version_id,
                data_offset: 0,
                data_size: data.len() as u64,
            },
            data,
        });
        Ok(())
    }

    /// Appends a reserved-identifier extension (index tables, GUID). Used
    /// internally by the writer at close time; bypasses the `GUID` guard.
    pub(crate) fn append_reserved(&mut self, identifier: &str, data: Vec<u8>, stream_id: u16) {
        self.extensions.push(Extension {
            descriptor: ExtensionDescriptor {
                identifier: identifier.to_string(),
                stream_id,
                user_id: 0,
                type_id: 0,
                version_id: 0,
                data_offset: 0,
                data_size: data.len() as u64,
            },
            data,
        });
    }

    /// Updates the user/type/version ids of an already-appended extension,
    /// used by the writer once a `get_extension_stream` handle's accumulated
    /// bytes are materialized at close.
    pub(crate) fn set_ids(&mut self, identifier: &str, user_id: u32, type_id: u32, version_id: u32) {
        if let Some(ext) = self.extensions.iter_mut().find(|e| e.descriptor.identifier == identifier) {
            ext.descriptor.user_id = user_id;
            ext.descriptor.type_id = type_id;
            ext.descriptor.version_id = version_id;
        }
    }

    pub fn find_extension(&self, identifier: &str) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.descriptor.identifier == identifier)
    }

    pub fn get_extension(&self, index: usize) -> IfhdResult<&Extension> {
        self.extensions
            .get(index)
            .ok_or_else(|| IfhdError::out_of_range(format!("extension index {index} out of range")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.iter()
    }

    /// Lays out payloads contiguously starting at `start_offset` and returns
    /// `(payload_bytes, descriptor_table_bytes)` ready to be written after the
    /// data region, in the byte order recorded by `order`.
    pub(crate) fn materialize(
        &mut self,
        start_offset: u64,
        order: ByteOrder,
    ) -> IfhdResult<(Vec<u8>, Vec<u8>)> {
        let endian = match order {
            ByteOrder::Little => binrw::Endian::Little,
            ByteOrder::Big => binrw::Endian::Big,
        };

        let mut payloads = Vec::new();
        let mut offset = start_offset;
        for ext in &mut self.extensions {
            ext.descriptor.data_offset = offset;
            ext.descriptor.data_size = ext.data.len() as u64;
            payloads.extend_from_slice(&ext.data);
            offset += ext.data.len() as u64;
        }

        let mut table = Vec::with_capacity(self.extensions.len() * EXTENSION_DESCRIPTOR_SIZE as usize);
        for ext in &self.extensions {
            table.extend_from_slice(&ext.descriptor.write(endian)?);
        }

        Ok((payloads, table))
    }

    /// Parses the extension table located at `header.extension_offset`, along
    /// with the payload bytes preceding it, from a whole-file byte buffer.
    pub fn parse(buf: &[u8], header: &FileHeader) -> IfhdResult<Self> {
        let endian = match header.header_byte_order {
            ByteOrder::Little => binrw::Endian::Little,
            ByteOrder::Big => binrw::Endian::Big,
        };

        let mut extensions = Vec::with_capacity(header.extension_count as usize);
        for i in 0..header.extension_count as u64 {
            let start = header.extension_offset + i * EXTENSION_DESCRIPTOR_SIZE;
            let end = start + EXTENSION_DESCRIPTOR_SIZE;
            let raw = buf
                .get(start as usize..end as usize)
                .ok_or_else(|| IfhdError::invalid_file("truncated extension table"))?;
            let descriptor = ExtensionDescriptor::read(raw, endian)?;

            let data_start = descriptor.data_offset as usize;
            let data_end = data_start + descriptor.data_size as usize;
            let data = buf
                .get(data_start..data_end)
                .ok_or_else(|| IfhdError::invalid_file("truncated extension payload"))?
                .to_vec();

            extensions.push(Extension { descriptor, data });
        }

        Ok(Self { extensions })
    }
}

/// Out-of-class helper: in-place update of an existing file's extension,
/// following the four rules below.
///
/// Opens `path` for read-write, updates (or appends) the named extension, and
/// rewrites the extension table and header as necessary.
pub fn write_extension(
    path: impl AsRef<Path>,
    identifier: &str,
    data: &[u8],
    user_id: u32,
    type_id: u32,
    version_id: u32,
    stream_id: u16,
) -> IfhdResult<()> {
    if identifier.is_empty() {
        return Err(IfhdError::invalid_argument("extension identifier is empty"));
    }
    if identifier == RESERVED_GUID_IDENTIFIER {
        return Err(IfhdError::invalid_argument(
            "GUID is a reserved identifier and cannot be modified externally",
        ));
    }

    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)?;

    let mut whole = Vec::new();
    file.read_to_end(&mut whole)?;

    let mut header_bytes = [0u8; HEADER_SIZE as usize];
    header_bytes.copy_from_slice(&whole[0..HEADER_SIZE as usize]);
    let mut header = FileHeader::parse(&header_bytes)?;
    let mut catalog = ExtensionCatalog::parse(&whole, &header)?;

    let existing_index = catalog
        .extensions
        .iter()
        .position(|e| e.descriptor.identifier == identifier);

    match existing_index {
        Some(idx) => {
            // Rules 1-3: overwrite in place whether shrinking, equal-sized,
            // last, or growing in the middle. `materialize` below always
            // relays every payload out contiguously, so a grow-in-the-middle
            // naturally shifts the extensions that follow.
            catalog.extensions[idx].data = data.to_vec();
            catalog.extensions[idx].descriptor.data_size = data.len() as u64;
            catalog.extensions[idx].descriptor.user_id = user_id;
            catalog.extensions[idx].descriptor.type_id = type_id;
            catalog.extensions[idx].descriptor.version_id = version_id;
            catalog.extensions[idx].descriptor.stream_id = stream_id;
        }
        None => {
            // Rule 4: append after existing payloads.
            catalog.append_reserved(identifier, data.to_vec(), stream_id);
            let last = catalog.extensions.last_mut().unwrap();
            last.descriptor.user_id = user_id;
            last.descriptor.type_id = type_id;
            last.descriptor.version_id = version_id;
        }
    }

    let (payloads, table) = catalog.materialize(header.data_offset + header.data_size, header.header_byte_order)?;

    header.extension_count = catalog.len() as u32;
    header.extension_offset = header.data_offset + header.data_size + payloads.len() as u64;

    file.seek(SeekFrom::Start(header.data_offset + header.data_size))?;
    file.write_all(&payloads)?;
    file.write_all(&table)?;
    file.set_len(header.extension_offset + table.len() as u64)?;

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.serialize()?)?;
    file.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_test_file(path: &Path, extensions: &[(&str, &[u8])]) {
        let mut header = FileHeader::default();
        header.data_offset = HEADER_SIZE;
        header.data_size = 0;

        let mut catalog = ExtensionCatalog::new();
        for (id, data) in extensions {
            catalog.append_reserved(id, data.to_vec(), 0);
        }
        let (payloads, table) = catalog
            .materialize(header.data_offset + header.data_size, header.header_byte_order)
            .unwrap();
        header.extension_count = catalog.len() as u32;
        header.extension_offset = header.data_offset + header.data_size + payloads.len() as u64;

        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&header.serialize().unwrap()).unwrap();
        file.write_all(&payloads).unwrap();
        file.write_all(&table).unwrap();
    }

    #[test]
    fn grow_shrink_and_append_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.ifhd");
        write_test_file(
            &path,
            &[
                ("ext1", &[1u8; 121]),
                ("ext2", &[2u8; 251]),
                ("ext3", &[3u8; 511]),
                ("ext4", &[4u8; 1021]),
            ],
        );

        write_extension(&path, "ext1", &[9u8; 50], 0, 0, 0, 0).unwrap();
        write_extension(&path, "ext2", &[5u8; 251], 0, 0, 0, 0).unwrap();
        write_extension(&path, "ext3", &[6u8; 600], 0, 0, 0, 0).unwrap();
        write_extension(&path, "ext4", &[7u8; 1024], 0, 0, 0, 0).unwrap();
        write_extension(&path, "ext5", &[8u8; 700], 0, 0, 0, 0).unwrap();

        let whole = std::fs::read(&path).unwrap();
        let mut header_bytes = [0u8; HEADER_SIZE as usize];
        header_bytes.copy_from_slice(&whole[0..HEADER_SIZE as usize]);
        let header = FileHeader::parse(&header_bytes).unwrap();
        assert_eq!(header.extension_count, 5);

        let catalog = ExtensionCatalog::parse(&whole, &header).unwrap();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.find_extension("ext1").unwrap().data, vec![9u8; 50]);
        assert_eq!(catalog.find_extension("ext2").unwrap().data, vec![5u8; 251]);
        assert_eq!(catalog.find_extension("ext3").unwrap().data, vec![6u8; 600]);
        assert_eq!(catalog.find_extension("ext4").unwrap().data, vec![7u8; 1024]);
        assert_eq!(catalog.find_extension("ext5").unwrap().data, vec![8u8; 700]);
    }

    #[test]
    fn guid_is_protected() {
        let mut catalog = ExtensionCatalog::new();
        let err = catalog
            .append_extension(RESERVED_GUID_IDENTIFIER, vec![], 0, 0, 0, 0)
            .unwrap_err();
        assert_matches::assert_matches!(err, IfhdError::InvalidArgument { .. });
    }
}
