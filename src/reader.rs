//! The reader engine: open/dispatch, sequential iteration, and seeking
//! across both the current wire format and the legacy compatibility layer.

use enumset::{EnumSet, EnumSetType};

use crate::chunk::{align_up, ChunkHeader, CHUNK_HEADER_SIZE};
use crate::error::{IfhdError, IfhdResult};
use crate::extension::{Extension, ExtensionCatalog};
use crate::header::{ByteOrder, FileHeader, HEADER_SIZE};
use crate::index::ReadIndexTables;
use crate::io::{AlignedFile, OpenOption, SeekAnchor};
use crate::legacy::LegacyReader;
use crate::version;

/// Recognized open-mode options.
#[derive(Debug, EnumSetType)]
pub enum ReadOption {
    ReadOnly,
    FileChangeMode,
    BypassSystemCache,
    QueryInfo,
}
pub type ReadOptions = EnumSet<ReadOption>;

/// Format a `seek` position is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFormat {
    /// 0-based, global across all streams.
    ChunkIndex,
    /// Absolute timestamp, nanoseconds or microseconds depending on file version.
    ChunkTime,
    /// 0-based, local to one stream.
    StreamIndex,
}

/// Bits modifying [`Reader::seek`]'s matching behavior.
#[derive(Debug, EnumSetType)]
pub enum SeekFlag {
    /// Resolve using only the index table; no payload reads.
    Keydata,
    /// Stop at the latest chunk at-or-before `position` instead of the first at-or-after.
    Before,
}
pub type SeekFlags = EnumSet<SeekFlag>;

/// Bits modifying [`Reader::read_chunk`].
#[derive(Debug, EnumSetType)]
pub enum ReadChunkFlag {
    UseExternalBuffer,
    Backwards,
}
pub type ReadChunkFlags = EnumSet<ReadChunkFlag>;

const BEFORE_LOOKAHEAD_US: u64 = 1_100_000;

struct CurrentReader {
    whole: Vec<u8>,
    header: FileHeader,
    extensions: ExtensionCatalog,
    index: ReadIndexTables,
    pos: u64,
}

enum Backend {
    Current(CurrentReader),
    Legacy(LegacyReader),
}

/// Reads an IFHD file: dispatches to the current-format in-memory engine or,
/// for `version_id` `0x0100`/`0x0110`, to the embedded [`LegacyReader`].
pub struct Reader {
    backend: Backend,
    query_info_only: bool,
    legacy_storage_info: Option<Extension>,
}

fn is_ns_version(version_id: u32) -> bool {
    version_id >= version::V0500
}

fn ns_for(version_id: u32, timestamp: u64) -> u64 {
    if is_ns_version(version_id) {
        timestamp
    } else {
        timestamp.saturating_mul(1000)
    }
}

/// Inverse of [`ns_for`]: downconverts an external nanosecond timestamp to
/// the unit chunk timestamps are actually stored in on disk for `version_id`.
fn native_for(version_id: u32, timestamp_ns: u64) -> u64 {
    if is_ns_version(version_id) {
        timestamp_ns
    } else {
        timestamp_ns / 1000
    }
}

/// Reads the chunk header at `c.pos` without advancing, normalizing history
/// offsets and the timestamp unit. A free function (not a `Reader` method) so
/// it can be called while a caller already holds `&mut self.backend`.
fn read_chunk_header_current(c: &mut CurrentReader) -> IfhdResult<ChunkHeader> {
    let end = c.header.ring_buffer_end_offset.max(c.header.data_offset + c.header.data_size);
    if c.pos + CHUNK_HEADER_SIZE > end {
        return Err(IfhdError::EndOfFile);
    }
    let buf: [u8; CHUNK_HEADER_SIZE as usize] = c.whole[c.pos as usize..(c.pos + CHUNK_HEADER_SIZE) as usize]
        .try_into()
        .map_err(|_| IfhdError::invalid_file("truncated chunk header"))?;
    let mut header = ChunkHeader::read(&buf, c.header.header_byte_order)?;
    c.index.adjust_chunk_header(&mut header);
    header.timestamp = ns_for(c.header.version_id, header.timestamp);
    Ok(header)
}

impl Reader {
    /// Opens `path`, reads the header at offset 0, and dispatches by
    /// `version_id`. `query_info` mode reads only the header and extension
    /// table and never iterates chunk payloads.
    pub fn open(path: impl AsRef<std::path::Path>, options: ReadOptions) -> IfhdResult<Self> {
        let mut aligned_flags = EnumSet::empty();
        aligned_flags.insert(OpenOption::Read);
        if options.contains(ReadOption::BypassSystemCache) {
            aligned_flags.insert(OpenOption::BypassSystemCache);
        }
        if options.contains(ReadOption::FileChangeMode) {
            // Tolerates concurrent growth by a live writer.
            aligned_flags.insert(OpenOption::SharedWrite);
        } else {
            aligned_flags.insert(OpenOption::SharedRead);
        }

        let mut file = AlignedFile::open(path.as_ref(), aligned_flags)?;
        let len = std::fs::metadata(path.as_ref())?.len();
        let mut whole = vec![0u8; len as usize];
        file.set_file_pos(0, SeekAnchor::Begin)?;
        file.read_all(&mut whole)?;

        if whole.len() < 8 {
            return Err(IfhdError::invalid_file("file too small to contain a header"));
        }
        // Both the current and legacy header layouts store `version_id` as
        // the second little-endian u32, regardless of whether byte 0 holds
        // the `IFHD` magic (current) or a legacy `file_id` (legacy).
        let version_id = u32::from_le_bytes(whole[4..8].try_into().unwrap());

        let backend = match version_id {
            version::V0100 | version::V0110 => {
                log::warn!("file version 0x{version_id:04x} predates the current format, falling back to the legacy decoder");
                let legacy = LegacyReader::open(file, ByteOrder::host())?;
                Backend::Legacy(legacy)
            }
            version::V0200 | version::V0201 | version::V0300 | version::V0301 | version::V0400 | version::V0500 => {
                let mut header_bytes = [0u8; HEADER_SIZE as usize];
                header_bytes.copy_from_slice(&whole[0..HEADER_SIZE as usize]);
                let mut header = FileHeader::parse(&header_bytes)?;
                header.check_offset_invariant()?;

                // Versions before history support had no ring region.
                if header.version_id < version::V0300 {
                    header.first_chunk_offset = header.data_offset;
                    header.continuous_offset = header.data_offset;
                    header.ring_buffer_end_offset = header.data_offset;
                }
                // v0300 never stored `ring_buffer_end_offset`; this engine
                // never produces such files itself, so on read we trust
                // `continuous_offset` as the best available estimate rather
                // than re-deriving it via the back-link heuristic.
                if header.version_id == version::V0300 && header.ring_buffer_end_offset == HEADER_SIZE {
                    header.ring_buffer_end_offset = header.continuous_offset;
                }

                let extensions = ExtensionCatalog::parse(&whole, &header)?;
                let index = ReadIndexTables::read_from_catalog(&extensions, header.header_byte_order)?;
                let pos = header.first_chunk_offset;

                Backend::Current(CurrentReader {
                    whole,
                    header,
                    extensions,
                    index,
                    pos,
                })
            }
            other => {
                return Err(IfhdError::invalid_file(format!("unsupported file version 0x{other:04x}")));
            }
        };

        Ok(Self {
            backend,
            query_info_only: options.contains(ReadOption::QueryInfo),
            legacy_storage_info: None,
        })
    }

    fn ensure_not_info_only(&self) -> IfhdResult<()> {
        if self.query_info_only {
            return Err(IfhdError::illegal_state("reader was opened in query_info mode"));
        }
        Ok(())
    }

    fn nanoseconds_for(&self, timestamp: u64) -> u64 {
        let ns_native = match &self.backend {
            Backend::Current(c) => is_ns_version(c.header.version_id),
            Backend::Legacy(_) => false,
        };
        if ns_native {
            timestamp
        } else {
            timestamp.saturating_mul(1000)
        }
    }

    fn time_offset_ns(&self) -> u64 {
        match &self.backend {
            Backend::Current(c) => ns_for(c.header.version_id, c.header.time_offset),
            Backend::Legacy(_) => 0,
        }
    }

    /// Resets to the first chunk, clearing any cached header state.
    pub fn reset(&mut self) -> IfhdResult<()> {
        self.ensure_not_info_only()?;
        match &mut self.backend {
            Backend::Current(c) => {
                c.pos = c.header.first_chunk_offset;
                Ok(())
            }
            Backend::Legacy(l) => l.reset(),
        }
    }

    /// Reads (or returns the already-parsed) header of the chunk at the
    /// current position, without advancing. Timestamps are always
    /// normalized to nanoseconds.
    pub fn query_chunk_info(&mut self) -> IfhdResult<ChunkHeader> {
        self.ensure_not_info_only()?;
        match &mut self.backend {
            Backend::Current(c) => read_chunk_header_current(c),
            Backend::Legacy(l) => {
                let mut header = l.query_chunk_info()?;
                header.timestamp = header.timestamp.saturating_mul(1000);
                Ok(header)
            }
        }
    }

    /// Reads the current chunk's payload into `buffer`. With `backwards`,
    /// rewinds to the previous chunk afterwards via `offset_to_previous_chunk`.
    pub fn read_chunk(&mut self, buffer: &mut Vec<u8>, flags: ReadChunkFlags) -> IfhdResult<ChunkHeader> {
        self.ensure_not_info_only()?;
        let backwards = flags.contains(ReadChunkFlag::Backwards);

        match &mut self.backend {
            Backend::Current(c) => {
                let header = read_chunk_header_current(c)?;
                let payload_start = (c.pos + CHUNK_HEADER_SIZE) as usize;
                let payload_len = header.payload_size() as usize;
                let payload_end = payload_start + payload_len;
                let payload = c
                    .whole
                    .get(payload_start..payload_end)
                    .ok_or_else(|| IfhdError::invalid_file("truncated chunk payload"))?;
                buffer.clear();
                buffer.extend_from_slice(payload);

                if backwards {
                    if header.offset_to_previous_chunk == 0 {
                        return Err(IfhdError::EndOfFile);
                    }
                    c.pos -= header.offset_to_previous_chunk as u64;
                } else {
                    c.pos += align_up(header.size as u64);
                }
                Ok(header)
            }
            Backend::Legacy(l) => {
                if backwards {
                    return Err(IfhdError::illegal_state("backwards reads are not supported for legacy files"));
                }
                let mut header = l.read_chunk(buffer)?;
                header.timestamp = header.timestamp.saturating_mul(1000);
                Ok(header)
            }
        }
    }

    /// Advances past the current chunk without copying its payload.
    pub fn skip_chunk(&mut self) -> IfhdResult<()> {
        self.ensure_not_info_only()?;
        match &mut self.backend {
            Backend::Current(c) => {
                let header = read_chunk_header_current(c)?;
                c.pos += align_up(header.size as u64);
                Ok(())
            }
            Backend::Legacy(l) => l.skip_chunk(),
        }
    }

    /// Skips chunks until one matches `stream_id_filter` (`0` = any), then reads it.
    pub fn read_next_chunk(
        &mut self,
        stream_id_filter: u16,
        flags: ReadChunkFlags,
        buffer: &mut Vec<u8>,
    ) -> IfhdResult<ChunkHeader> {
        loop {
            let info = self.query_chunk_info()?;
            if stream_id_filter == 0 || info.stream_id == stream_id_filter {
                return self.read_chunk(buffer, flags);
            }
            self.skip_chunk()?;
        }
    }

    /// Seeks to a chunk identified by `position` in `format`, returning the
    /// logical master-table index (or `-1` if the index table has no entry
    /// to anchor the search, e.g. an unindexed stream).
    pub fn seek(&mut self, stream_id: u16, position: u64, format: SeekFormat, flags: SeekFlags) -> IfhdResult<i64> {
        self.ensure_not_info_only()?;
        let Backend::Current(c) = &mut self.backend else {
            return Err(IfhdError::illegal_state("seek is not supported on legacy files"));
        };

        let is_time_based = format == SeekFormat::ChunkTime;
        // `time_offset` and the master index table store timestamps in the
        // file's on-disk unit (microseconds below `V0500`); `position` is
        // always nanoseconds on this API (see `ns_for`/`native_for`), so the
        // lookup path needs it downconverted. The linear-scan loop below
        // compares against `header.timestamp`, which `read_chunk_header_current`
        // already upconverts to nanoseconds, so it keeps using `position` as-is.
        let position_native = if is_time_based {
            native_for(c.header.version_id, position)
        } else {
            position
        };

        if format == SeekFormat::ChunkTime && position_native < c.header.time_offset {
            return Err(IfhdError::out_of_range("seek position precedes time_offset"));
        }

        let lookup = c.index.lookup_chunk_ref(stream_id, position_native, is_time_based)?;

        // `ChunkIndex` seeks can only be resolved via the index table: no
        // on-disk chunk header records the global chunk index.
        if format == SeekFormat::ChunkIndex || flags.contains(SeekFlag::Keydata) {
            c.pos = lookup.file_offset;
            return Ok(lookup.master_index);
        }

        c.pos = lookup.file_offset;
        let before = flags.contains(SeekFlag::Before);
        let lookahead_bound = if before { position.saturating_add(BEFORE_LOOKAHEAD_US * 1000) } else { u64::MAX };
        let mut last_match_pos = c.pos;
        loop {
            let header = match read_chunk_header_current(c) {
                Ok(h) => h,
                Err(IfhdError::EndOfFile) => break,
                Err(e) => return Err(e),
            };
            let key = match format {
                SeekFormat::ChunkTime => header.timestamp,
                SeekFormat::StreamIndex => header.stream_index,
                SeekFormat::ChunkIndex => unreachable!(),
            };
            if before {
                if key > position || key > lookahead_bound {
                    break;
                }
                last_match_pos = c.pos;
            } else if key >= position {
                last_match_pos = c.pos;
                break;
            }
            let advance = align_up(header.size as u64);
            c.pos += advance;
        }
        c.pos = last_match_pos;
        Ok(lookup.master_index)
    }

    pub fn find_extension(&mut self, identifier: &str) -> Option<&Extension> {
        match &mut self.backend {
            Backend::Current(c) => c.extensions.find_extension(identifier),
            Backend::Legacy(l) => {
                if identifier == "storage_info" {
                    self.legacy_storage_info = Some(l.storage_info_extension());
                    self.legacy_storage_info.as_ref()
                } else {
                    None
                }
            }
        }
    }

    pub fn get_extension(&self, index: usize) -> IfhdResult<&Extension> {
        match &self.backend {
            Backend::Current(c) => c.extensions.get_extension(index),
            Backend::Legacy(_) => Err(IfhdError::out_of_range("legacy files expose only storage_info")),
        }
    }

    /// The sub-slice of a stream's `index{N}` extension between the
    /// stream-info-header and the stream-ref table.
    pub fn get_additional_stream_info(&self, stream_id: u16) -> Option<&[u8]> {
        match &self.backend {
            Backend::Current(c) => c.index.additional_stream_info(&c.extensions, stream_id),
            Backend::Legacy(_) => None,
        }
    }

    pub fn chunk_count(&self) -> u64 {
        match &self.backend {
            Backend::Current(c) => c.header.chunk_count,
            Backend::Legacy(l) => l.header.chunk_count,
        }
    }

    pub fn time_offset_nanoseconds(&self) -> u64 {
        self.time_offset_ns()
    }

    /// Short (up to first newline) and long (remainder) portions of the
    /// file's description, as recorded in the header.
    pub fn description(&self) -> (String, String) {
        match &self.backend {
            Backend::Current(c) => (c.header.short_description(), c.header.long_description()),
            Backend::Legacy(l) => (l.header.description(), String::new()),
        }
    }

    pub fn file_version(&self) -> u32 {
        match &self.backend {
            Backend::Current(c) => c.header.version_id,
            Backend::Legacy(l) => l.header.version_id,
        }
    }

    /// Number of extensions indexable via [`Reader::get_extension`]. Legacy
    /// files expose their synthesized `storage_info` extension only by name
    /// (through [`Reader::find_extension`]), so this reports `0` for them.
    pub fn extension_count(&self) -> usize {
        match &self.backend {
            Backend::Current(c) => c.extensions.len(),
            Backend::Legacy(_) => 0,
        }
    }

    /// Per-stream summary drawn from the master/stream index tables:
    /// id, name, indexed-chunk count, first/last timestamps in nanoseconds.
    /// Only streams with a name set (and thus an `index{N}` extension) are
    /// reported; legacy files report their single implicit stream.
    pub fn streams(&self) -> Vec<StreamSummary> {
        match &self.backend {
            Backend::Current(c) => {
                let mut out: Vec<StreamSummary> = c
                    .index
                    .streams
                    .iter()
                    .map(|(id, table)| StreamSummary {
                        stream_id: *id,
                        name: table.info.name.clone(),
                        indexed_chunk_count: table.info.stream_index_count,
                        first_time_ns: ns_for(c.header.version_id, table.info.first_time),
                        last_time_ns: ns_for(c.header.version_id, table.info.last_time),
                    })
                    .collect();
                out.sort_by_key(|s| s.stream_id);
                out
            }
            Backend::Legacy(l) => vec![StreamSummary {
                stream_id: crate::legacy::LEGACY_STREAM_ID,
                name: String::new(),
                indexed_chunk_count: l.header.chunk_count,
                first_time_ns: 0,
                last_time_ns: l.header.duration.saturating_mul(1000),
            }],
        }
    }
}

/// One entry of [`Reader::streams`].
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub stream_id: u16,
    pub name: String,
    pub indexed_chunk_count: u64,
    pub first_time_ns: u64,
    pub last_time_ns: u64,
}
