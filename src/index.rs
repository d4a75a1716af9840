//! Master + per-stream index tables: the write-side accumulator used by
//! [`crate::writer::Writer`], and the read-side lookup engine used by
//! [`crate::reader::Reader`].

use std::collections::{HashMap, VecDeque};

use crate::chunk::{
    AdditionalIndexInfo, ChunkHeader, ChunkRef, StreamInfoHeader, StreamRef,
    ADDITIONAL_INDEX_INFO_SIZE, CHUNK_REF_SIZE, STREAM_INFO_HEADER_SIZE, STREAM_REF_SIZE,
};
use crate::error::{IfhdError, IfhdResult};
use crate::header::ByteOrder;
use crate::{DEFAULT_INDEX_DELAY_US, MAX_STREAMS};

/// Result of a successful [`ReadIndexTables::lookup_chunk_ref`] call.
#[derive(Debug, Clone, Copy)]
pub struct LookupResult {
    pub chunk_index: u64,
    pub file_offset: u64,
    pub end_chunk_index: u64,
    pub master_index: i64,
}

// ---------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------

#[derive(Debug, Default)]
struct StreamWriteState {
    refs: VecDeque<StreamRef>,
    /// Monotonic per-stream counter handed out as `ref_stream_table_index`;
    /// never decreases, even across drops.
    next_stream_table_index: u32,
    /// Count of index entries dropped from the front of `refs` so far.
    stream_table_index_offset: u32,
    /// Count of chunks (indexed or not) dropped for this stream so far.
    stream_index_offset: u64,
    last_indexed_time: Option<u64>,
    last_stream_index: Option<u64>,
    first_time: Option<u64>,
    last_time: Option<u64>,
    name: Option<String>,
    additional_info: Option<Vec<u8>>,
}

/// Accumulates the master and per-stream index tables in RAM while a file is
/// being written. Flushed to `index{N}`/`index_add{N}` extensions at close.
#[derive(Debug)]
pub struct WriteIndexTables {
    master: VecDeque<ChunkRef>,
    /// Monotonic counter handed out as `ref_master_table_index`.
    next_master_index: u32,
    /// Count of master entries dropped from the front so far.
    master_index_offset: u32,
    streams: HashMap<u16, StreamWriteState>,
    /// Minimum gap, in the same unit as the timestamps passed to `append`,
    /// between emitted entries. Callers are responsible for matching units
    /// (the writer always calls `append` with nanoseconds, so it scales the
    /// microsecond `index_delay_us` config value before constructing this).
    index_delay: u64,
}

impl WriteIndexTables {
    pub fn new(index_delay: u64) -> Self {
        Self {
            master: VecDeque::new(),
            next_master_index: 0,
            master_index_offset: 0,
            streams: HashMap::new(),
            index_delay: if index_delay == 0 { DEFAULT_INDEX_DELAY_US } else { index_delay },
        }
    }

    fn stream_mut(&mut self, stream_id: u16) -> &mut StreamWriteState {
        self.streams.entry(stream_id).or_default()
    }

    pub fn set_stream_name(&mut self, stream_id: u16, name: String) {
        self.stream_mut(stream_id).name = Some(name);
    }

    pub fn set_additional_stream_info(&mut self, stream_id: u16, data: Vec<u8>) {
        self.stream_mut(stream_id).additional_info = Some(data);
    }

    /// Records bookkeeping for a just-written chunk and decides whether to
    /// emit a master/stream index entry for it.
    ///
    /// Returns the master index assigned to the chunk's header, if any chunk
    /// header written earlier needs to reference it — callers are expected to
    /// have already written `ref_master_table_index` as `u32::MAX` when no
    /// entry is emitted.
    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &mut self,
        stream_id: u16,
        stream_index: u64,
        chunk_index: u64,
        file_pos: u64,
        size: u32,
        timestamp: u64,
        flags: u16,
    ) -> Option<u32> {
        let is_first = {
            let st = self.stream_mut(stream_id);
            st.first_time.get_or_insert(timestamp);
            st.last_time = Some(timestamp);
            st.last_stream_index.is_none()
        };

        let is_keydata = flags & crate::chunk::CHUNK_FLAG_KEYDATA != 0;
        let elapsed_enough = {
            let st = self.streams.get(&stream_id).unwrap();
            match st.last_indexed_time {
                None => true,
                Some(t) => timestamp.saturating_sub(t) >= self.index_delay,
            }
        };

        self.stream_mut(stream_id).last_stream_index = Some(stream_index);

        let should_emit = is_first || is_keydata || elapsed_enough;
        if !should_emit {
            return None;
        }

        let ref_stream_table_index = {
            let st = self.stream_mut(stream_id);
            let idx = st.next_stream_table_index;
            st.next_stream_table_index += 1;
            idx
        };

        let master_index = self.next_master_index;
        self.next_master_index += 1;

        self.master.push_back(ChunkRef {
            timestamp,
            size,
            stream_id,
            flags,
            chunk_offset: file_pos,
            chunk_index,
            stream_index,
            ref_stream_table_index,
        });

        let st = self.stream_mut(stream_id);
        st.refs.push_back(StreamRef {
            ref_master_table_index: master_index,
        });
        st.last_indexed_time = Some(timestamp);

        Some(master_index)
    }

    /// Called by the ring buffer's drop callback when a chunk at
    /// `dropped_chunk_index` belonging to `stream_id` is evicted from
    /// history. Trims stale master/stream entries and updates the offsets
    /// readers use to normalize indices after history drops.
    pub fn remove(&mut self, dropped_chunk_index: u64, stream_id: u16) {
        self.stream_mut(stream_id).stream_index_offset += 1;

        while let Some(front) = self.master.front() {
            if front.chunk_index > dropped_chunk_index {
                break;
            }
            let popped = self.master.pop_front().unwrap();
            self.master_index_offset += 1;
            let st = self.stream_mut(popped.stream_id);
            st.refs.pop_front();
            st.stream_table_index_offset += 1;
        }
    }

    /// Patches the file offset of the most recently emitted master entry
    /// once the real write position is known. In history mode `append` is
    /// called before the ring buffer has decided where the item lands (a
    /// wrap may still occur), so the offset recorded by `append` is
    /// provisional until this call corrects it.
    pub fn fix_chunk_offset(&mut self, master_index: u32, file_pos: u64) {
        if let Some(pos) = master_index.checked_sub(self.master_index_offset) {
            if let Some(entry) = self.master.get_mut(pos as usize) {
                entry.chunk_offset = file_pos;
            }
        }
    }

    pub fn stream_index_offset(&self, stream_id: u16) -> u64 {
        self.streams
            .get(&stream_id)
            .map(|s| s.stream_index_offset)
            .unwrap_or(0)
    }

    pub fn master_index_offset(&self) -> u32 {
        self.master_index_offset
    }

    pub fn first_time(&self, stream_id: u16) -> Option<u64> {
        self.streams.get(&stream_id).and_then(|s| s.first_time)
    }

    pub fn last_time(&self, stream_id: u16) -> Option<u64> {
        self.streams.get(&stream_id).and_then(|s| s.last_time)
    }

    /// Recomputes per-stream first/last times by walking a set of
    /// `(stream_id, timestamp)` pairs in insertion order, as `quit_history`
    /// does over the ring buffer's surviving items.
    pub fn recompute_first_last_times(&mut self, live_items: impl Iterator<Item = (u16, u64)>) {
        for st in self.streams.values_mut() {
            st.first_time = None;
            st.last_time = None;
        }
        for (stream_id, ts) in live_items {
            let st = self.stream_mut(stream_id);
            st.first_time.get_or_insert(ts);
            st.last_time = Some(ts);
        }
    }

    /// Serializes the master table as the `index0` extension payload.
    pub fn serialize_master(&self, order: ByteOrder) -> IfhdResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.master.len() * CHUNK_REF_SIZE as usize);
        for r in &self.master {
            out.extend_from_slice(&r.write(order)?);
        }
        Ok(out)
    }

    /// Serializes one stream's `index{N}` extension payload: stream-info
    /// header, optional additional info, then the stream-ref table.
    pub fn serialize_stream(&self, stream_id: u16, order: ByteOrder) -> IfhdResult<Option<Vec<u8>>> {
        let Some(st) = self.streams.get(&stream_id) else {
            return Ok(None);
        };
        let Some(name) = &st.name else {
            return Ok(None);
        };

        let info = StreamInfoHeader {
            stream_index_count: st.refs.len() as u64,
            first_time: st.first_time.unwrap_or(0),
            last_time: st.last_time.unwrap_or(0),
            info_data_size: st.additional_info.as_ref().map(|d| d.len() as u32).unwrap_or(0),
            name: name.clone(),
        };

        let mut out = Vec::new();
        out.extend_from_slice(&info.write(order)?);
        if let Some(add) = &st.additional_info {
            out.extend_from_slice(add);
        }
        for r in &st.refs {
            out.extend_from_slice(&r.write(order)?);
        }
        Ok(Some(out))
    }

    /// Serializes the `index_add{N}` extension: the offsets a reader needs to
    /// normalize indices after history drops.
    pub fn serialize_additional_info(&self, stream_id: u16, order: ByteOrder) -> IfhdResult<Vec<u8>> {
        let info = if stream_id == 0 {
            AdditionalIndexInfo::new(self.master_index_offset as u64, self.master_index_offset)
        } else {
            let st = self.streams.get(&stream_id);
            AdditionalIndexInfo::new(
                st.map(|s| s.stream_index_offset).unwrap_or(0),
                st.map(|s| s.stream_table_index_offset).unwrap_or(0),
            )
        };
        Ok(info.write(order)?.to_vec())
    }

    pub fn stream_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.streams.keys().copied()
    }
}

// ---------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------

/// One stream's parsed index-table state, borrowed from extension payload
/// memory (no copying).
#[derive(Debug, Clone)]
pub struct StreamIndexTable {
    pub info: StreamInfoHeader,
    pub additional: AdditionalIndexInfo,
    pub refs: Vec<StreamRef>,
}

/// The fully-parsed read-side index: master table plus every stream table
/// present in the file's extensions.
#[derive(Debug, Default)]
pub struct ReadIndexTables {
    pub master: Vec<ChunkRef>,
    pub master_additional: AdditionalIndexInfo,
    pub streams: HashMap<u16, StreamIndexTable>,
}

impl ReadIndexTables {
    pub fn create() -> Self {
        Self::default()
    }

    /// Parses `index0`, `index_add0`, and every `index{N}`/`index_add{N}`
    /// extension present in `catalog`.
    pub fn read_from_catalog(catalog: &crate::extension::ExtensionCatalog, order: ByteOrder) -> IfhdResult<Self> {
        let mut tables = Self::default();

        if let Some(ext) = catalog.find_extension("index0") {
            let mut master = Vec::with_capacity(ext.data.len() / CHUNK_REF_SIZE as usize);
            for chunk in ext.data.chunks_exact(CHUNK_REF_SIZE as usize) {
                let arr: [u8; CHUNK_REF_SIZE as usize] = chunk.try_into().unwrap();
                master.push(ChunkRef::read(&arr, order)?);
            }
            tables.master = master;
        }

        if let Some(ext) = catalog.find_extension("index_add0") {
            if ext.data.len() >= ADDITIONAL_INDEX_INFO_SIZE as usize {
                let arr: [u8; ADDITIONAL_INDEX_INFO_SIZE as usize] =
                    ext.data[..ADDITIONAL_INDEX_INFO_SIZE as usize].try_into().unwrap();
                tables.master_additional = AdditionalIndexInfo::read(&arr, order)?;
            }
        }

        for stream_id in 1..=MAX_STREAMS {
            let name = format!("index{stream_id}");
            let Some(ext) = catalog.find_extension(&name) else {
                continue;
            };
            if ext.data.len() < STREAM_INFO_HEADER_SIZE as usize {
                continue;
            }
            let header_bytes: [u8; STREAM_INFO_HEADER_SIZE as usize] =
                ext.data[..STREAM_INFO_HEADER_SIZE as usize].try_into().unwrap();
            let info = StreamInfoHeader::read(&header_bytes, order)?;

            let refs_bytes_len = info.stream_index_count as usize * STREAM_REF_SIZE as usize;
            let refs_start = STREAM_INFO_HEADER_SIZE as usize + info.info_data_size as usize;
            let refs_end = refs_start + refs_bytes_len;
            let mut refs = Vec::with_capacity(info.stream_index_count as usize);
            if let Some(refs_bytes) = ext.data.get(refs_start..refs_end) {
                for chunk in refs_bytes.chunks_exact(STREAM_REF_SIZE as usize) {
                    let arr: [u8; STREAM_REF_SIZE as usize] = chunk.try_into().unwrap();
                    refs.push(StreamRef::read(&arr, order)?);
                }
            }

            let additional = if let Some(add_ext) = catalog.find_extension(&format!("index_add{stream_id}")) {
                if add_ext.data.len() >= ADDITIONAL_INDEX_INFO_SIZE as usize {
                    let arr: [u8; ADDITIONAL_INDEX_INFO_SIZE as usize] =
                        add_ext.data[..ADDITIONAL_INDEX_INFO_SIZE as usize].try_into().unwrap();
                    AdditionalIndexInfo::read(&arr, order)?
                } else {
                    AdditionalIndexInfo::default()
                }
            } else {
                AdditionalIndexInfo::default()
            };

            tables.streams.insert(stream_id, StreamIndexTable { info, additional, refs });
        }

        Ok(tables)
    }

    /// Returns the "additional stream info" sub-slice of a stream's `index{N}`
    /// extension: the bytes between the stream-info-header and the ref table.
    pub fn additional_stream_info<'a>(&self, catalog: &'a crate::extension::ExtensionCatalog, stream_id: u16) -> Option<&'a [u8]> {
        let st = self.streams.get(&stream_id)?;
        let ext = catalog.find_extension(&format!("index{stream_id}"))?;
        let start = STREAM_INFO_HEADER_SIZE as usize;
        let end = start + st.info.info_data_size as usize;
        ext.data.get(start..end)
    }

    fn master_vec_index(&self, raw_master_index: u32) -> Option<usize> {
        let pos = raw_master_index.checked_sub(self.master_additional.stream_table_index_offset)?;
        Some(pos as usize)
    }

    /// Applied to every freshly parsed chunk header: subtracts the stored
    /// offsets so values reflect the current logical view after history
    /// drops.
    pub fn adjust_chunk_header(&self, header: &mut ChunkHeader) {
        let stream_offset = self
            .streams
            .get(&header.stream_id)
            .map(|s| s.additional.stream_index_offset)
            .unwrap_or(0);
        header.adjust(self.master_additional.stream_table_index_offset, stream_offset);
    }

    /// Synthesizes a chunk header from a master-table entry, without reading
    /// the payload (used for seeks with `keydata`).
    pub fn fill_chunk_header_from_index(&self, master_idx: usize) -> IfhdResult<ChunkHeader> {
        let r = self
            .master
            .get(master_idx)
            .ok_or_else(|| IfhdError::out_of_range("master index out of range"))?;
        Ok(ChunkHeader {
            timestamp: r.timestamp,
            ref_master_table_index: master_idx as u32 + self.master_additional.stream_table_index_offset,
            offset_to_previous_chunk: 0,
            size: r.size,
            stream_id: r.stream_id,
            flags: r.flags,
            stream_index: r.stream_index,
        })
    }

    /// Binary search on a stream's ref table for the latest entry at-or-before
    /// `chunk_index` whose master entry has all of `required_flags` set.
    pub fn find_nearest_entry_with_flags(
        &self,
        stream_id: u16,
        chunk_index: u64,
        required_flags: u16,
    ) -> Option<usize> {
        let st = self.streams.get(&stream_id)?;
        let mut lo = 0usize;
        let mut hi = st.refs.len();
        let mut best: Option<usize> = None;
        while lo < hi {
            let mid = (lo + hi) / 2;
            let master_idx = self.master_vec_index(st.refs[mid].ref_master_table_index)?;
            let entry = self.master.get(master_idx)?;
            if entry.chunk_index <= chunk_index {
                if entry.flags & required_flags == required_flags {
                    best = Some(master_idx);
                }
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        best
    }

    /// Locates a chunk by `(stream_id, position)` in the given time/index
    /// format, using a proportional estimate followed by a bounded linear
    /// walk.
    pub fn lookup_chunk_ref(
        &self,
        stream_id: u16,
        position: u64,
        is_time_based: bool,
    ) -> IfhdResult<LookupResult> {
        let entries: Vec<&ChunkRef> = if stream_id == 0 {
            self.master.iter().collect()
        } else {
            let Some(st) = self.streams.get(&stream_id) else {
                return Err(IfhdError::not_found(format!("stream {stream_id}")));
            };
            st.refs
                .iter()
                .filter_map(|r| self.master_vec_index(r.ref_master_table_index))
                .filter_map(|idx| self.master.get(idx))
                .collect()
        };

        if entries.is_empty() {
            return Err(IfhdError::out_of_range("no index entries for stream"));
        }

        let key = |e: &ChunkRef| if is_time_based { e.timestamp } else if stream_id == 0 { e.chunk_index } else { e.stream_index };

        let first_key = key(entries[0]);
        let last_key = key(entries[entries.len() - 1]);
        let span = last_key.saturating_sub(first_key).max(1);
        let estimate = (((position.saturating_sub(first_key)) as u128 * (entries.len() - 1) as u128) / span as u128) as usize;

        // Bounded linear walk from the estimate to the exact-or-nearest predecessor.
        let mut idx = estimate.min(entries.len() - 1);
        while idx > 0 && key(entries[idx]) > position {
            idx -= 1;
        }
        while idx + 1 < entries.len() && key(entries[idx + 1]) <= position {
            idx += 1;
        }

        if key(entries[idx]) > position && idx == 0 {
            return Err(IfhdError::out_of_range("position precedes first index entry"));
        }

        let entry = entries[idx];
        Ok(LookupResult {
            chunk_index: entry.chunk_index,
            file_offset: entry.chunk_offset,
            end_chunk_index: entries.last().map(|e| e.chunk_index).unwrap_or(entry.chunk_index),
            master_index: self
                .master
                .iter()
                .position(|e| std::ptr::eq(e, entry))
                .map(|p| p as i64)
                .unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::CHUNK_FLAG_KEYDATA;

    #[test]
    fn append_emits_on_first_chunk_keydata_and_delay() {
        let mut idx = WriteIndexTables::new(1_000_000);

        // first chunk always emitted
        assert!(idx.append(1, 0, 0, 0, 64, 0, 0).is_some());
        // too soon, not keydata -> not emitted
        assert!(idx.append(1, 1, 1, 64, 64, 500_000, 0).is_none());
        // keydata forces emission regardless of elapsed time
        assert!(idx.append(1, 2, 2, 128, 64, 600_000, CHUNK_FLAG_KEYDATA).is_some());
        // enough time elapsed since last emitted (t=600_000) -> emitted
        assert!(idx.append(1, 3, 3, 192, 64, 1_700_000, 0).is_some());
    }

    #[test]
    fn remove_trims_master_and_stream_tables() {
        let mut idx = WriteIndexTables::new(1);
        for i in 0..5u64 {
            idx.append(1, i, i, i * 64, 64, i, CHUNK_FLAG_KEYDATA);
        }
        idx.remove(0, 1);
        idx.remove(1, 1);
        assert_eq!(idx.master_index_offset(), 2);
        assert_eq!(idx.stream_index_offset(1), 2);
    }

    #[test]
    fn master_table_stays_time_ordered_across_appends() {
        use itertools::Itertools;

        let mut idx = WriteIndexTables::new(1);
        for i in 0..8u64 {
            idx.append(1, i, i, i * 64, 64, i * 1000, CHUNK_FLAG_KEYDATA);
        }
        assert!(idx
            .master
            .iter()
            .map(|e| e.timestamp)
            .tuple_windows()
            .all(|(a, b)| a <= b));
    }
}
