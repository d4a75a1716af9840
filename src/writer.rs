//! The writer engine: state machine, three write modes (history / sync /
//! async), and close-time extension materialization.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use enumset::EnumSet;

use crate::chunk::{align_up, ChunkHeader, CHUNK_HEADER_SIZE};
use crate::error::{IfhdError, IfhdResult};
use crate::extension::ExtensionCatalog;
use crate::header::{ByteOrder, FileHeader, HEADER_SIZE};
use crate::index::WriteIndexTables;
use crate::io::{AlignedFile, OpenOption};
use crate::ring::{RingBufferSink, RingItem};
use crate::{DEFAULT_INDEX_DELAY_US, MAX_STREAMS, PADDING_BYTE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Created,
    Streaming,
    HistoryQuit,
    Closed,
}

/// Configuration accepted by [`Writer::create`].
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Size in bytes of the async write-behind cache. Ignored in history mode
    /// (history forces synchronous writes) and when `0` (sync mode).
    pub cache_size: u64,
    pub flags: EnumSet<OpenOption>,
    /// When set, chunks are written into a wrapping ring region of this
    /// length in bytes starting just after the header, instead of growing
    /// the file unboundedly.
    pub history_size: Option<u64>,
    /// Reserved for a future time-bounded history policy; not enforced here,
    /// only `history_size` currently gates wrap-around (see DESIGN.md).
    pub history_duration_ns: Option<u64>,
    pub min_write_chunk: u32,
    pub max_write_chunk: u32,
    pub index_delay_us: u64,
    /// When true, the file is created under a `~$`-prefixed temporary name
    /// and renamed to the real path on a successful `close`.
    pub use_temp_filename: bool,
    /// Format version stamped into the header; selects the
    /// on-wire timestamp unit (microseconds below `V0500`, nanoseconds at
    /// `V0500`). Defaults to the current version.
    pub version_id: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            cache_size: 0,
            flags: EnumSet::empty(),
            history_size: None,
            history_duration_ns: None,
            min_write_chunk: 4096,
            max_write_chunk: 1 << 20,
            index_delay_us: DEFAULT_INDEX_DELAY_US,
            use_temp_filename: false,
            version_id: crate::version::V0500,
        }
    }
}

#[derive(Debug, Clone)]
struct ChunkDropData {
    chunk_index: u64,
    stream_id: u16,
    #[allow(dead_code)]
    flags: u16,
    #[allow(dead_code)]
    timestamp: u64,
}

type DropQueue = Rc<RefCell<VecDeque<ChunkDropData>>>;
type HistorySink = RingBufferSink<AlignedFile, ChunkDropData, Box<dyn FnMut(&RingItem<ChunkDropData>, &RingItem<ChunkDropData>)>>;

struct AsyncCacheState {
    buf: VecDeque<u8>,
    error: Option<IfhdError>,
    stop: bool,
}

/// The producer/consumer rendezvous backing async (non-history) writes: a
/// byte ring with `insert`/`flush` positions, implemented as a `VecDeque<u8>`
/// guarded by a mutex plus two condition variables (cache-used, freed).
struct AsyncCache {
    state: Arc<Mutex<AsyncCacheState>>,
    cache_used: Arc<Condvar>,
    freed: Arc<Condvar>,
    usage_count: Arc<AtomicUsize>,
    capacity: usize,
    #[allow(dead_code)]
    max_write_chunk: usize,
    #[allow(dead_code)]
    min_write_chunk: usize,
    handle: Option<JoinHandle<()>>,
    file_handle: Arc<Mutex<Option<AlignedFile>>>,
}

impl AsyncCache {
    fn spawn(file: AlignedFile, capacity: usize, max_write_chunk: usize, min_write_chunk: usize) -> Self {
        let state = Arc::new(Mutex::new(AsyncCacheState {
            buf: VecDeque::new(),
            error: None,
            stop: false,
        }));
        let cache_used = Arc::new(Condvar::new());
        let freed = Arc::new(Condvar::new());
        let usage_count = Arc::new(AtomicUsize::new(0));
        let file_handle = Arc::new(Mutex::new(Some(file)));

        let thread_state = state.clone();
        let thread_used = cache_used.clone();
        let thread_freed = freed.clone();
        let thread_usage = usage_count.clone();
        let thread_file = file_handle.clone();

        let handle = std::thread::spawn(move || {
            loop {
                let mut guard = thread_state.lock().unwrap();
                while guard.buf.is_empty() && !guard.stop {
                    guard = thread_used.wait(guard).unwrap();
                }
                if guard.buf.is_empty() && guard.stop {
                    break;
                }
                let take = guard.buf.len().min(max_write_chunk.max(1));
                let segment: Vec<u8> = guard.buf.drain(..take).collect();
                drop(guard);

                let write_result = {
                    let mut file_guard = thread_file.lock().unwrap();
                    file_guard.as_mut().unwrap().write_all(&segment)
                };
                if let Err(e) = write_result {
                    log::warn!("async cache flush failed: {e}");
                    let mut guard = thread_state.lock().unwrap();
                    guard.error = Some(e);
                } else {
                    log::trace!("async cache flushed {} bytes", segment.len());
                }
                thread_usage.fetch_sub(segment.len(), Ordering::SeqCst);
                thread_freed.notify_all();
            }
            if let Some(f) = thread_file.lock().unwrap().as_mut() {
                let _ = f.flush();
            }
        });

        Self {
            state,
            cache_used,
            freed,
            usage_count,
            capacity,
            max_write_chunk,
            min_write_chunk,
            handle: Some(handle),
            file_handle,
        }
    }

    /// Blocks the producer until there is room, then enqueues `data`.
    fn push(&mut self, data: &[u8]) -> IfhdResult<()> {
        if data.len() > self.capacity {
            return Err(IfhdError::invalid_argument(format!(
                "chunk of {} bytes exceeds the {}-byte async cache",
                data.len(),
                self.capacity
            )));
        }
        let mut guard = self.state.lock().unwrap();
        if let Some(e) = guard.error.take() {
            return Err(e);
        }
        if self.usage_count.load(Ordering::SeqCst) + data.len() > self.capacity {
            log::debug!(
                "async cache full ({} of {} bytes in use), producer stalling",
                self.usage_count.load(Ordering::SeqCst),
                self.capacity
            );
        }
        while self.usage_count.load(Ordering::SeqCst) + data.len() > self.capacity {
            guard = self.freed.wait(guard).unwrap();
            if let Some(e) = guard.error.take() {
                return Err(e);
            }
        }
        guard.buf.extend(data.iter().copied());
        drop(guard);
        self.usage_count.fetch_add(data.len(), Ordering::SeqCst);
        self.cache_used.notify_all();
        Ok(())
    }

    fn stop_and_flush(mut self) -> IfhdResult<AlignedFile> {
        {
            let mut guard = self.state.lock().unwrap();
            guard.stop = true;
        }
        self.cache_used.notify_all();
        if let Some(h) = self.handle.take() {
            h.join().map_err(|_| IfhdError::WriteThreadError { os_error: None })?;
        }
        let error = self.state.lock().unwrap().error.take();
        let file = self
            .file_handle
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| IfhdError::illegal_state("async writer thread did not release its file handle"))?;
        if let Some(e) = error {
            return Err(IfhdError::WriteThreadError {
                os_error: e.last_system_error(),
            });
        }
        Ok(file)
    }
}

enum Sink {
    History(HistorySink, DropQueue),
    Sync(AlignedFile),
    Async(AsyncCache),
}

/// Write handle for one stream's accumulated `get_extension_stream` bytes.
#[derive(Debug, Clone)]
struct PendingExtension {
    user_id: u32,
    type_id: u32,
    version_id: u32,
    stream_id: u16,
    data: Vec<u8>,
}

/// Writes an IFHD file: a single-threaded producer in sync/history mode, or a
/// producer plus one background flush thread in async mode.
pub struct Writer {
    state: WriterState,
    path: PathBuf,
    final_path: PathBuf,
    header: FileHeader,
    sink: Sink,
    index: WriteIndexTables,
    extensions: ExtensionCatalog,
    pending_extensions: Vec<(String, PendingExtension)>,
    config: WriterConfig,
    byte_order: ByteOrder,
    next_chunk_index: u64,
    next_stream_index: std::collections::HashMap<u16, u64>,
    time_offset: Option<u64>,
    on_chunk_dropped: Option<Box<dyn FnMut(u64, u16)>>,
    data_size: u64,
    /// File position of the most recently written chunk header, used to fill
    /// in the next chunk's `offset_to_previous_chunk` back-link.
    last_chunk_file_pos: Option<u64>,
}

impl Writer {
    /// Opens `path` (or a `~$`-prefixed sibling, per `config.use_temp_filename`)
    /// and writes a provisional header at offset 0.
    pub fn create(
        path: impl AsRef<Path>,
        config: WriterConfig,
        on_chunk_dropped: Option<Box<dyn FnMut(u64, u16)>>,
    ) -> IfhdResult<Self> {
        let path = path.as_ref().to_path_buf();
        let actual_path = if config.use_temp_filename {
            temp_sibling(&path)
        } else {
            path.clone()
        };

        let mut open_flags = config.flags;
        open_flags.insert(OpenOption::ReadWrite);
        let mut file = AlignedFile::open(&actual_path, open_flags)?;

        let mut header = FileHeader::default();
        header.header_byte_order = ByteOrder::host();
        header.version_id = config.version_id;
        file.write_all(&header.serialize()?)?;

        let sink = if let Some(max) = config.history_size {
            let queue: DropQueue = Rc::new(RefCell::new(VecDeque::new()));
            let cb_queue = queue.clone();
            let cb: Box<dyn FnMut(&RingItem<ChunkDropData>, &RingItem<ChunkDropData>)> =
                Box::new(move |dropped, _next| cb_queue.borrow_mut().push_back(dropped.additional.clone()));
            let ring = RingBufferSink::new(file, HEADER_SIZE, Some(max), crate::CHUNK_ALIGNMENT, Some(cb));
            Sink::History(ring, queue)
        } else if config.cache_size > 0 {
            Sink::Async(AsyncCache::spawn(
                file,
                config.cache_size as usize,
                config.max_write_chunk as usize,
                config.min_write_chunk as usize,
            ))
        } else {
            Sink::Sync(file)
        };

        Ok(Self {
            state: WriterState::Created,
            path,
            final_path: actual_path,
            header,
            sink,
            // `append` is called with whatever unit this version stores on
            // disk (nanoseconds at `V0500`, microseconds below it), so the
            // microsecond config value only needs scaling for the former.
            index: WriteIndexTables::new(if config.version_id >= crate::version::V0500 {
                config.index_delay_us.saturating_mul(1000)
            } else {
                config.index_delay_us
            }),
            extensions: ExtensionCatalog::new(),
            pending_extensions: Vec::new(),
            config,
            byte_order: ByteOrder::host(),
            next_chunk_index: 0,
            next_stream_index: std::collections::HashMap::new(),
            time_offset: None,
            on_chunk_dropped,
            data_size: 0,
            last_chunk_file_pos: None,
        })
    }

    fn drain_drops(&mut self) {
        if let Sink::History(_, queue) = &self.sink {
            let drained: Vec<ChunkDropData> = queue.borrow_mut().drain(..).collect();
            for d in drained {
                log::debug!(
                    "ring buffer wrapped over chunk {} (stream {})",
                    d.chunk_index,
                    d.stream_id
                );
                self.index.remove(d.chunk_index, d.stream_id);
                if let Some(cb) = self.on_chunk_dropped.as_mut() {
                    cb(d.chunk_index, d.stream_id);
                }
            }
        }
    }

    /// Writes one chunk. `stream_id` must be in `1..=MAX_STREAMS`. `timestamp_ns`
    /// is always nanoseconds on this API; it is downconverted to
    /// microseconds on disk for any version below `V0500`.
    pub fn write_chunk(&mut self, stream_id: u16, bytes: &[u8], timestamp_ns: u64, flags: u16) -> IfhdResult<()> {
        if self.state == WriterState::Closed {
            return Err(IfhdError::illegal_state("write_chunk called after close"));
        }
        if stream_id == 0 || stream_id > MAX_STREAMS {
            return Err(IfhdError::invalid_argument("stream_id out of range 1..=MAX_STREAMS"));
        }

        let timestamp = if self.header.version_id >= crate::version::V0500 {
            timestamp_ns
        } else {
            timestamp_ns / 1000
        };

        if self.state == WriterState::Created {
            self.state = WriterState::Streaming;
            self.time_offset = Some(timestamp);
        }

        let chunk_index = self.next_chunk_index;
        self.next_chunk_index += 1;
        let stream_index = *self.next_stream_index.entry(stream_id).or_insert(0);
        self.next_stream_index.insert(stream_id, stream_index + 1);

        let size = CHUNK_HEADER_SIZE as u32 + bytes.len() as u32;

        // In sync/async modes the write position is known before encoding the
        // header, so the back-link can be filled in exactly. In history mode
        // a wrap may still relocate this write, and the chunk it would point
        // back to may itself already be gone, so the link is left at 0.
        let predicted_pos = match &self.sink {
            Sink::Sync(file) => Some(file.get_file_pos()),
            Sink::Async(_) => Some(self.data_size + HEADER_SIZE),
            Sink::History(..) => None,
        };
        let offset_to_previous_chunk = match (predicted_pos, self.last_chunk_file_pos) {
            (Some(pos), Some(prev)) => (pos - prev) as u32,
            _ => 0,
        };

        // Index bookkeeping is decided before the header bytes are built so
        // the on-disk `ref_master_table_index` is correct from the start;
        // `chunk_offset` is provisional here (history mode may still wrap
        // the actual write) and gets patched once the true position is known.
        let master_index = self
            .index
            .append(stream_id, stream_index, chunk_index, 0, size, timestamp, flags);

        let header = ChunkHeader {
            timestamp,
            ref_master_table_index: master_index.unwrap_or(u32::MAX),
            offset_to_previous_chunk,
            size,
            stream_id,
            flags,
            stream_index,
        };
        let header_bytes = header.write(self.byte_order)?;

        let file_pos = match &mut self.sink {
            Sink::History(ring, _) => {
                let pos = ring.append_item(
                    &[&header_bytes, bytes],
                    ChunkDropData {
                        chunk_index,
                        stream_id,
                        flags,
                        timestamp: timestamp_ns,
                    },
                )?;
                pos
            }
            Sink::Sync(file) => {
                let pos = file.get_file_pos();
                file.write_all(&header_bytes)?;
                file.write_all(bytes)?;
                let padding = align_up((header_bytes.len() + bytes.len()) as u64) - (header_bytes.len() + bytes.len()) as u64;
                if padding > 0 {
                    file.write_all(&vec![PADDING_BYTE; padding as usize])?;
                }
                pos
            }
            Sink::Async(cache) => {
                let pos = self.data_size + HEADER_SIZE;
                let raw_len = header_bytes.len() + bytes.len();
                let padded_len = align_up(raw_len as u64) as usize;
                let mut combined = Vec::with_capacity(padded_len);
                combined.extend_from_slice(&header_bytes);
                combined.extend_from_slice(bytes);
                combined.resize(padded_len, PADDING_BYTE);
                cache.push(&combined)?;
                pos
            }
        };
        self.last_chunk_file_pos = Some(file_pos);

        if let Some(idx) = master_index {
            self.index.fix_chunk_offset(idx, file_pos);
        }

        self.drain_drops();

        let padded_total = align_up((CHUNK_HEADER_SIZE as usize + bytes.len()) as u64);
        self.data_size += padded_total;

        Ok(())
    }

    /// Registers a human-readable name for a stream; required for its
    /// `index{N}` extension to be emitted at close.
    pub fn set_stream_name(&mut self, stream_id: u16, name: impl Into<String>) {
        self.index.set_stream_name(stream_id, name.into());
    }

    pub fn set_additional_stream_info(&mut self, stream_id: u16, data: Vec<u8>) {
        self.index.set_additional_stream_info(stream_id, data);
    }

    /// Returns a handle accumulating bytes for an arbitrary named extension;
    /// flushed to the extension table at `close`.
    pub fn get_extension_stream(&mut self, name: &str, user_id: u32, type_id: u32, version_id: u32) -> IfhdResult<()> {
        if name.is_empty() {
            return Err(IfhdError::invalid_argument("extension identifier is empty"));
        }
        self.pending_extensions.push((
            name.to_string(),
            PendingExtension {
                user_id,
                type_id,
                version_id,
                stream_id: 0,
                data: Vec::new(),
            },
        ));
        Ok(())
    }

    pub fn write_to_extension_stream(&mut self, name: &str, bytes: &[u8]) -> IfhdResult<()> {
        let entry = self
            .pending_extensions
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| IfhdError::not_found(name))?;
        entry.1.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Stops wrap-around for history mode, fixing the header's region
    /// boundaries and recomputing per-stream first-seen times.
    pub fn quit_history(&mut self) -> IfhdResult<()> {
        if self.state != WriterState::Streaming {
            return Err(IfhdError::illegal_state("quit_history requires Streaming state"));
        }
        let Sink::History(ring, _) = &mut self.sink else {
            return Err(IfhdError::illegal_state("quit_history requires history mode"));
        };

        let (_rear, _last) = ring.start_appending();
        self.header.first_chunk_offset = HEADER_SIZE;
        self.header.continuous_offset = ring.current_write_pos();
        self.header.ring_buffer_end_offset = ring.current_write_pos();
        self.header.data_size = ring.current_write_pos() - HEADER_SIZE;

        self.state = WriterState::HistoryQuit;
        Ok(())
    }

    /// Flushes all pending writes, materializes index-table and user
    /// extensions, rewrites the header, and (if a temp filename was used)
    /// renames to the final path.
    pub fn close(mut self) -> IfhdResult<()> {
        if self.state == WriterState::Closed {
            return Err(IfhdError::illegal_state("close called twice"));
        }

        let mut file = match self.sink {
            Sink::History(ring, _) => ring.into_inner(),
            Sink::Sync(f) => f,
            Sink::Async(cache) => cache.stop_and_flush()?,
        };

        if self.header.data_size == 0 {
            self.header.data_size = self.data_size;
        }
        if self.header.first_chunk_offset == HEADER_SIZE && self.header.continuous_offset == HEADER_SIZE {
            self.header.continuous_offset = HEADER_SIZE + self.header.data_size;
            self.header.ring_buffer_end_offset = self.header.continuous_offset;
        }
        self.header.time_offset = self.time_offset.unwrap_or(0);
        self.header.chunk_count = self.next_chunk_index;

        let stream_ids: Vec<u16> = self.index.stream_ids().collect();
        self.extensions
            .append_reserved("index0", self.index.serialize_master(self.byte_order)?, 0);
        self.extensions
            .append_reserved("index_add0", self.index.serialize_additional_info(0, self.byte_order)?, 0);
        for stream_id in stream_ids {
            if let Some(payload) = self.index.serialize_stream(stream_id, self.byte_order)? {
                self.extensions
                    .append_reserved(&format!("index{stream_id}"), payload, stream_id);
                self.extensions.append_reserved(
                    &format!("index_add{stream_id}"),
                    self.index.serialize_additional_info(stream_id, self.byte_order)?,
                    stream_id,
                );
            }
        }

        for (name, ext) in self.pending_extensions.drain(..) {
            self.extensions.append_reserved(&name, ext.data, ext.stream_id);
            self.extensions.set_ids(&name, ext.user_id, ext.type_id, ext.version_id);
        }

        self.header.data_offset = HEADER_SIZE;
        let (payloads, table) = self
            .extensions
            .materialize(self.header.data_offset + self.header.data_size, self.byte_order)?;

        self.header.extension_count = self.extensions.len() as u32;
        self.header.extension_offset = self.header.data_offset + self.header.data_size + payloads.len() as u64;

        file.set_file_pos(
            (self.header.data_offset + self.header.data_size) as i64,
            crate::io::SeekAnchor::Begin,
        )?;
        file.write_all(&payloads)?;
        file.write_all(&table)?;
        file.truncate(self.header.extension_offset + table.len() as u64)?;

        file.set_file_pos(0, crate::io::SeekAnchor::Begin)?;
        file.write_all(&self.header.serialize()?)?;
        file.flush()?;
        drop(file);

        self.state = WriterState::Closed;

        if self.final_path != self.path {
            std::fs::rename(&self.final_path, &self.path)?;
        }

        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let mut temp_name = String::from("~$");
    temp_name.push_str(&file_name);
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(temp_name),
        _ => PathBuf::from(temp_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_write_then_close_produces_valid_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.ifhd");
        let mut w = Writer::create(&path, WriterConfig::default(), None).unwrap();
        w.set_stream_name(1, "cam0");
        w.write_chunk(1, b"frame-one", 1_000, 0).unwrap();
        w.write_chunk(1, b"frame-two", 2_000, 0).unwrap();
        w.close().unwrap();

        let whole = std::fs::read(&path).unwrap();
        let mut header_bytes = [0u8; HEADER_SIZE as usize];
        header_bytes.copy_from_slice(&whole[0..HEADER_SIZE as usize]);
        let header = FileHeader::parse(&header_bytes).unwrap();
        assert_eq!(header.chunk_count, 2);
        assert!(header.extension_count >= 3); // index0, index_add0, index1, index_add1
    }

    #[test]
    fn rejects_stream_id_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ifhd");
        let mut w = Writer::create(&path, WriterConfig::default(), None).unwrap();
        let err = w.write_chunk(0, b"x", 0, 0).unwrap_err();
        assert_matches::assert_matches!(err, IfhdError::InvalidArgument { .. });
    }

    #[test]
    fn history_mode_drops_and_tracks_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.ifhd");
        let dropped = Rc::new(RefCell::new(Vec::new()));
        let dropped_clone = dropped.clone();
        let config = WriterConfig {
            history_size: Some(256),
            ..WriterConfig::default()
        };
        let mut w = Writer::create(
            &path,
            config,
            Some(Box::new(move |chunk_index, stream_id| {
                dropped_clone.borrow_mut().push((chunk_index, stream_id));
            })),
        )
        .unwrap();
        w.set_stream_name(1, "telemetry");
        for i in 0..20u64 {
            w.write_chunk(1, &[0u8; 16], i, 0).unwrap();
        }
        w.quit_history().unwrap();
        w.close().unwrap();
        assert!(!dropped.borrow().is_empty());
    }
}
