//! A fixed-region, file-backed circular buffer with optional wrap-around.

use std::collections::VecDeque;

use crate::error::IfhdResult;

/// Bookkeeping for one item written into the ring buffer. `additional`
/// carries whatever metadata the owner needs in the drop callback (for the
/// chunk stream: `{chunk_index, stream_id, flags, timestamp}`, see
/// [`crate::writer`]).
#[derive(Debug, Clone)]
pub struct RingItem<A> {
    pub file_pos: u64,
    pub size: u64,
    pub additional: A,
}

/// One contiguous span of bytes to append; `append_item` accepts a sequence
/// of these so callers don't need to concatenate header + payload first.
pub type Piece<'a> = &'a [u8];

/// Positioned, truncatable byte sink backing a [`RingBufferSink`]. Kept
/// separate from `std::io::{Write, Seek}` so the same ring logic works over
/// [`crate::io::AlignedFile`] (which exposes sector-aware `IfhdResult`-typed
/// methods rather than the stdlib traits) and, in tests, an in-memory buffer.
pub trait RingFile {
    fn write_all(&mut self, buf: &[u8]) -> IfhdResult<()>;
    fn set_file_pos(&mut self, offset: u64) -> IfhdResult<()>;
    fn truncate(&mut self, size: u64) -> IfhdResult<()>;
}

impl RingFile for crate::io::AlignedFile {
    fn write_all(&mut self, buf: &[u8]) -> IfhdResult<()> {
        crate::io::AlignedFile::write_all(self, buf)
    }

    fn set_file_pos(&mut self, offset: u64) -> IfhdResult<()> {
        crate::io::AlignedFile::set_file_pos(self, offset as i64, crate::io::SeekAnchor::Begin)
    }

    fn truncate(&mut self, size: u64) -> IfhdResult<()> {
        crate::io::AlignedFile::truncate(self, size)
    }
}

impl RingFile for std::io::Cursor<Vec<u8>> {
    fn write_all(&mut self, buf: &[u8]) -> IfhdResult<()> {
        use std::io::Write;
        Write::write_all(self, buf)?;
        Ok(())
    }

    fn set_file_pos(&mut self, offset: u64) -> IfhdResult<()> {
        use std::io::{Seek, SeekFrom};
        self.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> IfhdResult<()> {
        self.get_mut().resize(size as usize, 0);
        Ok(())
    }
}

/// A file-backed ring buffer over a contiguous region starting at
/// `start_offset`. When `max_size` is set, writes that would cross it trigger
/// a wrap: the file truncates to the current tail, the write position resets
/// to `start_offset`, and items at the head whose file positions fall in the
/// region about to be overwritten are dropped one at a time via the provided
/// callback.
pub struct RingBufferSink<W, A, F>
where
    W: RingFile,
    F: FnMut(&RingItem<A>, &RingItem<A>),
{
    writer: W,
    start_offset: u64,
    max_size: Option<u64>,
    alignment: u64,
    write_pos: u64,
    items: VecDeque<RingItem<A>>,
    appending: bool,
    drop_cb: Option<F>,
}

impl<W, A, F> RingBufferSink<W, A, F>
where
    W: RingFile,
    A: Clone,
    F: FnMut(&RingItem<A>, &RingItem<A>),
{
    pub fn new(writer: W, start_offset: u64, max_size: Option<u64>, alignment: u64, drop_cb: Option<F>) -> Self {
        Self {
            writer,
            start_offset,
            max_size,
            alignment,
            write_pos: start_offset,
            items: VecDeque::new(),
            appending: false,
            drop_cb,
        }
    }

    pub fn current_write_pos(&self) -> u64 {
        self.write_pos
    }

    pub fn is_appending(&self) -> bool {
        self.appending
    }

    fn padded_len(&self, raw_len: u64) -> u64 {
        let a = self.alignment;
        if a <= 1 {
            raw_len
        } else {
            (raw_len + a - 1) / a * a
        }
    }

    /// Appends one item made up of `pieces`, followed by alignment padding.
    /// Returns the file position the item was written at. While wrapping,
    /// items overtaken by the wrap are evicted and `drop_cb` fires once per
    /// eviction with `(dropped, new_head)`.
    pub fn append_item(&mut self, pieces: &[Piece<'_>], additional: A) -> IfhdResult<u64> {
        let raw_len: usize = pieces.iter().map(|p| p.len()).sum();
        let total_len = self.padded_len(raw_len as u64);

        if !self.appending {
            if let Some(max) = self.max_size {
                let region_end = self.start_offset + max;
                if self.write_pos + total_len > region_end {
                    // Wrap: truncate to current tail, reset to region start.
                    log::debug!(
                        "ring buffer wrapping at offset {} (region {}..{})",
                        self.write_pos,
                        self.start_offset,
                        region_end
                    );
                    self.writer.truncate(self.write_pos)?;
                    self.write_pos = self.start_offset;
                    self.evict_overwritten_region(total_len);
                }
            }
        }

        let item_pos = self.write_pos;
        self.writer.set_file_pos(item_pos)?;
        for piece in pieces {
            self.writer.write_all(piece)?;
        }
        let padding = (total_len - raw_len as u64) as usize;
        if padding > 0 {
            self.writer.write_all(&vec![crate::PADDING_BYTE; padding])?;
        }

        self.write_pos += total_len;

        let new_item = RingItem {
            file_pos: item_pos,
            size: total_len,
            additional,
        };
        self.items.push_back(new_item);
        Ok(item_pos)
    }

    fn evict_overwritten_region(&mut self, incoming_len: u64) {
        let overwritten_end = self.write_pos + incoming_len;
        loop {
            let Some(front) = self.items.front() else { break };
            if front.file_pos >= overwritten_end {
                break;
            }
            let dropped = self.items.pop_front().unwrap();
            if let Some(next) = self.items.front() {
                if let Some(cb) = self.drop_cb.as_mut() {
                    cb(&dropped, next);
                }
            } else if let Some(cb) = self.drop_cb.as_mut() {
                let placeholder = RingItem {
                    file_pos: self.write_pos,
                    size: 0,
                    additional: dropped.additional.clone(),
                };
                cb(&dropped, &placeholder);
            }
        }
    }

    /// Stops wrap-around; subsequent writes extend the file linearly.
    /// Returns `(rear, last)` items so the owner can fix up header fields.
    pub fn start_appending(&mut self) -> (Option<RingItem<A>>, Option<RingItem<A>>) {
        self.appending = true;
        let rear = self.items.front().cloned();
        let last = self.items.back().cloned();
        (rear, last)
    }

    pub fn items(&self) -> impl Iterator<Item = &RingItem<A>> {
        self.items.iter()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    #[test]
    fn appends_without_wrap_when_under_max_size() {
        let dropped = Rc::new(RefCell::new(Vec::new()));
        let dropped_clone = dropped.clone();
        let mut ring = RingBufferSink::new(
            Cursor::new(vec![0u8; 0]),
            0,
            Some(1000),
            16,
            Some(move |d: &RingItem<u32>, _n: &RingItem<u32>| dropped_clone.borrow_mut().push(d.additional)),
        );
        let p1 = ring.append_item(&[b"hello"], 1).unwrap();
        let p2 = ring.append_item(&[b"world!"], 2).unwrap();
        assert_eq!(p1, 0);
        assert_eq!(p2, 16); // aligned up from 5
        assert!(dropped.borrow().is_empty());
    }

    #[test]
    fn wraps_and_drops_overwritten_items() {
        let dropped = Rc::new(RefCell::new(Vec::new()));
        let dropped_clone = dropped.clone();
        // Small region: 32 bytes, alignment 16, so only 2 items fit before a wrap.
        let mut ring = RingBufferSink::new(
            Cursor::new(vec![0u8; 0]),
            0,
            Some(32),
            16,
            Some(move |d: &RingItem<u32>, _n: &RingItem<u32>| dropped_clone.borrow_mut().push(d.additional)),
        );
        ring.append_item(&[b"aaaa"], 1).unwrap(); // pos 0
        ring.append_item(&[b"bbbb"], 2).unwrap(); // pos 16
        ring.append_item(&[b"cccc"], 3).unwrap(); // wraps: drops item 1
        assert_eq!(*dropped.borrow(), vec![1]);
    }

    #[test]
    fn start_appending_stops_wrap_and_returns_rear_and_last() {
        let mut ring = RingBufferSink::new(
            Cursor::new(vec![0u8; 0]),
            0,
            Some(1000),
            16,
            None::<fn(&RingItem<u32>, &RingItem<u32>)>,
        );
        ring.append_item(&[b"a"], 1).unwrap();
        ring.append_item(&[b"b"], 2).unwrap();
        let (rear, last) = ring.start_appending();
        assert_eq!(rear.unwrap().additional, 1);
        assert_eq!(last.unwrap().additional, 2);
        assert!(ring.is_appending());

        // no more wraps after start_appending, even past max_size
        let before = ring.items().count();
        ring.append_item(&[&[0u8; 2000][..]], 3).unwrap();
        assert_eq!(ring.items().count(), before + 1);
    }
}
