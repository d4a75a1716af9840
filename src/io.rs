//! Sector-aware positioned I/O with an optional OS-page-cache bypass and a
//! user-space read-ahead cache.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use enumset::{EnumSet, EnumSetType};

use crate::error::{IfhdError, IfhdResult};

/// Default sector size assumed when the containing volume's isn't queried.
pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Anchor for [`AlignedFile::set_file_pos`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekAnchor {
    Begin,
    Current,
    End,
}

/// Recognized open-mode options.
#[derive(Debug, EnumSetType)]
pub enum OpenOption {
    Read,
    Write,
    ReadWrite,
    Append,
    SharedRead,
    SharedWrite,
    SequentialAccess,
    Temporary,
    WriteThrough,
    BypassSystemCache,
}

/// A positioned byte-stream wrapper that optionally bypasses the OS page
/// cache, maintaining a user-space read-ahead cache and sector alignment.
pub struct AlignedFile {
    file: File,
    options: EnumSet<OpenOption>,
    sector_size: u64,
    /// Raw OS file position (always a multiple of `sector_size` while bypass is active).
    raw_pos: u64,
    /// Logical position exposed to callers.
    logical_pos: u64,
    read_cache: VecDeque<u8>,
    read_cache_origin: u64,
    read_cache_capacity: usize,
}

impl AlignedFile {
    /// Opens `path` with the given option set. `bypass_system_cache` requires
    /// all subsequent seeks to land on sector-size multiples.
    pub fn open(path: impl AsRef<Path>, options: EnumSet<OpenOption>) -> IfhdResult<Self> {
        let mut oo = OpenOptions::new();
        oo.read(options.contains(OpenOption::Read) || options.contains(OpenOption::ReadWrite));
        oo.write(
            options.contains(OpenOption::Write)
                || options.contains(OpenOption::ReadWrite)
                || options.contains(OpenOption::Append),
        );
        oo.append(options.contains(OpenOption::Append));
        if options.contains(OpenOption::Write) || options.contains(OpenOption::ReadWrite) {
            oo.create(true);
        }

        let file = oo.open(&path)?;

        Ok(Self {
            file,
            options,
            sector_size: DEFAULT_SECTOR_SIZE,
            raw_pos: 0,
            logical_pos: 0,
            read_cache: VecDeque::new(),
            read_cache_origin: 0,
            read_cache_capacity: 64 * 1024,
        })
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    pub fn bypass_active(&self) -> bool {
        self.options.contains(OpenOption::BypassSystemCache)
    }

    pub fn set_read_cache_capacity(&mut self, bytes: usize) {
        self.read_cache_capacity = bytes;
    }

    /// Current logical position, accounting for bytes still buffered in the
    /// user-space read cache.
    pub fn get_file_pos(&self) -> u64 {
        self.logical_pos
    }

    /// When bypass is active, only `SeekAnchor::Begin` is permitted; the
    /// sub-sector residual is tracked and skipped on the next read.
    pub fn set_file_pos(&mut self, offset: i64, anchor: SeekAnchor) -> IfhdResult<()> {
        if self.bypass_active() && anchor != SeekAnchor::Begin {
            return Err(IfhdError::invalid_argument(
                "bypass_system_cache requires SeekAnchor::Begin",
            ));
        }

        let target = match anchor {
            SeekAnchor::Begin => offset,
            SeekAnchor::Current => self.logical_pos as i64 + offset,
            SeekAnchor::End => self.file.seek(SeekFrom::End(0))? as i64 + offset,
        };
        if target < 0 {
            return Err(IfhdError::invalid_argument("seek before start of file"));
        }
        let target = target as u64;

        self.read_cache.clear();
        if self.bypass_active() {
            let aligned = (target / self.sector_size) * self.sector_size;
            self.file.seek(SeekFrom::Start(aligned))?;
            self.raw_pos = aligned;
            self.logical_pos = target;
        } else {
            self.file.seek(SeekFrom::Start(target))?;
            self.raw_pos = target;
            self.logical_pos = target;
        }
        Ok(())
    }

    /// Advances the logical position by `n` bytes without copying.
    pub fn skip(&mut self, n: u64) -> IfhdResult<()> {
        self.set_file_pos(self.logical_pos as i64 + n as i64, SeekAnchor::Begin)
    }

    fn refill_cache(&mut self) -> IfhdResult<()> {
        self.read_cache.clear();
        let aligned_start = (self.logical_pos / self.sector_size) * self.sector_size;
        self.file.seek(SeekFrom::Start(aligned_start))?;
        let mut buf = vec![0u8; self.read_cache_capacity.max(self.sector_size as usize)];
        let n = self.file.read(&mut buf)?;
        buf.truncate(n);
        self.raw_pos = aligned_start + n as u64;
        self.read_cache_origin = aligned_start;
        self.read_cache.extend(buf);
        Ok(())
    }

    /// Reads up to `buf.len()` bytes, returning the number actually read.
    pub fn read(&mut self, buf: &mut [u8]) -> IfhdResult<usize> {
        if !self.bypass_active() {
            if self.file.stream_position()? != self.logical_pos {
                self.file.seek(SeekFrom::Start(self.logical_pos))?;
            }
            let n = self.file.read(buf)?;
            self.logical_pos += n as u64;
            self.raw_pos = self.logical_pos;
            return Ok(n);
        }

        let mut written = 0usize;
        while written < buf.len() {
            let cache_end = self.read_cache_origin + self.read_cache.len() as u64;
            if self.logical_pos < self.read_cache_origin || self.logical_pos >= cache_end {
                self.refill_cache()?;
                if self.read_cache.is_empty() {
                    break;
                }
            }
            let cache_end = self.read_cache_origin + self.read_cache.len() as u64;
            let skip_in_cache = (self.logical_pos - self.read_cache_origin) as usize;
            let available = (cache_end - self.logical_pos) as usize;
            let want = (buf.len() - written).min(available);
            for (i, byte) in self
                .read_cache
                .iter()
                .skip(skip_in_cache)
                .take(want)
                .enumerate()
            {
                buf[written + i] = *byte;
            }
            written += want;
            self.logical_pos += want as u64;
            if want == 0 {
                break;
            }
        }
        Ok(written)
    }

    /// Like [`Self::read`], but fails with [`IfhdError::EndOfFile`] if fewer
    /// bytes than requested were available.
    pub fn read_all(&mut self, buf: &mut [u8]) -> IfhdResult<()> {
        let n = self.read(buf)?;
        if n < buf.len() {
            return Err(IfhdError::EndOfFile);
        }
        Ok(())
    }

    /// Writes `buf`, looping until the whole buffer is committed. When bypass
    /// is active, the tail is zero-padded to a sector-size multiple and the
    /// logical position advances by the unpadded count only.
    pub fn write_all(&mut self, buf: &[u8]) -> IfhdResult<()> {
        self.read_cache.clear();

        if !self.bypass_active() {
            if self.file.stream_position()? != self.logical_pos {
                self.file.seek(SeekFrom::Start(self.logical_pos))?;
            }
            self.file.write_all(buf)?;
            self.logical_pos += buf.len() as u64;
            self.raw_pos = self.logical_pos;
            return Ok(());
        }

        let sector = self.sector_size as usize;
        let padded_len = buf.len().div_ceil(sector) * sector;
        let mut padded = vec![0u8; padded_len];
        padded[..buf.len()].copy_from_slice(buf);

        self.file.seek(SeekFrom::Start(self.logical_pos))?;
        self.file.write_all(&padded)?;
        self.logical_pos += buf.len() as u64;
        self.raw_pos = self.logical_pos;
        Ok(())
    }

    /// Sets the file length exactly. If `size` is less than the current
    /// position, the position becomes undefined until the next seek.
    pub fn truncate(&mut self, size: u64) -> IfhdResult<()> {
        self.file.set_len(size)?;
        Ok(())
    }

    pub fn flush(&mut self) -> IfhdResult<()> {
        self.file.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enumset::enum_set;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aligned.bin");
        {
            let mut f = AlignedFile::open(&path, enum_set!(OpenOption::ReadWrite)).unwrap();
            f.write_all(b"hello world").unwrap();
        }
        let mut f = AlignedFile::open(&path, enum_set!(OpenOption::Read)).unwrap();
        let mut buf = [0u8; 11];
        f.read_all(&mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_all_fails_on_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        {
            let mut f = AlignedFile::open(&path, enum_set!(OpenOption::ReadWrite)).unwrap();
            f.write_all(b"abc").unwrap();
        }
        let mut f = AlignedFile::open(&path, enum_set!(OpenOption::Read)).unwrap();
        let mut buf = [0u8; 10];
        assert_matches::assert_matches!(f.read_all(&mut buf), Err(IfhdError::EndOfFile));
    }

    #[test]
    fn bypass_pads_to_sector_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bypass.bin");
        {
            let mut f = AlignedFile::open(
                &path,
                enum_set!(OpenOption::ReadWrite | OpenOption::BypassSystemCache),
            )
            .unwrap();
            f.write_all(b"not-a-full-sector").unwrap();
            assert_eq!(f.get_file_pos(), "not-a-full-sector".len() as u64);
        }
        let on_disk = std::fs::metadata(&path).unwrap().len();
        assert_eq!(on_disk % DEFAULT_SECTOR_SIZE, 0);
    }

    #[test]
    fn set_file_pos_rejects_non_begin_when_bypassing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seek.bin");
        let mut f = AlignedFile::open(
            &path,
            enum_set!(OpenOption::ReadWrite | OpenOption::BypassSystemCache),
        )
        .unwrap();
        assert!(f.set_file_pos(0, SeekAnchor::Current).is_err());
        assert!(f.set_file_pos(0, SeekAnchor::Begin).is_ok());
    }
}
