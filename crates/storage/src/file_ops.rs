//! Injectable file-ops contract (`spec.md` §6.3) plus the default buffered
//! implementation layered on positional I/O.
//!
//! Every other module in this crate is generic over [`FileOps`] rather than
//! talking to `std::fs::File` directly, so tests can substitute an
//! in-memory implementation and so the `UNBUFFERED` open/compact flags can
//! swap in [`RawFileOps`] without touching the block substrate or chunk
//! codec.

use crate::error::Result;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The positional-I/O surface every backing store must provide.
pub trait FileOps: Send {
    fn pread(&mut self, pos: u64, len: usize) -> Result<Vec<u8>>;
    fn pwrite(&mut self, pos: u64, data: &[u8]) -> Result<()>;
    /// Returns the current end-of-file offset.
    fn goto_eof(&mut self) -> Result<u64>;
    fn sync(&mut self) -> Result<()>;
    /// Extends (or truncates) the file to exactly `len` bytes, used by the
    /// header manager to pre-extend the file ahead of the first fsync.
    fn set_len(&mut self, len: u64) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Raw positional I/O with no caching, selected by the `UNBUFFERED` flag.
pub struct RawFileOps {
    file: File,
}

impl RawFileOps {
    pub fn open(path: &Path, read_only: bool, create: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(create && !read_only)
            .open(path)?;
        Ok(Self { file })
    }
}

impl FileOps for RawFileOps {
    fn pread(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn pwrite(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn goto_eof(&mut self) -> Result<u64> {
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Defaults matching `spec.md` §6.3's described backend; overridable via
/// [`BufferedFileOps::open_with_limits`].
pub const DEFAULT_READ_CACHE_SLOTS: usize = 8;
pub const DEFAULT_READ_CACHE_BLOCK: usize = 8192;
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 128 * 1024;

struct CacheSlot {
    block: u64,
    data: Vec<u8>,
}

/// Default file-ops implementation: a small LRU of fixed-size read blocks
/// plus a single write-behind buffer, flushed on a block boundary crossing
/// or on `sync`. Mirrors the default backend described in `spec.md` §6.3.
pub struct BufferedFileOps {
    file: File,
    read_cache: VecDeque<CacheSlot>,
    read_cache_slots: usize,
    read_cache_block: usize,
    write_buf: Vec<u8>,
    write_buf_pos: Option<u64>,
    write_buffer_size: usize,
    file_len: u64,
}

impl BufferedFileOps {
    pub fn open(path: &Path, read_only: bool, create: bool) -> Result<Self> {
        Self::open_with_limits(
            path,
            read_only,
            create,
            DEFAULT_READ_CACHE_SLOTS,
            DEFAULT_READ_CACHE_BLOCK,
            DEFAULT_WRITE_BUFFER_SIZE,
        )
    }

    pub fn open_with_limits(
        path: &Path,
        read_only: bool,
        create: bool,
        read_cache_slots: usize,
        read_cache_block: usize,
        write_buffer_size: usize,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(create && !read_only)
            .open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            file,
            read_cache: VecDeque::with_capacity(read_cache_slots),
            read_cache_slots,
            read_cache_block,
            write_buf: Vec::with_capacity(write_buffer_size),
            write_buf_pos: None,
            write_buffer_size,
            file_len,
        })
    }

    fn flush_write_buf(&mut self) -> Result<()> {
        if let Some(pos) = self.write_buf_pos.take() {
            self.file.seek(SeekFrom::Start(pos))?;
            self.file.write_all(&self.write_buf)?;
            self.write_buf.clear();
        }
        Ok(())
    }

    fn read_through_cache(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        // Read straight through once the span doesn't fit a single cache
        // block cleanly; caching only pays off for small sequential reads.
        if len > self.read_cache_block {
            self.flush_write_buf()?;
            let mut buf = vec![0u8; len];
            self.file.seek(SeekFrom::Start(pos))?;
            self.file.read_exact(&mut buf)?;
            return Ok(buf);
        }

        let block = pos / self.read_cache_block as u64;
        let block_start = block * self.read_cache_block as u64;

        if let Some(slot) = self.read_cache.iter().find(|s| s.block == block) {
            let offset = (pos - block_start) as usize;
            if offset + len <= slot.data.len() {
                return Ok(slot.data[offset..offset + len].to_vec());
            }
        }

        self.flush_write_buf()?;
        let span = self.read_cache_block.min((self.file_len.saturating_sub(block_start)) as usize);
        let mut data = vec![0u8; span];
        if span > 0 {
            self.file.seek(SeekFrom::Start(block_start))?;
            self.file.read_exact(&mut data)?;
        }

        if self.read_cache.len() >= self.read_cache_slots {
            self.read_cache.pop_front();
        }
        self.read_cache.push_back(CacheSlot { block, data: data.clone() });

        let offset = (pos - block_start) as usize;
        let end = (offset + len).min(data.len());
        Ok(data.get(offset..end).unwrap_or(&[]).to_vec())
    }
}

impl FileOps for BufferedFileOps {
    fn pread(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        self.read_through_cache(pos, len)
    }

    fn pwrite(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        self.read_cache.clear();

        let contiguous = self.write_buf_pos == Some(pos + 0)
            || self
                .write_buf_pos
                .is_some_and(|p| p + self.write_buf.len() as u64 == pos);

        if !contiguous || self.write_buf.len() + data.len() > self.write_buffer_size {
            self.flush_write_buf()?;
            self.write_buf_pos = Some(pos);
        } else if self.write_buf_pos.is_none() {
            self.write_buf_pos = Some(pos);
        }

        self.write_buf.extend_from_slice(data);
        self.file_len = self.file_len.max(pos + data.len() as u64);

        if self.write_buf.len() >= self.write_buffer_size {
            self.flush_write_buf()?;
        }
        Ok(())
    }

    fn goto_eof(&mut self) -> Result<u64> {
        self.flush_write_buf()?;
        let len = self.file.seek(SeekFrom::End(0))?;
        self.file_len = len;
        Ok(len)
    }

    fn sync(&mut self) -> Result<()> {
        self.flush_write_buf()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.flush_write_buf()?;
        self.file.set_len(len)?;
        self.file_len = len;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush_write_buf()?;
        Ok(())
    }
}

/// In-memory `FileOps` used by unit tests that shouldn't touch disk.
pub struct MemFileOps {
    pub data: Vec<u8>,
}

impl Default for MemFileOps {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

impl FileOps for MemFileOps {
    fn pread(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let pos = pos as usize;
        if pos + len > self.data.len() {
            return Err(crate::error::StorageError::ShortRead {
                offset: pos as u64,
                expected: len,
                got: self.data.len().saturating_sub(pos),
            });
        }
        Ok(self.data[pos..pos + len].to_vec())
    }

    fn pwrite(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        let pos = pos as usize;
        if pos + data.len() > self.data.len() {
            self.data.resize(pos + data.len(), 0);
        }
        self.data[pos..pos + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn goto_eof(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Path helper used by the header manager / compactor when renaming a
/// finished compaction target into place.
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
