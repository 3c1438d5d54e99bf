//! Backing stores for the three memory strategies.
//!
//! Every reader in the crate goes through [`BlockStore::read_range`], so
//! the difference between the strategies is purely how much is kept
//! resident: everything (`Full`), a small read-ahead window (`Low`) or
//! nothing (`Minimum`). All three answer identical bytes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::{Error, Result};

/// How much of a file is kept in memory after open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemoryMode {
    /// Decode everything at open and own all sample data.
    #[default]
    Full,
    /// Cache the decoded layout, read sample data per query.
    Low,
    /// Keep nothing; re-decode the layout on each query.
    Minimum,
}

/// Bounded random access to the raw container bytes.
pub(crate) trait BlockStore {
    fn read_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>>;
    fn len(&self) -> u64;
}

fn range_error(offset: u64, len: usize, total: u64) -> Error {
    Error::CorruptBlock {
        offset,
        reason: format!("read of {len} bytes extends past end of file ({total} bytes)"),
    }
}

/// Whole file resident in memory.
pub(crate) struct EagerStore {
    data: Vec<u8>,
}

impl EagerStore {
    pub fn new(data: Vec<u8>) -> Self {
        EagerStore { data }
    }
}

impl BlockStore for EagerStore {
    fn read_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let start = usize::try_from(offset)
            .map_err(|_| range_error(offset, len, self.data.len() as u64))?;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| range_error(offset, len, self.data.len() as u64))?;
        Ok(self.data[start..end].to_vec())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

const READ_AHEAD: usize = 64 * 1024;

/// File-backed store with a 64 KiB read-ahead window. Sequential walks
/// over small descriptor blocks hit the window; large reads bypass it.
pub(crate) struct BufferedFileStore {
    file: File,
    file_len: u64,
    buf: Vec<u8>,
    buf_offset: u64,
}

impl BufferedFileStore {
    pub fn new(file: File) -> Result<Self> {
        let file_len = file.metadata()?.len();
        Ok(BufferedFileStore {
            file,
            file_len,
            buf: Vec::new(),
            buf_offset: 0,
        })
    }

    fn fill_window(&mut self, offset: u64) -> Result<()> {
        let want = READ_AHEAD.min((self.file_len - offset) as usize);
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; want];
        self.file.read_exact(&mut buf)?;
        self.buf = buf;
        self.buf_offset = offset;
        Ok(())
    }
}

impl BlockStore for BufferedFileStore {
    fn read_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset.checked_add(len as u64).is_none_or(|e| e > self.file_len) {
            return Err(range_error(offset, len, self.file_len));
        }
        if len >= READ_AHEAD {
            self.file.seek(SeekFrom::Start(offset))?;
            let mut out = vec![0u8; len];
            self.file.read_exact(&mut out)?;
            return Ok(out);
        }
        let in_window = offset >= self.buf_offset
            && offset + len as u64 <= self.buf_offset + self.buf.len() as u64;
        if !in_window {
            self.fill_window(offset)?;
        }
        let start = (offset - self.buf_offset) as usize;
        Ok(self.buf[start..start + len].to_vec())
    }

    fn len(&self) -> u64 {
        self.file_len
    }
}

/// Plain seek-and-read store, nothing cached.
pub(crate) struct MinimalFileStore {
    file: File,
    file_len: u64,
}

impl MinimalFileStore {
    pub fn new(file: File) -> Result<Self> {
        let file_len = file.metadata()?.len();
        Ok(MinimalFileStore { file, file_len })
    }
}

impl BlockStore for MinimalFileStore {
    fn read_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset.checked_add(len as u64).is_none_or(|e| e > self.file_len) {
            return Err(range_error(offset, len, self.file_len));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut out = vec![0u8; len];
        self.file.read_exact(&mut out)?;
        Ok(out)
    }

    fn len(&self) -> u64 {
        self.file_len
    }
}
