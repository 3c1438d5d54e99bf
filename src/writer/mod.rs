//! Serialization: stage the block stream into a sibling temporary file,
//! then move it over the destination atomically.

pub(crate) mod v3;
pub(crate) mod v4;

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::{Error, Result, blocks::common::padding_to_align_8, mdf::Mdf, model::ChunkEncoding};

/// How record streams are packed on save. The 3.x layout has no
/// compressed form; a non-raw choice degrades to raw there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Compression {
    #[default]
    Uncompressed,
    /// Zlib-deflated record chunks.
    Deflate,
    /// Records transposed to byte columns before deflation; same-offset
    /// bytes of consecutive records land next to each other, which
    /// compresses numeric streams noticeably better.
    TransposedDeflate,
}

impl Compression {
    pub(crate) fn encoding(self, stride: u32) -> ChunkEncoding {
        match self {
            Compression::Uncompressed => ChunkEncoding::Raw,
            Compression::Deflate => ChunkEncoding::Deflate,
            Compression::TransposedDeflate => ChunkEncoding::TransposeDeflate { columns: stride },
        }
    }
}

/// Append-only block writer over the staging file, with enough seeking
/// to patch forward links once their targets are known.
pub(crate) struct BlockSink {
    out: BufWriter<File>,
    offset: u64,
}

impl BlockSink {
    pub fn new(file: File) -> Self {
        BlockSink {
            out: BufWriter::new(file),
            offset: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Write bytes at the current position; returns their start offset.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<u64> {
        let at = self.offset;
        self.out.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(at)
    }

    /// Pad to the next 8-byte boundary, then write one block.
    pub fn write_block(&mut self, bytes: &[u8]) -> Result<u64> {
        self.align8()?;
        self.write_raw(bytes)
    }

    pub fn align8(&mut self) -> Result<()> {
        let pad = padding_to_align_8(self.offset as usize);
        if pad > 0 {
            self.write_raw(&[0u8; 7][..pad])?;
        }
        Ok(())
    }

    /// Overwrite 8 bytes at `at` with a little-endian link.
    pub fn patch_u64(&mut self, at: u64, value: u64) -> Result<()> {
        self.patch(at, &value.to_le_bytes())
    }

    /// Overwrite a 4-byte link; 3.x addresses must fit 32 bits.
    pub fn patch_link32(&mut self, at: u64, value: u64) -> Result<()> {
        let narrow = link32(value)?;
        self.patch(at, &narrow.to_le_bytes())
    }

    fn patch(&mut self, at: u64, bytes: &[u8]) -> Result<()> {
        self.out.flush()?;
        let inner = self.out.get_mut();
        inner.seek(SeekFrom::Start(at))?;
        inner.write_all(bytes)?;
        inner.seek(SeekFrom::Start(self.offset))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Check that a block address is expressible as a 3.x 32-bit link.
pub(crate) fn link32(addr: u64) -> Result<u32> {
    u32::try_from(addr).map_err(|_| Error::LossyConversion {
        reason: format!("block address {addr:#x} exceeds the 3.x 32-bit link width"),
    })
}

pub(crate) fn save_file(
    mdf: &Mdf,
    path: &Path,
    compression: Compression,
    overwrite: bool,
) -> Result<()> {
    if !overwrite && path.exists() {
        return Err(Error::DestinationExists {
            path: path.display().to_string(),
        });
    }
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let staging = tempfile::NamedTempFile::new_in(dir)?;
    let mut sink = BlockSink::new(staging.as_file().try_clone()?);
    (mdf.version().codec().encode)(mdf, &mut sink, compression)?;
    let written = sink.position();
    sink.finish()?;

    if overwrite {
        staging.persist(path).map_err(|e| Error::IO(e.error))?;
    } else {
        staging.persist_noclobber(path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                Error::DestinationExists {
                    path: path.display().to_string(),
                }
            } else {
                Error::IO(e.error)
            }
        })?;
    }
    debug!(
        "saved {path:?}: {written} bytes, version {}, {compression:?}",
        mdf.version()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_aligns_and_patches() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sink.bin");
        let file = File::create(&path)?;
        let mut sink = BlockSink::new(file.try_clone()?);
        sink.write_raw(&[1, 2, 3])?;
        let at = sink.write_block(&[9u8; 8])?;
        assert_eq!(at, 8);
        sink.patch_u64(0, 0xdead_beef)?;
        sink.write_raw(&[7])?;
        sink.finish()?;

        let bytes = std::fs::read(&path)?;
        assert_eq!(bytes.len(), 17);
        assert_eq!(&bytes[..8], &0xdead_beefu64.to_le_bytes());
        assert_eq!(bytes[16], 7);
        Ok(())
    }

    #[test]
    fn wide_addresses_have_no_32_bit_link() {
        assert!(link32(0x1_0000_0000).is_err());
        assert_eq!(link32(0xffff_ffff).unwrap(), u32::MAX);
    }
}
