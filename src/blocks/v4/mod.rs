//! 4.x block layouts: 24-byte headers with 4-char ids, 64-bit links,
//! 8-byte alignment.

pub(crate) mod array;
pub(crate) mod channel;
pub(crate) mod conversion;
pub(crate) mod data;
pub(crate) mod decode;
pub(crate) mod group;
pub(crate) mod header;
pub(crate) mod text;

use crate::{
    Error, Result,
    blocks::common::{read_u32, read_u64, validate_buffer_size},
};

pub(crate) const BLOCK_HEADER_LEN: usize = 24;

/// The 24-byte header every 4.x block starts with.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BlockHeader {
    pub id: String,
    pub block_len: u64,
    pub links_nr: u64,
}

impl BlockHeader {
    pub fn new(id: &str, block_len: u64, links_nr: u64) -> Self {
        BlockHeader {
            id: id.to_string(),
            block_len,
            links_nr,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        validate_buffer_size(bytes, BLOCK_HEADER_LEN, file!(), line!())?;
        let id = bytes[..4].iter().map(|&b| b as char).collect::<String>();
        // Offset 4 is reserved.
        let _reserved = read_u32(bytes, 4)?;
        let block_len = read_u64(bytes, 8)?;
        let links_nr = read_u64(bytes, 16)?;
        Ok(BlockHeader {
            id,
            block_len,
            links_nr,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.id.len() != 4 {
            return Err(Error::Serialization(format!(
                "block id must be 4 chars, got {:?}",
                self.id
            )));
        }
        let mut buf = Vec::with_capacity(BLOCK_HEADER_LEN);
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&self.block_len.to_le_bytes());
        buf.extend_from_slice(&self.links_nr.to_le_bytes());
        Ok(buf)
    }
}

/// Parsing contract for fixed-id 4.x blocks.
pub(crate) trait BlockParse: Sized {
    const ID: &'static str;

    fn from_bytes(bytes: &[u8]) -> Result<Self>;

    /// Parse and id-check the common header.
    fn parse_header(bytes: &[u8]) -> Result<BlockHeader> {
        let header = BlockHeader::from_bytes(bytes)?;
        if header.id != Self::ID {
            return Err(Error::BlockId {
                actual: header.id,
                expected: Self::ID,
            });
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() -> Result<()> {
        let header = BlockHeader::new("##DG", 64, 4);
        let bytes = header.to_bytes()?;
        assert_eq!(bytes.len(), BLOCK_HEADER_LEN);
        assert_eq!(BlockHeader::from_bytes(&bytes)?, header);
        Ok(())
    }
}
