use crate::{
    Error, Result,
    blocks::common::{read_u8, read_u16, read_u64, validate_buffer_size},
    blocks::v4::{BlockHeader, BlockParse},
};

/// `##CA`: array descriptor attached to a channel's composition link.
/// Only the plain fixed-size array form is modeled: array type 0 with
/// CN-template storage and contiguous elements.
#[derive(Debug, Clone)]
pub(crate) struct ChannelArrayBlock {
    pub header: BlockHeader,
    pub ca_type: u8,
    pub storage: u8,
    pub dim_sizes: Vec<u64>,
}

impl BlockParse for ChannelArrayBlock {
    const ID: &'static str = "##CA";

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::parse_header(bytes)?;
        // Data section starts after the links.
        let base = 24 + header.links_nr as usize * 8;
        validate_buffer_size(bytes, base + 16, file!(), line!())?;
        let ca_type = read_u8(bytes, base)?;
        let storage = read_u8(bytes, base + 1)?;
        let ndim = read_u16(bytes, base + 2)? as usize;
        if ca_type != 0 || storage != 0 {
            return Err(Error::CorruptBlock {
                offset: 0,
                reason: format!(
                    "unsupported array descriptor (type {ca_type}, storage {storage})"
                ),
            });
        }
        validate_buffer_size(bytes, base + 16 + ndim * 8, file!(), line!())?;
        let mut dim_sizes = Vec::with_capacity(ndim);
        for d in 0..ndim {
            dim_sizes.push(read_u64(bytes, base + 16 + d * 8)?);
        }
        Ok(ChannelArrayBlock {
            header,
            ca_type,
            storage,
            dim_sizes,
        })
    }
}

impl ChannelArrayBlock {
    pub fn new(dim_sizes: Vec<u64>) -> Self {
        // One composition link + fixed data section + one u64 per
        // dimension.
        let block_len = 24 + 8 + 16 + dim_sizes.len() as u64 * 8;
        ChannelArrayBlock {
            header: BlockHeader::new("##CA", block_len, 1),
            ca_type: 0,
            storage: 0,
            dim_sizes,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.header.block_len as usize);
        buf.extend_from_slice(&self.header.to_bytes()?);
        buf.extend_from_slice(&0u64.to_le_bytes()); // composition link
        buf.push(self.ca_type);
        buf.push(self.storage);
        buf.extend_from_slice(&(self.dim_sizes.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // flags
        buf.extend_from_slice(&0i32.to_le_bytes()); // byte offset base
        buf.extend_from_slice(&0u32.to_le_bytes()); // invalidation base
        for d in &self.dim_sizes {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        debug_assert_eq!(buf.len() as u64, self.header.block_len);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_round_trip() -> Result<()> {
        let ca = ChannelArrayBlock::new(vec![2, 3]);
        let back = ChannelArrayBlock::from_bytes(&ca.to_bytes()?)?;
        assert_eq!(back.dim_sizes, vec![2, 3]);
        Ok(())
    }
}
