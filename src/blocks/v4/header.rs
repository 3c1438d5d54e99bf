use crate::{
    Result,
    blocks::common::{read_u64, validate_buffer_size},
    blocks::v4::{BlockHeader, BlockParse},
};

pub(crate) const HD_BLOCK_LEN: usize = 104;

/// `##HD`: file header, fixed 104 bytes, first block after the
/// identification block.
#[derive(Debug, Clone)]
pub(crate) struct HeaderBlock {
    pub header: BlockHeader,
    pub dg_first: u64,
    pub md_comment: u64,
    /// Absolute start time in nanoseconds since the Unix epoch.
    pub abs_time_ns: u64,
}

impl BlockParse for HeaderBlock {
    const ID: &'static str = "##HD";

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::parse_header(bytes)?;
        validate_buffer_size(bytes, HD_BLOCK_LEN, file!(), line!())?;
        Ok(HeaderBlock {
            header,
            dg_first: read_u64(bytes, 24)?,
            md_comment: read_u64(bytes, 64)?,
            abs_time_ns: read_u64(bytes, 72)?,
        })
    }
}

impl HeaderBlock {
    pub fn new(abs_time_ns: u64) -> Self {
        HeaderBlock {
            header: BlockHeader::new("##HD", HD_BLOCK_LEN as u64, 6),
            dg_first: 0,
            md_comment: 0,
            abs_time_ns,
        }
    }

    /// Byte offset of the first-data-group link, for post-hoc patching.
    pub const DG_FIRST_OFFSET: u64 = 24;
    pub const MD_COMMENT_OFFSET: u64 = 64;

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; HD_BLOCK_LEN];
        buf[..24].copy_from_slice(&self.header.to_bytes()?);
        buf[24..32].copy_from_slice(&self.dg_first.to_le_bytes());
        // Links 32..72 (file history, hierarchy, attachments, events,
        // comment) stay zero unless set.
        buf[64..72].copy_from_slice(&self.md_comment.to_le_bytes());
        buf[72..80].copy_from_slice(&self.abs_time_ns.to_le_bytes());
        // Time flags at 84: zero marks a local, offset-free timestamp.
        Ok(buf)
    }
}
