use crate::{
    Result,
    blocks::common::{read_u8, read_u32, read_u64, validate_buffer_size},
    blocks::v4::{BlockHeader, BlockParse},
};

pub(crate) const DG_BLOCK_LEN: usize = 64;
pub(crate) const CG_BLOCK_LEN: usize = 104;

/// `##DG`: data group, owner of one record stream.
#[derive(Debug, Clone)]
pub(crate) struct DataGroupBlock {
    pub header: BlockHeader,
    pub dg_next: u64,
    pub cg_first: u64,
    pub data: u64,
    pub md_comment: u64,
    /// Bytes of record-id prefix in the stream (0 for sorted files).
    pub record_id_size: u8,
}

impl BlockParse for DataGroupBlock {
    const ID: &'static str = "##DG";

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::parse_header(bytes)?;
        validate_buffer_size(bytes, DG_BLOCK_LEN, file!(), line!())?;
        Ok(DataGroupBlock {
            header,
            dg_next: read_u64(bytes, 24)?,
            cg_first: read_u64(bytes, 32)?,
            data: read_u64(bytes, 40)?,
            md_comment: read_u64(bytes, 48)?,
            record_id_size: read_u8(bytes, 56)?,
        })
    }
}

impl DataGroupBlock {
    pub const DG_NEXT_OFFSET: u64 = 24;
    pub const CG_FIRST_OFFSET: u64 = 32;
    pub const DATA_OFFSET: u64 = 40;

    pub fn new() -> Self {
        DataGroupBlock {
            header: BlockHeader::new("##DG", DG_BLOCK_LEN as u64, 4),
            dg_next: 0,
            cg_first: 0,
            data: 0,
            md_comment: 0,
            record_id_size: 0,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; DG_BLOCK_LEN];
        buf[..24].copy_from_slice(&self.header.to_bytes()?);
        buf[24..32].copy_from_slice(&self.dg_next.to_le_bytes());
        buf[32..40].copy_from_slice(&self.cg_first.to_le_bytes());
        buf[40..48].copy_from_slice(&self.data.to_le_bytes());
        buf[48..56].copy_from_slice(&self.md_comment.to_le_bytes());
        buf[56] = self.record_id_size;
        Ok(buf)
    }
}

/// `##CG`: channel group, the record layout of one group.
#[derive(Debug, Clone)]
pub(crate) struct ChannelGroupBlock {
    pub header: BlockHeader,
    pub cg_next: u64,
    pub cn_first: u64,
    pub md_comment: u64,
    pub record_id: u64,
    pub cycles_nr: u64,
    pub flags: u16,
    /// Sample bytes per record.
    pub samples_byte_nr: u32,
    /// Trailing invalidation bytes per record.
    pub invalidation_bytes_nr: u32,
}

impl BlockParse for ChannelGroupBlock {
    const ID: &'static str = "##CG";

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::parse_header(bytes)?;
        validate_buffer_size(bytes, CG_BLOCK_LEN, file!(), line!())?;
        Ok(ChannelGroupBlock {
            header,
            cg_next: read_u64(bytes, 24)?,
            cn_first: read_u64(bytes, 32)?,
            md_comment: read_u64(bytes, 64)?,
            record_id: read_u64(bytes, 72)?,
            cycles_nr: read_u64(bytes, 80)?,
            flags: crate::blocks::common::read_u16(bytes, 88)?,
            samples_byte_nr: read_u32(bytes, 96)?,
            invalidation_bytes_nr: read_u32(bytes, 100)?,
        })
    }
}

impl ChannelGroupBlock {
    pub const CG_NEXT_OFFSET: u64 = 24;
    pub const CN_FIRST_OFFSET: u64 = 32;
    pub const CYCLES_NR_OFFSET: u64 = 80;

    pub fn new(samples_byte_nr: u32, cycles_nr: u64) -> Self {
        ChannelGroupBlock {
            header: BlockHeader::new("##CG", CG_BLOCK_LEN as u64, 6),
            cg_next: 0,
            cn_first: 0,
            md_comment: 0,
            record_id: 0,
            cycles_nr,
            flags: 0,
            samples_byte_nr,
            invalidation_bytes_nr: 0,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; CG_BLOCK_LEN];
        buf[..24].copy_from_slice(&self.header.to_bytes()?);
        buf[24..32].copy_from_slice(&self.cg_next.to_le_bytes());
        buf[32..40].copy_from_slice(&self.cn_first.to_le_bytes());
        // Links 40..64 (acquisition name/source, sample reduction) are
        // unused here.
        buf[64..72].copy_from_slice(&self.md_comment.to_le_bytes());
        buf[72..80].copy_from_slice(&self.record_id.to_le_bytes());
        buf[80..88].copy_from_slice(&self.cycles_nr.to_le_bytes());
        buf[88..90].copy_from_slice(&self.flags.to_le_bytes());
        buf[96..100].copy_from_slice(&self.samples_byte_nr.to_le_bytes());
        buf[100..104].copy_from_slice(&self.invalidation_bytes_nr.to_le_bytes());
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_group_round_trip() -> Result<()> {
        let mut dg = DataGroupBlock::new();
        dg.data = 0xdead;
        dg.record_id_size = 1;
        let back = DataGroupBlock::from_bytes(&dg.to_bytes()?)?;
        assert_eq!(back.data, 0xdead);
        assert_eq!(back.record_id_size, 1);
        Ok(())
    }

    #[test]
    fn channel_group_round_trip() -> Result<()> {
        let mut cg = ChannelGroupBlock::new(24, 1000);
        cg.invalidation_bytes_nr = 2;
        let back = ChannelGroupBlock::from_bytes(&cg.to_bytes()?)?;
        assert_eq!(back.samples_byte_nr, 24);
        assert_eq!(back.cycles_nr, 1000);
        assert_eq!(back.invalidation_bytes_nr, 2);
        Ok(())
    }
}
