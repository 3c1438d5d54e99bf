use crate::{
    Result,
    blocks::common::{read_u8, read_u32, read_u64, validate_buffer_size},
    blocks::v4::{BlockHeader, BlockParse},
    model::DataType,
};

pub(crate) const CN_BLOCK_LEN: usize = 160;

pub(crate) const CHANNEL_TYPE_VALUE: u8 = 0;
pub(crate) const CHANNEL_TYPE_MASTER: u8 = 2;
pub(crate) const SYNC_TYPE_TIME: u8 = 1;

/// `##CN`: one channel's layout and metadata links, fixed 160 bytes.
#[derive(Debug, Clone)]
pub(crate) struct ChannelBlock {
    pub header: BlockHeader,
    pub cn_next: u64,
    /// Composition link: a `##CA` block for array channels.
    pub composition: u64,
    pub tx_name: u64,
    pub cc_conversion: u64,
    /// Signal data link (variable-length storage); unsupported here.
    pub data: u64,
    pub md_unit: u64,
    pub md_comment: u64,
    pub channel_type: u8,
    pub sync_type: u8,
    pub data_type: u8,
    pub bit_offset: u8,
    pub byte_offset: u32,
    pub bit_count: u32,
    pub flags: u32,
}

impl BlockParse for ChannelBlock {
    const ID: &'static str = "##CN";

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::parse_header(bytes)?;
        validate_buffer_size(bytes, CN_BLOCK_LEN, file!(), line!())?;
        Ok(ChannelBlock {
            header,
            cn_next: read_u64(bytes, 24)?,
            composition: read_u64(bytes, 32)?,
            tx_name: read_u64(bytes, 40)?,
            cc_conversion: read_u64(bytes, 56)?,
            data: read_u64(bytes, 64)?,
            md_unit: read_u64(bytes, 72)?,
            md_comment: read_u64(bytes, 80)?,
            channel_type: read_u8(bytes, 88)?,
            sync_type: read_u8(bytes, 89)?,
            data_type: read_u8(bytes, 90)?,
            bit_offset: read_u8(bytes, 91)?,
            byte_offset: read_u32(bytes, 92)?,
            bit_count: read_u32(bytes, 96)?,
            flags: read_u32(bytes, 100)?,
        })
    }
}

impl ChannelBlock {
    pub const CN_NEXT_OFFSET: u64 = 24;
    pub const COMPOSITION_OFFSET: u64 = 32;
    pub const TX_NAME_OFFSET: u64 = 40;
    pub const CC_CONVERSION_OFFSET: u64 = 56;
    pub const MD_UNIT_OFFSET: u64 = 72;
    pub const MD_COMMENT_OFFSET: u64 = 80;

    pub fn new() -> Self {
        ChannelBlock {
            header: BlockHeader::new("##CN", CN_BLOCK_LEN as u64, 8),
            cn_next: 0,
            composition: 0,
            tx_name: 0,
            cc_conversion: 0,
            data: 0,
            md_unit: 0,
            md_comment: 0,
            channel_type: CHANNEL_TYPE_VALUE,
            sync_type: 0,
            data_type: 0,
            bit_offset: 0,
            byte_offset: 0,
            bit_count: 0,
            flags: 0,
        }
    }

    pub fn is_time_master(&self) -> bool {
        self.channel_type == CHANNEL_TYPE_MASTER && self.sync_type == SYNC_TYPE_TIME
    }

    /// Map the numeric data-type code onto the neutral model. Codes the
    /// model cannot express (UTF-16, CANopen composites, complex) come
    /// back as `None` and the channel is skipped.
    pub fn model_data_type(&self) -> Option<DataType> {
        Some(match self.data_type {
            0 => DataType::UnsignedIntegerLE,
            1 => DataType::UnsignedIntegerBE,
            2 => DataType::SignedIntegerLE,
            3 => DataType::SignedIntegerBE,
            4 => DataType::FloatLE,
            5 => DataType::FloatBE,
            6 => DataType::StringLatin1,
            7 => DataType::StringUtf8,
            10 => DataType::ByteArray,
            _ => return None,
        })
    }

    pub fn data_type_code(data_type: DataType) -> u8 {
        match data_type {
            DataType::UnsignedIntegerLE => 0,
            DataType::UnsignedIntegerBE => 1,
            DataType::SignedIntegerLE => 2,
            DataType::SignedIntegerBE => 3,
            DataType::FloatLE => 4,
            DataType::FloatBE => 5,
            DataType::StringLatin1 => 6,
            DataType::StringUtf8 => 7,
            DataType::ByteArray => 10,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; CN_BLOCK_LEN];
        buf[..24].copy_from_slice(&self.header.to_bytes()?);
        buf[24..32].copy_from_slice(&self.cn_next.to_le_bytes());
        buf[32..40].copy_from_slice(&self.composition.to_le_bytes());
        buf[40..48].copy_from_slice(&self.tx_name.to_le_bytes());
        // Link 48 is the source block, unused.
        buf[56..64].copy_from_slice(&self.cc_conversion.to_le_bytes());
        buf[64..72].copy_from_slice(&self.data.to_le_bytes());
        buf[72..80].copy_from_slice(&self.md_unit.to_le_bytes());
        buf[80..88].copy_from_slice(&self.md_comment.to_le_bytes());
        buf[88] = self.channel_type;
        buf[89] = self.sync_type;
        buf[90] = self.data_type;
        buf[91] = self.bit_offset;
        buf[92..96].copy_from_slice(&self.byte_offset.to_le_bytes());
        buf[96..100].copy_from_slice(&self.bit_count.to_le_bytes());
        buf[100..104].copy_from_slice(&self.flags.to_le_bytes());
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trip() -> Result<()> {
        let mut cn = ChannelBlock::new();
        cn.channel_type = CHANNEL_TYPE_MASTER;
        cn.sync_type = SYNC_TYPE_TIME;
        cn.data_type = ChannelBlock::data_type_code(DataType::FloatLE);
        cn.byte_offset = 0;
        cn.bit_count = 64;
        let back = ChannelBlock::from_bytes(&cn.to_bytes()?)?;
        assert!(back.is_time_master());
        assert_eq!(back.model_data_type(), Some(DataType::FloatLE));
        assert_eq!(back.bit_count, 64);
        Ok(())
    }

    #[test]
    fn exotic_data_types_map_to_none() -> Result<()> {
        let mut cn = ChannelBlock::new();
        cn.data_type = 14; // CANopen time composite
        let back = ChannelBlock::from_bytes(&cn.to_bytes()?)?;
        assert_eq!(back.model_data_type(), None);
        Ok(())
    }
}
