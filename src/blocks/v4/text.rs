use crate::{
    Result,
    blocks::common::padding_to_align_8,
    blocks::v4::{BLOCK_HEADER_LEN, BlockHeader, BlockParse},
};

/// `##TX`: NUL-terminated text, zero padded to 8-byte alignment. `##MD`
/// metadata blocks share the same payload shape and are read through
/// [`TextBlock::from_bytes_any_text`].
#[derive(Debug, Clone)]
pub(crate) struct TextBlock {
    pub header: BlockHeader,
    pub text: String,
}

impl BlockParse for TextBlock {
    const ID: &'static str = "##TX";

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::parse_header(bytes)?;
        Self::payload(header, bytes)
    }
}

impl TextBlock {
    /// Accept either `##TX` or `##MD`; both carry text after the header.
    pub fn from_bytes_any_text(bytes: &[u8]) -> Result<Self> {
        let header = BlockHeader::from_bytes(bytes)?;
        if header.id != "##TX" && header.id != "##MD" {
            return Err(crate::Error::BlockId {
                actual: header.id,
                expected: "##TX",
            });
        }
        Self::payload(header, bytes)
    }

    fn payload(header: BlockHeader, bytes: &[u8]) -> Result<Self> {
        let data_len = (header.block_len as usize).saturating_sub(BLOCK_HEADER_LEN);
        crate::blocks::common::validate_buffer_size(
            bytes,
            BLOCK_HEADER_LEN + data_len,
            file!(),
            line!(),
        )?;
        let data = &bytes[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + data_len];
        let text = String::from_utf8_lossy(data)
            .trim_matches('\0')
            .to_string();
        Ok(TextBlock { header, text })
    }

    pub fn new(text: &str) -> Self {
        let text_size = text.len() + 1;
        let unpadded = BLOCK_HEADER_LEN + text_size;
        let block_len = unpadded + padding_to_align_8(unpadded);
        TextBlock {
            header: BlockHeader::new("##TX", block_len as u64, 0),
            text: text.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.header.block_len as usize);
        buf.extend_from_slice(&self.header.to_bytes()?);
        buf.extend_from_slice(self.text.as_bytes());
        buf.push(0);
        buf.resize(self.header.block_len as usize, 0);
        debug_assert_eq!(buf.len() % 8, 0);
        Ok(buf)
    }
}
