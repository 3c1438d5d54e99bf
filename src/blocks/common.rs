//! Byte-level helpers shared by both container layouts, and the 64-byte
//! identification block that both begin with.

use crate::{Error, Result, version::MdfVersion};

pub(crate) fn validate_buffer_size(
    bytes: &[u8],
    expected: usize,
    file: &'static str,
    line: u32,
) -> Result<()> {
    if bytes.len() < expected {
        return Err(Error::TooShortBuffer {
            actual: bytes.len(),
            expected,
            file,
            line,
        });
    }
    Ok(())
}

macro_rules! le_reader {
    ($name:ident, $ty:ty) => {
        pub(crate) fn $name(bytes: &[u8], offset: usize) -> Result<$ty> {
            const WIDTH: usize = size_of::<$ty>();
            validate_buffer_size(bytes, offset + WIDTH, file!(), line!())?;
            let arr: [u8; WIDTH] = bytes[offset..offset + WIDTH]
                .try_into()
                .map_err(|_| Error::TooShortBuffer {
                    actual: bytes.len(),
                    expected: offset + WIDTH,
                    file: file!(),
                    line: line!(),
                })?;
            Ok(<$ty>::from_le_bytes(arr))
        }
    };
}

le_reader!(read_u64, u64);
le_reader!(read_u32, u32);
le_reader!(read_u16, u16);
le_reader!(read_i16, i16);
le_reader!(read_f64, f64);

pub(crate) fn read_u8(bytes: &[u8], offset: usize) -> Result<u8> {
    validate_buffer_size(bytes, offset + 1, file!(), line!())?;
    Ok(bytes[offset])
}

/// Zero padding needed to bring `len` up to an 8-byte boundary.
pub(crate) fn padding_to_align_8(len: usize) -> usize {
    (8 - (len % 8)) % 8
}

/// Read a fixed-width, space- or NUL-padded text field.
pub(crate) fn read_fixed_str(bytes: &[u8], offset: usize, width: usize) -> Result<String> {
    validate_buffer_size(bytes, offset + width, file!(), line!())?;
    let raw = &bytes[offset..offset + width];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(raw[..end]
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end()
        .to_string())
}

/// Write `text` into a fixed-width NUL-padded field.
pub(crate) fn write_fixed_str(buf: &mut [u8], text: &str) {
    for (slot, b) in buf.iter_mut().zip(text.bytes().chain(core::iter::repeat(0))) {
        *slot = b;
    }
}

pub(crate) const ID_BLOCK_LEN: usize = 64;
const ID_FILE_MAGIC: &str = "MDF     ";

/// The 64-byte identification block. Same shape in both containers; the
/// numeric version field at offset 28 drives codec dispatch.
#[derive(Debug, Clone)]
pub(crate) struct IdBlock {
    pub version: MdfVersion,
    pub program: String,
}

impl IdBlock {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        validate_buffer_size(bytes, ID_BLOCK_LEN, file!(), line!())?;
        let magic = read_fixed_str(bytes, 0, 8)?;
        if magic != ID_FILE_MAGIC.trim_end() {
            return Err(Error::CorruptBlock {
                offset: 0,
                reason: format!("bad file magic {magic:?}"),
            });
        }
        let version_number = read_u16(bytes, 28)?;
        let version = MdfVersion::from_version_number(version_number)?;
        let program = read_fixed_str(bytes, 16, 8)?;
        Ok(IdBlock { version, program })
    }

    pub fn to_bytes(&self) -> [u8; ID_BLOCK_LEN] {
        let mut buf = [0u8; ID_BLOCK_LEN];
        buf[..8].copy_from_slice(ID_FILE_MAGIC.as_bytes());
        buf[8..16].copy_from_slice(self.version.id_string().as_bytes());
        write_fixed_str(&mut buf[16..24], &self.program);
        // Offsets 24..28 are the default byte order and float format in
        // the 3.x layout, both zero for little-endian IEEE.
        buf[28..30].copy_from_slice(&self.version.version_number().to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_block_round_trip() -> Result<()> {
        let id = IdBlock {
            version: MdfVersion::V4_10,
            program: "mdfio".into(),
        };
        let bytes = id.to_bytes();
        let back = IdBlock::from_bytes(&bytes)?;
        assert_eq!(back.version, MdfVersion::V4_10);
        assert_eq!(back.program, "mdfio");
        Ok(())
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut bytes = [0u8; ID_BLOCK_LEN];
        bytes[..8].copy_from_slice(b"NOTMDF  ");
        assert!(matches!(
            IdBlock::from_bytes(&bytes),
            Err(Error::CorruptBlock { .. })
        ));
    }

    #[test]
    fn foreign_version_number_is_unsupported() {
        let mut bytes = IdBlock {
            version: MdfVersion::V3_30,
            program: String::new(),
        }
        .to_bytes();
        bytes[28..30].copy_from_slice(&510u16.to_le_bytes());
        assert!(matches!(
            IdBlock::from_bytes(&bytes),
            Err(Error::UnsupportedVersion { version: 510 })
        ));
    }

    #[test]
    fn padding_math() {
        assert_eq!(padding_to_align_8(24), 0);
        assert_eq!(padding_to_align_8(25), 7);
        assert_eq!(padding_to_align_8(31), 1);
    }
}
