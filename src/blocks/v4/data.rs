//! Sample-data carriers: `##DT` (raw records), `##DZ` (compressed) and
//! `##DL` (fragment list).

use miniz_oxide::{deflate::compress_to_vec_zlib, inflate::decompress_to_vec_zlib};

use crate::{
    Error, Result,
    blocks::common::{read_u8, read_u32, read_u64, validate_buffer_size},
    blocks::v4::{BLOCK_HEADER_LEN, BlockHeader, BlockParse},
    model::ChunkEncoding,
};

pub(crate) const DZ_HEADER_LEN: usize = 48;
pub(crate) const ZIP_TYPE_DEFLATE: u8 = 0;
pub(crate) const ZIP_TYPE_TRANSPOSE_DEFLATE: u8 = 1;
const DEFLATE_LEVEL: u8 = 6;

/// `##DZ` header; the compressed payload follows the 48-byte header.
#[derive(Debug, Clone)]
pub(crate) struct DataZippedBlock {
    pub header: BlockHeader,
    pub zip_type: u8,
    /// Record stride used as the transposition row width.
    pub zip_parameter: u32,
    pub original_len: u64,
    pub compressed_len: u64,
}

impl BlockParse for DataZippedBlock {
    const ID: &'static str = "##DZ";

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::parse_header(bytes)?;
        validate_buffer_size(bytes, DZ_HEADER_LEN, file!(), line!())?;
        // Bytes 24..26 name the original block kind ("DT" here).
        let zip_type = read_u8(bytes, 26)?;
        if zip_type != ZIP_TYPE_DEFLATE && zip_type != ZIP_TYPE_TRANSPOSE_DEFLATE {
            return Err(Error::CorruptBlock {
                offset: 0,
                reason: format!("unknown zip type {zip_type}"),
            });
        }
        Ok(DataZippedBlock {
            header,
            zip_type,
            zip_parameter: read_u32(bytes, 28)?,
            original_len: read_u64(bytes, 32)?,
            compressed_len: read_u64(bytes, 40)?,
        })
    }
}

impl DataZippedBlock {
    pub fn encoding(&self) -> ChunkEncoding {
        match self.zip_type {
            ZIP_TYPE_DEFLATE => ChunkEncoding::Deflate,
            _ => ChunkEncoding::TransposeDeflate {
                columns: self.zip_parameter,
            },
        }
    }

    pub fn header_bytes(
        zip_type: u8,
        zip_parameter: u32,
        original_len: u64,
        compressed_len: u64,
    ) -> Result<Vec<u8>> {
        let block_len = DZ_HEADER_LEN as u64 + compressed_len;
        let header = BlockHeader::new("##DZ", block_len, 0);
        let mut buf = Vec::with_capacity(DZ_HEADER_LEN);
        buf.extend_from_slice(&header.to_bytes()?);
        buf.extend_from_slice(b"DT");
        buf.push(zip_type);
        buf.push(0);
        buf.extend_from_slice(&zip_parameter.to_le_bytes());
        buf.extend_from_slice(&original_len.to_le_bytes());
        buf.extend_from_slice(&compressed_len.to_le_bytes());
        Ok(buf)
    }
}

/// Transpose full `columns`-wide rows into column-major order; a
/// trailing partial row passes through untouched.
pub(crate) fn transpose(data: &[u8], columns: usize) -> Vec<u8> {
    if columns < 2 || data.len() < columns {
        return data.to_vec();
    }
    let rows = data.len() / columns;
    let full = rows * columns;
    let mut out = Vec::with_capacity(data.len());
    out.resize(full, 0);
    for r in 0..rows {
        for c in 0..columns {
            out[c * rows + r] = data[r * columns + c];
        }
    }
    out.extend_from_slice(&data[full..]);
    out
}

pub(crate) fn inverse_transpose(data: &[u8], columns: usize) -> Vec<u8> {
    if columns < 2 || data.len() < columns {
        return data.to_vec();
    }
    let rows = data.len() / columns;
    let full = rows * columns;
    let mut out = Vec::with_capacity(data.len());
    out.resize(full, 0);
    for r in 0..rows {
        for c in 0..columns {
            out[r * columns + c] = data[c * rows + r];
        }
    }
    out.extend_from_slice(&data[full..]);
    out
}

/// Decode a stored payload according to its chunk encoding.
pub(crate) fn decompress_chunk(
    payload: &[u8],
    encoding: ChunkEncoding,
    expected_len: u64,
    offset: u64,
) -> Result<Vec<u8>> {
    let out = match encoding {
        ChunkEncoding::Raw => payload.to_vec(),
        ChunkEncoding::Deflate => decompress_to_vec_zlib(payload)
            .map_err(|e| corrupt(offset, &format!("inflate failed: {e}")))?,
        ChunkEncoding::TransposeDeflate { columns } => {
            let inflated = decompress_to_vec_zlib(payload)
                .map_err(|e| corrupt(offset, &format!("inflate failed: {e}")))?;
            inverse_transpose(&inflated, columns as usize)
        }
    };
    if out.len() as u64 != expected_len {
        return Err(corrupt(
            offset,
            &format!(
                "unpacked length {} does not match declared {expected_len}",
                out.len()
            ),
        ));
    }
    Ok(out)
}

/// Encode records for a `##DZ` payload.
pub(crate) fn compress_chunk(data: &[u8], encoding: ChunkEncoding) -> Vec<u8> {
    match encoding {
        ChunkEncoding::Raw => data.to_vec(),
        ChunkEncoding::Deflate => compress_to_vec_zlib(data, DEFLATE_LEVEL),
        ChunkEncoding::TransposeDeflate { columns } => {
            compress_to_vec_zlib(&transpose(data, columns as usize), DEFLATE_LEVEL)
        }
    }
}

fn corrupt(offset: u64, reason: &str) -> Error {
    Error::CorruptBlock {
        offset,
        reason: reason.to_string(),
    }
}

/// `##DL`: list of data fragments. Equal-length lists store one length,
/// otherwise a start offset per fragment.
#[derive(Debug, Clone)]
pub(crate) struct DataListBlock {
    pub header: BlockHeader,
    pub next: u64,
    pub data_links: Vec<u64>,
    pub flags: u8,
    pub equal_len: Option<u64>,
    pub offsets: Vec<u64>,
}

impl BlockParse for DataListBlock {
    const ID: &'static str = "##DL";

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Self::parse_header(bytes)?;
        let links = header.links_nr as usize;
        if links == 0 {
            return Err(Error::CorruptBlock {
                offset: 0,
                reason: "data list without links".into(),
            });
        }
        validate_buffer_size(bytes, 24 + links * 8 + 8, file!(), line!())?;
        let next = read_u64(bytes, 24)?;
        let mut data_links = Vec::with_capacity(links - 1);
        for i in 1..links {
            data_links.push(read_u64(bytes, 24 + i * 8)?);
        }
        let mut off = 24 + links * 8;
        let flags = read_u8(bytes, off)?;
        let count = read_u32(bytes, off + 4)? as usize;
        off += 8;
        let (equal_len, offsets) = if flags & 1 != 0 {
            (Some(read_u64(bytes, off)?), Vec::new())
        } else {
            validate_buffer_size(bytes, off + count * 8, file!(), line!())?;
            let mut offsets = Vec::with_capacity(count);
            for i in 0..count {
                offsets.push(read_u64(bytes, off + i * 8)?);
            }
            (None, offsets)
        };
        Ok(DataListBlock {
            header,
            next,
            data_links,
            flags,
            equal_len,
            offsets,
        })
    }
}

impl DataListBlock {
    /// List with one start offset per fragment; handles a shorter final
    /// fragment, which the equal-length form cannot.
    pub fn with_offsets(data_links: Vec<u64>, offsets: Vec<u64>) -> Self {
        let links_nr = data_links.len() as u64 + 1;
        let block_len = 24 + links_nr * 8 + 8 + offsets.len() as u64 * 8;
        DataListBlock {
            header: BlockHeader::new("##DL", block_len, links_nr),
            next: 0,
            data_links,
            flags: 0,
            equal_len: None,
            offsets,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.header.block_len as usize);
        buf.extend_from_slice(&self.header.to_bytes()?);
        buf.extend_from_slice(&self.next.to_le_bytes());
        for link in &self.data_links {
            buf.extend_from_slice(&link.to_le_bytes());
        }
        buf.push(self.flags);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&(self.data_links.len() as u32).to_le_bytes());
        if let Some(len) = self.equal_len {
            buf.extend_from_slice(&len.to_le_bytes());
        } else {
            for o in &self.offsets {
                buf.extend_from_slice(&o.to_le_bytes());
            }
        }
        debug_assert_eq!(buf.len() as u64, self.header.block_len);
        Ok(buf)
    }
}

/// Serialize the header of a raw `##DT` block; the record bytes follow.
pub(crate) fn dt_header_bytes(payload_len: u64) -> Result<Vec<u8>> {
    BlockHeader::new("##DT", BLOCK_HEADER_LEN as u64 + payload_len, 0).to_bytes()
}
