//! Version-neutral logical model. Both containers decode into these types
//! and the writer serializes them back out; everything between open and
//! save operates here.

use crate::conversion::Conversion;

/// Raw encoding of a channel's field inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    UnsignedIntegerLE,
    UnsignedIntegerBE,
    SignedIntegerLE,
    SignedIntegerBE,
    FloatLE,
    FloatBE,
    StringLatin1,
    StringUtf8,
    ByteArray,
}

impl DataType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::UnsignedIntegerLE
                | DataType::UnsignedIntegerBE
                | DataType::SignedIntegerLE
                | DataType::SignedIntegerBE
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::FloatLE | DataType::FloatBE)
    }

    pub fn is_big_endian(self) -> bool {
        matches!(
            self,
            DataType::UnsignedIntegerBE | DataType::SignedIntegerBE | DataType::FloatBE
        )
    }
}

/// File-level metadata shared by both containers.
#[derive(Debug, Clone, Default)]
pub(crate) struct FileInfo {
    /// Absolute start of the measurement in nanoseconds since the Unix
    /// epoch, 0 when the file does not declare one.
    pub start_time_ns: u64,
    /// Creating program identifier from the identification block.
    pub program: String,
    pub comment: Option<String>,
}

/// How a stored data chunk's payload bytes are encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkEncoding {
    Raw,
    Deflate,
    /// Column transposition over `columns`-byte rows, then deflate.
    TransposeDeflate {
        columns: u32,
    },
}

/// One data fragment still living in the backing store.
#[derive(Debug, Clone)]
pub(crate) struct StoredChunk {
    /// Absolute file offset of the payload (past the block header).
    pub data_offset: u64,
    pub stored_len: u64,
    /// Payload length after decompression; equals `stored_len` for raw
    /// chunks.
    pub unpacked_len: u64,
    pub encoding: ChunkEncoding,
}

/// Record bytes of one group, either owned or referenced in the store.
#[derive(Debug, Clone)]
pub(crate) enum GroupData {
    Owned(Vec<Vec<u8>>),
    Stored(Vec<StoredChunk>),
}

#[derive(Debug, Clone)]
pub(crate) struct Channel {
    pub name: String,
    pub unit: Option<String>,
    pub comment: Option<String>,
    pub data_type: DataType,
    /// Byte position of the field inside the sample area of a record.
    pub byte_offset: u32,
    pub bit_offset: u8,
    /// Bits per element.
    pub bit_count: u32,
    /// Array extents, empty for scalars. Array elements are stored
    /// contiguously starting at `byte_offset` with `bit_offset` 0.
    pub shape: Vec<usize>,
    pub conversion: Conversion,
    /// Whether this channel is the group's time master.
    pub master: bool,
}

impl Channel {
    pub fn element_count(&self) -> usize {
        if self.shape.is_empty() {
            1
        } else {
            self.shape.iter().product()
        }
    }

    /// Bytes of the record this channel's field occupies, starting at
    /// `byte_offset`. Array elements sit at whole-byte strides.
    pub fn byte_span(&self) -> usize {
        let elem = (self.bit_offset as usize + self.bit_count as usize).div_ceil(8);
        let stride = (self.bit_count as usize).div_ceil(8);
        (self.element_count() - 1) * stride + elem
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ChannelGroup {
    pub comment: Option<String>,
    /// Bytes of record-id prefix in front of every stored record.
    pub record_id_len: u8,
    /// Sample bytes per record, excluding record id and invalidation
    /// bytes.
    pub record_len: u32,
    /// Trailing bytes per record (invalidation area).
    pub invalidation_len: u32,
    pub cycles: u64,
    pub channels: Vec<Channel>,
    pub data: GroupData,
}

impl ChannelGroup {
    /// Total bytes of one stored record.
    pub fn stride(&self) -> usize {
        self.record_id_len as usize + self.record_len as usize + self.invalidation_len as usize
    }

    pub fn master_index(&self) -> Option<usize> {
        self.channels.iter().position(|c| c.master)
    }
}

/// Result of a full layout decode.
#[derive(Debug, Clone)]
pub(crate) struct DecodedFile {
    pub info: FileInfo,
    pub groups: Vec<ChannelGroup>,
}
