//! Bit-exact field access inside fixed-length records, plus iteration
//! over a group's logical record stream when it is split across chunks.

use crate::{
    Error, Result,
    model::{Channel, DataType},
    signal::Samples,
};

/// Extract an unsigned integer field. `big_endian` selects the byte
/// order of the field's byte span; `bit_offset` counts from the least
/// significant bit of the span. A 64-bit field at a non-zero bit offset
/// spans nine bytes, so the fold goes through a wider accumulator.
pub(crate) fn extract_unsigned(
    record: &[u8],
    byte_offset: usize,
    bit_offset: u8,
    bit_count: u32,
    big_endian: bool,
) -> u64 {
    let span = (bit_offset as usize + bit_count as usize).div_ceil(8);
    let bytes = &record[byte_offset..byte_offset + span];
    let raw = if big_endian {
        bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128)
    } else {
        bytes.iter().rev().fold(0u128, |acc, &b| (acc << 8) | b as u128)
    };
    let shifted = if big_endian {
        raw >> (span * 8 - bit_offset as usize - bit_count as usize)
    } else {
        raw >> bit_offset
    };
    if bit_count >= 64 {
        shifted as u64
    } else {
        (shifted as u64) & ((1u64 << bit_count) - 1)
    }
}

/// Sign-extend a `bit_count`-wide unsigned value.
pub(crate) fn sign_extend(value: u64, bit_count: u32) -> i64 {
    if bit_count == 0 || bit_count >= 64 {
        return value as i64;
    }
    let sign_bit = 1u64 << (bit_count - 1);
    if value & sign_bit != 0 {
        let mask = (1u64 << bit_count) - 1;
        (value as i64) | !(mask as i64)
    } else {
        value as i64
    }
}

/// Write `bit_count` low bits of `value` into a byte-aligned field.
/// Only byte-aligned whole-byte fields are patched this way (master
/// rebasing); bit-packed fields are never rewritten in place.
pub(crate) fn insert_unsigned(
    record: &mut [u8],
    byte_offset: usize,
    bit_count: u32,
    value: u64,
    big_endian: bool,
) {
    let bytes = (bit_count as usize) / 8;
    for i in 0..bytes {
        let shift = if big_endian {
            (bytes - 1 - i) * 8
        } else {
            i * 8
        };
        record[byte_offset + i] = ((value >> shift) & 0xff) as u8;
    }
}

/// Drive `f` once per record over a chunked byte stream. Records may
/// span chunk boundaries; partial tails are carried into the next chunk.
pub(crate) fn for_each_record<I, F>(chunks: I, stride: usize, mut f: F) -> Result<()>
where
    I: IntoIterator<Item = Result<Vec<u8>>>,
    F: FnMut(&[u8]) -> Result<()>,
{
    if stride == 0 {
        return Ok(());
    }
    let mut carry: Vec<u8> = Vec::new();
    for chunk in chunks {
        let chunk = chunk?;
        let mut data = if carry.is_empty() {
            chunk
        } else {
            carry.extend_from_slice(&chunk);
            core::mem::take(&mut carry)
        };
        let whole = data.len() / stride * stride;
        for rec in data[..whole].chunks_exact(stride) {
            f(rec)?;
        }
        data.drain(..whole);
        carry = data;
    }
    Ok(())
}

/// Split a record stream into owned chunks of at most `max_bytes`,
/// keeping every chunk record-aligned. Used when normalizing group data
/// for structural operations and when staging writer output.
pub(crate) const MAX_CHUNK_BYTES: usize = 4 * 1024 * 1024;

pub(crate) struct ChunkBuilder {
    stride: usize,
    records_per_chunk: usize,
    chunks: Vec<Vec<u8>>,
}

impl ChunkBuilder {
    pub fn new(stride: usize) -> Self {
        let records_per_chunk = if stride == 0 {
            0
        } else {
            (MAX_CHUNK_BYTES / stride).max(1)
        };
        ChunkBuilder {
            stride,
            records_per_chunk,
            chunks: Vec::new(),
        }
    }

    pub fn push_record(&mut self, record: &[u8]) {
        debug_assert_eq!(record.len(), self.stride);
        let needs_new = match self.chunks.last() {
            Some(last) => last.len() / self.stride >= self.records_per_chunk,
            None => true,
        };
        if needs_new {
            self.chunks
                .push(Vec::with_capacity(self.records_per_chunk.min(4096) * self.stride));
        }
        if let Some(last) = self.chunks.last_mut() {
            last.extend_from_slice(record);
        }
    }

    pub fn finish(self) -> Vec<Vec<u8>> {
        self.chunks
    }
}

/// Decode every record's field of one channel into typed samples.
/// `id_skip` is the record-id prefix length of the stored records.
pub(crate) fn decode_channel_samples<I>(
    chunks: I,
    stride: usize,
    id_skip: usize,
    channel: &Channel,
    cycles: u64,
) -> Result<Samples>
where
    I: IntoIterator<Item = Result<Vec<u8>>>,
{
    let elements = channel.element_count();
    let base = id_skip + channel.byte_offset as usize;
    let elem_bytes = (channel.bit_count as usize).div_ceil(8);
    let capacity = (cycles as usize).saturating_mul(elements);

    let out = match channel.data_type {
        DataType::UnsignedIntegerLE | DataType::UnsignedIntegerBE => {
            let be = channel.data_type.is_big_endian();
            let mut values = Vec::with_capacity(capacity);
            for_each_record(chunks, stride, |rec| {
                for e in 0..elements {
                    values.push(extract_unsigned(
                        rec,
                        base + e * elem_bytes,
                        channel.bit_offset,
                        channel.bit_count,
                        be,
                    ));
                }
                Ok(())
            })?;
            Samples::UnsignedInteger(values)
        }
        DataType::SignedIntegerLE | DataType::SignedIntegerBE => {
            let be = channel.data_type.is_big_endian();
            let mut values = Vec::with_capacity(capacity);
            for_each_record(chunks, stride, |rec| {
                for e in 0..elements {
                    let raw = extract_unsigned(
                        rec,
                        base + e * elem_bytes,
                        channel.bit_offset,
                        channel.bit_count,
                        be,
                    );
                    values.push(sign_extend(raw, channel.bit_count));
                }
                Ok(())
            })?;
            Samples::SignedInteger(values)
        }
        DataType::FloatLE | DataType::FloatBE => {
            let be = channel.data_type.is_big_endian();
            match channel.bit_count {
                32 => {
                    let mut values = Vec::with_capacity(capacity);
                    for_each_record(chunks, stride, |rec| {
                        for e in 0..elements {
                            let bits =
                                extract_unsigned(rec, base + e * 4, 0, 32, be) as u32;
                            values.push(f32::from_bits(bits));
                        }
                        Ok(())
                    })?;
                    Samples::Float32(values)
                }
                64 => {
                    let mut values = Vec::with_capacity(capacity);
                    for_each_record(chunks, stride, |rec| {
                        for e in 0..elements {
                            let bits = extract_unsigned(rec, base + e * 8, 0, 64, be);
                            values.push(f64::from_bits(bits));
                        }
                        Ok(())
                    })?;
                    Samples::Float64(values)
                }
                other => {
                    return Err(Error::CorruptBlock {
                        offset: 0,
                        reason: format!(
                            "channel {:?}: unsupported {other}-bit float",
                            channel.name
                        ),
                    });
                }
            }
        }
        DataType::StringLatin1 | DataType::StringUtf8 => {
            let field = (channel.bit_count as usize).div_ceil(8);
            let utf8 = channel.data_type == DataType::StringUtf8;
            let mut values = Vec::with_capacity(capacity);
            for_each_record(chunks, stride, |rec| {
                let bytes = &rec[base..base + field];
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let text = if utf8 {
                    String::from_utf8_lossy(&bytes[..end]).into_owned()
                } else {
                    bytes[..end].iter().map(|&b| b as char).collect()
                };
                values.push(text);
                Ok(())
            })?;
            Samples::Text(values)
        }
        DataType::ByteArray => {
            let field = (channel.bit_count as usize).div_ceil(8) * elements;
            let mut values = Vec::with_capacity(capacity);
            for_each_record(chunks, stride, |rec| {
                values.push(rec[base..base + field].to_vec());
                Ok(())
            })?;
            Samples::ByteArrays(values)
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::Conversion;

    #[test]
    fn unsigned_le_with_bit_offset() {
        // 0b0000_0101_1010_0000 stored LE, field at bit 5, width 6.
        let record = [0b1010_0000u8, 0b0000_0101];
        assert_eq!(extract_unsigned(&record, 0, 5, 6, false), 0b101101);
    }

    #[test]
    fn unsigned_be_whole_bytes() {
        let record = [0x12u8, 0x34, 0x56];
        assert_eq!(extract_unsigned(&record, 0, 0, 24, true), 0x123456);
        assert_eq!(extract_unsigned(&record, 1, 0, 16, true), 0x3456);
    }

    #[test]
    fn full_width_fields() {
        let record = u64::MAX.to_le_bytes();
        assert_eq!(extract_unsigned(&record, 0, 0, 64, false), u64::MAX);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn offset_full_width_fields_span_nine_bytes() {
        let record = [0xffu8; 9];
        assert_eq!(extract_unsigned(&record, 0, 4, 64, false), u64::MAX);
        assert_eq!(extract_unsigned(&record, 0, 4, 64, true), u64::MAX);

        // A known pattern shifted across the ninth byte.
        let value = 0x0123_4567_89ab_cdefu64;
        let mut rec = [0u8; 9];
        let wide = (value as u128) << 3;
        for (i, b) in rec.iter_mut().enumerate() {
            *b = ((wide >> (i * 8)) & 0xff) as u8;
        }
        assert_eq!(extract_unsigned(&rec, 0, 3, 64, false), value);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0b111, 3), -1);
        assert_eq!(sign_extend(0b011, 3), 3);
        assert_eq!(sign_extend(0x80, 8), -128);
        assert_eq!(sign_extend(0x7f, 8), 127);
    }

    #[test]
    fn insert_round_trips() {
        let mut rec = [0u8; 8];
        insert_unsigned(&mut rec, 0, 64, f64::to_bits(-3.25), false);
        assert_eq!(extract_unsigned(&rec, 0, 0, 64, false), f64::to_bits(-3.25));
    }

    #[test]
    fn records_split_across_chunks() -> Result<()> {
        // Nine bytes of 3-byte records split 4 + 5.
        let chunks = vec![Ok(vec![1u8, 2, 3, 4]), Ok(vec![5u8, 6, 7, 8, 9])];
        let mut seen = Vec::new();
        for_each_record(chunks, 3, |rec| {
            seen.push(rec.to_vec());
            Ok(())
        })?;
        assert_eq!(seen, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]);
        Ok(())
    }

    #[test]
    fn decode_scalar_unsigned() -> Result<()> {
        let channel = Channel {
            name: "counter".into(),
            unit: None,
            comment: None,
            data_type: DataType::UnsignedIntegerLE,
            byte_offset: 1,
            bit_offset: 0,
            bit_count: 16,
            shape: Vec::new(),
            conversion: Conversion::Identity,
            master: false,
        };
        // Two 4-byte records; the field sits one byte in.
        let data = vec![Ok(vec![0xaa, 0x01, 0x00, 0xff, 0xaa, 0x02, 0x01, 0xff])];
        let samples = decode_channel_samples(data, 4, 0, &channel, 2)?;
        assert_eq!(samples, Samples::UnsignedInteger(vec![1, 258]));
        Ok(())
    }

    #[test]
    fn decode_array_elements() -> Result<()> {
        let channel = Channel {
            name: "vec".into(),
            unit: None,
            comment: None,
            data_type: DataType::UnsignedIntegerLE,
            byte_offset: 0,
            bit_offset: 0,
            bit_count: 8,
            shape: vec![3],
            conversion: Conversion::Identity,
            master: false,
        };
        let data = vec![Ok(vec![1u8, 2, 3, 4, 5, 6])];
        let samples = decode_channel_samples(data, 3, 0, &channel, 2)?;
        assert_eq!(samples, Samples::UnsignedInteger(vec![1, 2, 3, 4, 5, 6]));
        Ok(())
    }

    #[test]
    fn chunk_builder_is_record_aligned() {
        let mut b = ChunkBuilder::new(3);
        for i in 0..10u8 {
            b.push_record(&[i, i, i]);
        }
        let chunks = b.finish();
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 30);
        for c in &chunks {
            assert_eq!(c.len() % 3, 0);
        }
    }
}
