//! 4.10 encoder. Blocks are appended in dependency order (texts and
//! conversions before the channel that links them), with forward links
//! patched once their target addresses are known.

use crate::{
    Result,
    blocks::common::IdBlock,
    blocks::v4::{
        array::ChannelArrayBlock,
        channel::{CHANNEL_TYPE_MASTER, ChannelBlock, SYNC_TYPE_TIME},
        conversion::ConversionBlock,
        data::{
            DataListBlock, DataZippedBlock, ZIP_TYPE_DEFLATE, ZIP_TYPE_TRANSPOSE_DEFLATE,
            compress_chunk, dt_header_bytes,
        },
        group::{ChannelGroupBlock, DataGroupBlock},
        header::HeaderBlock,
        text::TextBlock,
    },
    conversion::Conversion,
    mdf::Mdf,
    model::{Channel, ChannelGroup, ChunkEncoding},
    writer::{BlockSink, Compression},
};

pub(crate) fn encode_file(mdf: &Mdf, sink: &mut BlockSink, compression: Compression) -> Result<()> {
    let layout = mdf.layout()?;
    let groups = layout.groups();

    let id = IdBlock {
        version: mdf.version(),
        program: program_id(mdf),
    };
    sink.write_raw(&id.to_bytes())?;
    let hd_addr = sink.write_raw(&HeaderBlock::new(mdf.start_time_ns()).to_bytes()?)?;
    if let Some(comment) = mdf.comment() {
        let tx = sink.write_block(&TextBlock::new(comment).to_bytes()?)?;
        sink.patch_u64(hd_addr + HeaderBlock::MD_COMMENT_OFFSET, tx)?;
    }

    let mut prev_dg = None;
    for group in groups {
        let chunks = mdf.normalized_chunks(group)?;
        let dg_addr = write_group(sink, group, &chunks, compression)?;
        match prev_dg {
            Some(prev) => sink.patch_u64(prev + DataGroupBlock::DG_NEXT_OFFSET, dg_addr)?,
            None => sink.patch_u64(hd_addr + HeaderBlock::DG_FIRST_OFFSET, dg_addr)?,
        }
        prev_dg = Some(dg_addr);
    }
    Ok(())
}

fn program_id(mdf: &Mdf) -> String {
    let program = &mdf.info().program;
    if program.is_empty() {
        env!("CARGO_PKG_NAME").to_string()
    } else {
        program.clone()
    }
}

fn write_group(
    sink: &mut BlockSink,
    group: &ChannelGroup,
    chunks: &[Vec<u8>],
    compression: Compression,
) -> Result<u64> {
    let mut first_cn = 0;
    let mut prev_cn = None;
    for channel in &group.channels {
        let cn_addr = write_channel(sink, channel)?;
        match prev_cn {
            Some(prev) => sink.patch_u64(prev + ChannelBlock::CN_NEXT_OFFSET, cn_addr)?,
            None => first_cn = cn_addr,
        }
        prev_cn = Some(cn_addr);
    }

    let md_comment = match &group.comment {
        Some(c) => sink.write_block(&TextBlock::new(c).to_bytes()?)?,
        None => 0,
    };
    let mut cg = ChannelGroupBlock::new(group.record_len, group.cycles);
    cg.cn_first = first_cn;
    cg.md_comment = md_comment;
    cg.invalidation_bytes_nr = group.invalidation_len;
    let cg_addr = sink.write_block(&cg.to_bytes()?)?;

    let mut dg = DataGroupBlock::new();
    dg.cg_first = cg_addr;
    let dg_addr = sink.write_block(&dg.to_bytes()?)?;

    let stride = group.record_len + group.invalidation_len;
    let data_addr = write_data(sink, chunks, stride, compression)?;
    if data_addr != 0 {
        sink.patch_u64(dg_addr + DataGroupBlock::DATA_OFFSET, data_addr)?;
    }
    Ok(dg_addr)
}

fn write_channel(sink: &mut BlockSink, channel: &Channel) -> Result<u64> {
    let tx_name = sink.write_block(&TextBlock::new(&channel.name).to_bytes()?)?;
    let md_unit = match &channel.unit {
        Some(u) => sink.write_block(&TextBlock::new(u).to_bytes()?)?,
        None => 0,
    };
    let md_comment = match &channel.comment {
        Some(c) => sink.write_block(&TextBlock::new(c).to_bytes()?)?,
        None => 0,
    };
    // Identity stays a null conversion link.
    let cc_conversion = if channel.conversion.is_identity() {
        0
    } else {
        let formula_addr = match &channel.conversion {
            Conversion::Formula { expression } => {
                sink.write_block(&TextBlock::new(expression).to_bytes()?)?
            }
            _ => 0,
        };
        let cc = ConversionBlock::from_model(&channel.conversion, formula_addr)?;
        sink.write_block(&cc.to_bytes()?)?
    };
    let composition = if channel.shape.is_empty() {
        0
    } else {
        let dims = channel.shape.iter().map(|&d| d as u64).collect();
        sink.write_block(&ChannelArrayBlock::new(dims).to_bytes()?)?
    };

    let mut cn = ChannelBlock::new();
    if channel.master {
        cn.channel_type = CHANNEL_TYPE_MASTER;
        cn.sync_type = SYNC_TYPE_TIME;
    }
    cn.composition = composition;
    cn.tx_name = tx_name;
    cn.cc_conversion = cc_conversion;
    cn.md_unit = md_unit;
    cn.md_comment = md_comment;
    cn.data_type = ChannelBlock::data_type_code(channel.data_type);
    cn.bit_offset = channel.bit_offset;
    cn.byte_offset = channel.byte_offset;
    cn.bit_count = channel.bit_count;
    sink.write_block(&cn.to_bytes()?)
}

/// Write the record stream and return the data link for the `##DG`:
/// a single `##DT`/`##DZ`, or a `##DL` when there are several chunks.
fn write_data(
    sink: &mut BlockSink,
    chunks: &[Vec<u8>],
    stride: u32,
    compression: Compression,
) -> Result<u64> {
    let encoding = compression.encoding(stride);
    let mut addrs = Vec::with_capacity(chunks.len());
    let mut offsets = Vec::with_capacity(chunks.len());
    let mut logical = 0u64;
    for chunk in chunks {
        if chunk.is_empty() {
            continue;
        }
        let addr = match encoding {
            ChunkEncoding::Raw => {
                let mut block = dt_header_bytes(chunk.len() as u64)?;
                block.extend_from_slice(chunk);
                sink.write_block(&block)?
            }
            ChunkEncoding::Deflate | ChunkEncoding::TransposeDeflate { .. } => {
                let packed = compress_chunk(chunk, encoding);
                let (zip_type, zip_parameter) = match encoding {
                    ChunkEncoding::TransposeDeflate { columns } => {
                        (ZIP_TYPE_TRANSPOSE_DEFLATE, columns)
                    }
                    _ => (ZIP_TYPE_DEFLATE, 0),
                };
                let mut block = DataZippedBlock::header_bytes(
                    zip_type,
                    zip_parameter,
                    chunk.len() as u64,
                    packed.len() as u64,
                )?;
                block.extend_from_slice(&packed);
                sink.write_block(&block)?
            }
        };
        addrs.push(addr);
        offsets.push(logical);
        logical += chunk.len() as u64;
    }
    match addrs.len() {
        0 => Ok(0),
        1 => Ok(addrs[0]),
        _ => {
            let dl = DataListBlock::with_offsets(addrs, offsets);
            sink.write_block(&dl.to_bytes()?)
        }
    }
}
