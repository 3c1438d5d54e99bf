//! Walk a 4.x block graph into the version-neutral model.

use log::warn;

use crate::{
    Error, Result,
    blocks::common::{ID_BLOCK_LEN, IdBlock},
    blocks::v4::{
        BLOCK_HEADER_LEN, BlockHeader, BlockParse,
        array::ChannelArrayBlock,
        channel::ChannelBlock,
        conversion::ConversionBlock,
        data::{DZ_HEADER_LEN, DataListBlock, DataZippedBlock},
        group::{ChannelGroupBlock, DataGroupBlock},
        header::HeaderBlock,
        text::TextBlock,
    },
    conversion::Conversion,
    model::{Channel, ChannelGroup, ChunkEncoding, DecodedFile, FileInfo, GroupData, StoredChunk},
    store::BlockStore,
};

/// Upper bound for descriptor blocks read in one piece. Data payloads
/// are scanned by header only and never pass through this path.
const MAX_DESCRIPTOR_LEN: u64 = 16 * 1024 * 1024;

fn corrupt(offset: u64, reason: impl Into<String>) -> Error {
    Error::CorruptBlock {
        offset,
        reason: reason.into(),
    }
}

fn read_header(store: &mut dyn BlockStore, addr: u64) -> Result<BlockHeader> {
    let bytes = store.read_range(addr, BLOCK_HEADER_LEN)?;
    let header = BlockHeader::from_bytes(&bytes)?;
    if header.block_len < BLOCK_HEADER_LEN as u64
        || addr.checked_add(header.block_len).is_none_or(|e| e > store.len())
    {
        return Err(corrupt(
            addr,
            format!("block length {} out of bounds", header.block_len),
        ));
    }
    Ok(header)
}

/// Read a whole descriptor block.
fn read_block(store: &mut dyn BlockStore, addr: u64) -> Result<Vec<u8>> {
    let header = read_header(store, addr)?;
    if header.block_len > MAX_DESCRIPTOR_LEN {
        return Err(corrupt(
            addr,
            format!("descriptor block of {} bytes", header.block_len),
        ));
    }
    store.read_range(addr, header.block_len as usize)
}

/// Resolve an optional `##TX`/`##MD` link.
fn read_text(store: &mut dyn BlockStore, addr: u64) -> Result<Option<String>> {
    if addr == 0 {
        return Ok(None);
    }
    let bytes = read_block(store, addr)?;
    let block = TextBlock::from_bytes_any_text(&bytes)
        .map_err(|e| corrupt(addr, format!("text block: {e}")))?;
    if block.text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(block.text))
    }
}

fn read_conversion(store: &mut dyn BlockStore, addr: u64) -> Result<Conversion> {
    if addr == 0 {
        return Ok(Conversion::Identity);
    }
    let bytes = read_block(store, addr)?;
    let block =
        ConversionBlock::from_bytes(&bytes).map_err(|e| corrupt(addr, format!("{e}")))?;
    let formula = match block.refs.first() {
        Some(&tx_addr) if tx_addr != 0 => read_text(store, tx_addr)?,
        _ => None,
    };
    block.to_model(formula)
}

fn decode_channel(
    store: &mut dyn BlockStore,
    addr: u64,
    block: &ChannelBlock,
) -> Result<Channel> {
    let name = read_text(store, block.tx_name)?
        .ok_or_else(|| corrupt(addr, "channel without a name"))?;
    let data_type = block
        .model_data_type()
        .ok_or_else(|| corrupt(addr, format!("data type code {}", block.data_type)))?;
    if block.data != 0 {
        return Err(corrupt(addr, "variable-length signal data"));
    }
    let shape = if block.composition != 0 {
        let bytes = read_block(store, block.composition)?;
        let ca = ChannelArrayBlock::from_bytes(&bytes)
            .map_err(|e| corrupt(block.composition, format!("{e}")))?;
        if block.bit_offset != 0 {
            return Err(corrupt(addr, "bit-packed array channel"));
        }
        ca.dim_sizes.iter().map(|&d| d as usize).collect()
    } else {
        Vec::new()
    };
    Ok(Channel {
        name,
        unit: read_text(store, block.md_unit)?,
        comment: read_text(store, block.md_comment)?,
        data_type,
        byte_offset: block.byte_offset,
        bit_offset: block.bit_offset,
        bit_count: block.bit_count,
        shape,
        conversion: read_conversion(store, block.cc_conversion)?,
        master: block.is_time_master(),
    })
}

fn decode_channels(store: &mut dyn BlockStore, first: u64) -> Result<Vec<Channel>> {
    let mut channels = Vec::new();
    let mut addr = first;
    let mut guard = 0u32;
    while addr != 0 {
        if guard > 100_000 {
            return Err(corrupt(addr, "channel list does not terminate"));
        }
        guard += 1;
        let bytes = read_block(store, addr)?;
        let block =
            ChannelBlock::from_bytes(&bytes).map_err(|e| corrupt(addr, format!("{e}")))?;
        match decode_channel(store, addr, &block) {
            Ok(channel) => channels.push(channel),
            // Channel-level faults invalidate that channel only.
            Err(e) => warn!("skipping channel at {addr:#x}: {e}"),
        }
        addr = block.cn_next;
    }
    Ok(channels)
}

/// Collect the data fragments reachable from a data link. Handles raw
/// `##DT`, compressed `##DZ`, `##DL` fragment lists and the `##HL`
/// wrapper in front of compressed lists.
fn collect_chunks(
    store: &mut dyn BlockStore,
    addr: u64,
    chunks: &mut Vec<StoredChunk>,
) -> Result<()> {
    if addr == 0 {
        return Ok(());
    }
    let header = read_header(store, addr)?;
    match header.id.as_str() {
        "##DT" | "##DV" => {
            let payload = header.block_len - BLOCK_HEADER_LEN as u64;
            chunks.push(StoredChunk {
                data_offset: addr + BLOCK_HEADER_LEN as u64,
                stored_len: payload,
                unpacked_len: payload,
                encoding: ChunkEncoding::Raw,
            });
        }
        "##DZ" => {
            let bytes = store.read_range(addr, DZ_HEADER_LEN)?;
            let dz = DataZippedBlock::from_bytes(&bytes)
                .map_err(|e| corrupt(addr, format!("{e}")))?;
            chunks.push(StoredChunk {
                data_offset: addr + DZ_HEADER_LEN as u64,
                stored_len: dz.compressed_len,
                unpacked_len: dz.original_len,
                encoding: dz.encoding(),
            });
        }
        "##DL" => {
            let bytes = read_block(store, addr)?;
            let dl = DataListBlock::from_bytes(&bytes)
                .map_err(|e| corrupt(addr, format!("{e}")))?;
            for link in dl.data_links {
                collect_chunks(store, link, chunks)?;
            }
            collect_chunks(store, dl.next, chunks)?;
        }
        "##HL" => {
            let bytes = read_block(store, addr)?;
            let first_dl = crate::blocks::common::read_u64(&bytes, 24)?;
            collect_chunks(store, first_dl, chunks)?;
        }
        other => {
            return Err(corrupt(addr, format!("unexpected data block id {other:?}")));
        }
    }
    Ok(())
}

/// Read the handshake only: identification block plus file header.
pub(crate) fn probe_file(store: &mut dyn BlockStore) -> Result<FileInfo> {
    let (info, _) = read_info(store)?;
    Ok(info)
}

fn read_info(store: &mut dyn BlockStore) -> Result<(FileInfo, HeaderBlock)> {
    let id_bytes = store.read_range(0, ID_BLOCK_LEN)?;
    let id = IdBlock::from_bytes(&id_bytes)?;

    let hd_addr = ID_BLOCK_LEN as u64;
    let hd_bytes = read_block(store, hd_addr)?;
    let hd = HeaderBlock::from_bytes(&hd_bytes)
        .map_err(|e| corrupt(hd_addr, format!("{e}")))?;
    let info = FileInfo {
        start_time_ns: hd.abs_time_ns,
        program: id.program,
        comment: read_text(store, hd.md_comment)?,
    };
    Ok((info, hd))
}

pub(crate) fn decode_file(store: &mut dyn BlockStore) -> Result<DecodedFile> {
    let (info, hd) = read_info(store)?;

    let mut groups = Vec::new();
    let mut dg_addr = hd.dg_first;
    while dg_addr != 0 {
        let dg_bytes = read_block(store, dg_addr)?;
        let dg = DataGroupBlock::from_bytes(&dg_bytes)
            .map_err(|e| corrupt(dg_addr, format!("{e}")))?;

        let mut cg_addr = dg.cg_first;
        let mut cg_count = 0;
        while cg_addr != 0 {
            let cg_bytes = read_block(store, cg_addr)?;
            let cg = ChannelGroupBlock::from_bytes(&cg_bytes)
                .map_err(|e| corrupt(cg_addr, format!("{e}")))?;
            cg_count += 1;
            if cg_count > 1 {
                // Several groups over one record stream means an
                // interleaved (unsorted) file; resorting is out of
                // scope.
                return Err(corrupt(dg_addr, "interleaved multi-group record stream"));
            }
            let mut channels = decode_channels(store, cg.cn_first)?;
            crate::blocks::retain_fitting_channels(
                &mut channels,
                cg.samples_byte_nr as usize + cg.invalidation_bytes_nr as usize,
            );
            let mut chunks = Vec::new();
            collect_chunks(store, dg.data, &mut chunks)?;
            groups.push(ChannelGroup {
                comment: read_text(store, cg.md_comment)?,
                record_id_len: dg.record_id_size,
                record_len: cg.samples_byte_nr,
                invalidation_len: cg.invalidation_bytes_nr,
                cycles: cg.cycles_nr,
                channels,
                data: GroupData::Stored(chunks),
            });
            cg_addr = cg.cg_next;
        }
        dg_addr = dg.dg_next;
    }

    Ok(DecodedFile { info, groups })
}
