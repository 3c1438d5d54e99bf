//! Walk a 3.x block graph into the version-neutral model.

use log::warn;

use crate::{
    Error, Result,
    blocks::common::{ID_BLOCK_LEN, IdBlock, read_u16},
    blocks::v3::blocks::{Cc3Block, Cg3Block, Cn3Block, Dg3Block, Hd3Block, Tx3Block},
    conversion::Conversion,
    model::{Channel, ChannelGroup, ChunkEncoding, DecodedFile, FileInfo, GroupData, StoredChunk},
    store::BlockStore,
};

fn corrupt(offset: u64, reason: impl Into<String>) -> Error {
    Error::CorruptBlock {
        offset,
        reason: reason.into(),
    }
}

/// Read one 3.x block: a 4-byte id/size prelude, then the body.
fn read_block(store: &mut dyn BlockStore, addr: u64) -> Result<Vec<u8>> {
    let prelude = store.read_range(addr, 4)?;
    let block_len = read_u16(&prelude, 2)? as usize;
    if block_len < 4 || addr + block_len as u64 > store.len() {
        return Err(corrupt(addr, format!("block length {block_len} out of bounds")));
    }
    store.read_range(addr, block_len)
}

fn read_text(store: &mut dyn BlockStore, addr: u64) -> Result<Option<String>> {
    if addr == 0 {
        return Ok(None);
    }
    let bytes = read_block(store, addr)?;
    let tx = Tx3Block::from_bytes(&bytes).map_err(|e| corrupt(addr, format!("{e}")))?;
    if tx.text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(tx.text))
    }
}

fn decode_channel(store: &mut dyn BlockStore, addr: u64, block: &Cn3Block) -> Result<Channel> {
    let name = match read_text(store, block.long_name as u64)? {
        Some(long) => long,
        None if !block.short_name.is_empty() => block.short_name.clone(),
        None => return Err(corrupt(addr, "channel without a name")),
    };
    let data_type = block
        .model_data_type()
        .ok_or_else(|| corrupt(addr, format!("data type code {}", block.data_type)))?;

    let (unit, conversion) = if block.conversion != 0 {
        let bytes = read_block(store, block.conversion as u64)?;
        let cc = Cc3Block::from_bytes(&bytes)
            .map_err(|e| corrupt(block.conversion as u64, format!("{e}")))?;
        (cc.unit.clone(), cc.to_model()?)
    } else {
        (None, Conversion::Identity)
    };

    Ok(Channel {
        name,
        unit,
        comment: if block.description.is_empty() {
            None
        } else {
            Some(block.description.clone())
        },
        data_type,
        byte_offset: block.byte_offset(),
        bit_offset: block.bit_offset(),
        bit_count: block.bit_count as u32,
        shape: Vec::new(),
        conversion,
        master: block.is_time_master(),
    })
}

fn decode_channels(store: &mut dyn BlockStore, first: u32) -> Result<Vec<Channel>> {
    let mut channels = Vec::new();
    let mut addr = first as u64;
    let mut guard = 0u32;
    while addr != 0 {
        if guard > 100_000 {
            return Err(corrupt(addr, "channel list does not terminate"));
        }
        guard += 1;
        let bytes = read_block(store, addr)?;
        let block = Cn3Block::from_bytes(&bytes).map_err(|e| corrupt(addr, format!("{e}")))?;
        match decode_channel(store, addr, &block) {
            Ok(channel) => channels.push(channel),
            Err(e) => warn!("skipping channel at {addr:#x}: {e}"),
        }
        addr = block.cn_next as u64;
    }
    // Channels are stored newest-first in many 3.x writers; keep a
    // deterministic field order instead.
    channels.sort_by_key(|c| (c.byte_offset, c.bit_offset));
    Ok(channels)
}

/// Read the handshake only: identification block plus file header.
pub(crate) fn probe_file(store: &mut dyn BlockStore) -> Result<FileInfo> {
    let (info, _) = read_info(store)?;
    Ok(info)
}

fn read_info(store: &mut dyn BlockStore) -> Result<(FileInfo, Hd3Block)> {
    let id_bytes = store.read_range(0, ID_BLOCK_LEN)?;
    let id = IdBlock::from_bytes(&id_bytes)?;

    let hd_addr = ID_BLOCK_LEN as u64;
    let hd_bytes = read_block(store, hd_addr)?;
    let hd = Hd3Block::from_bytes(&hd_bytes).map_err(|e| corrupt(hd_addr, format!("{e}")))?;
    let info = FileInfo {
        start_time_ns: hd.abs_time_ns,
        program: id.program,
        comment: read_text(store, hd.comment as u64)?,
    };
    Ok((info, hd))
}

pub(crate) fn decode_file(store: &mut dyn BlockStore) -> Result<DecodedFile> {
    let (info, hd) = read_info(store)?;

    let mut groups = Vec::new();
    let mut dg_addr = hd.dg_first as u64;
    while dg_addr != 0 {
        let dg_bytes = read_block(store, dg_addr)?;
        let dg = Dg3Block::from_bytes(&dg_bytes).map_err(|e| corrupt(dg_addr, format!("{e}")))?;
        if dg.cg_nr > 1 {
            return Err(corrupt(dg_addr, "interleaved multi-group record stream"));
        }

        let mut cg_addr = dg.cg_first as u64;
        while cg_addr != 0 {
            let cg_bytes = read_block(store, cg_addr)?;
            let cg =
                Cg3Block::from_bytes(&cg_bytes).map_err(|e| corrupt(cg_addr, format!("{e}")))?;
            let mut channels = decode_channels(store, cg.cn_first)?;
            crate::blocks::retain_fitting_channels(&mut channels, cg.record_size as usize);

            // A record-id length of 2 means one id byte before and one
            // after each record; fold the trailing byte into the
            // invalidation area so the stride stays right.
            let (prefix, suffix) = match dg.record_id_len {
                0 => (0u8, 0u32),
                1 => (1, 0),
                2 => (1, 1),
                other => {
                    return Err(corrupt(dg_addr, format!("record id length {other}")));
                }
            };
            let stride = prefix as u64 + cg.record_size as u64 + suffix as u64;
            let data = if dg.data != 0 && cg.cycles > 0 {
                vec![StoredChunk {
                    data_offset: dg.data as u64,
                    stored_len: stride * cg.cycles as u64,
                    unpacked_len: stride * cg.cycles as u64,
                    encoding: ChunkEncoding::Raw,
                }]
            } else {
                Vec::new()
            };

            groups.push(ChannelGroup {
                comment: read_text(store, cg.comment as u64)?,
                record_id_len: prefix,
                record_len: cg.record_size as u32,
                invalidation_len: suffix,
                cycles: cg.cycles as u64,
                channels,
                data: GroupData::Stored(data),
            });
            cg_addr = cg.cg_next as u64;
        }
        dg_addr = dg.dg_next as u64;
    }

    Ok(DecodedFile { info, groups })
}
