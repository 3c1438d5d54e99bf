//! 3.30 encoder: 32-bit links, headerless record streams, no block
//! alignment. Every block address must fit the 32-bit link width.

use log::debug;

use crate::{
    Error, Result,
    blocks::common::IdBlock,
    blocks::v3::blocks::{
        CHANNEL_TYPE_MASTER3, Cc3Block, Cg3Block, Cn3Block, Dg3Block, Hd3Block, Tx3Block,
    },
    mdf::Mdf,
    model::{Channel, ChannelGroup},
    writer::{BlockSink, Compression, link32},
};

pub(crate) fn encode_file(mdf: &Mdf, sink: &mut BlockSink, compression: Compression) -> Result<()> {
    if compression != Compression::Uncompressed {
        debug!("the 3.x layout stores records raw; {compression:?} is ignored");
    }
    let layout = mdf.layout()?;
    let groups = layout.groups();
    let dg_count = u16::try_from(groups.len()).map_err(|_| {
        Error::Serialization(format!(
            "{} data groups exceed the 3.x group counter",
            groups.len()
        ))
    })?;

    let id = IdBlock {
        version: mdf.version(),
        program: if mdf.info().program.is_empty() {
            env!("CARGO_PKG_NAME").to_string()
        } else {
            mdf.info().program.clone()
        },
    };
    sink.write_raw(&id.to_bytes())?;

    let hd = Hd3Block {
        dg_first: 0,
        comment: 0,
        abs_time_ns: mdf.start_time_ns(),
    };
    let hd_addr = sink.write_raw(&hd.to_bytes(dg_count))?;
    if let Some(comment) = mdf.comment() {
        let tx = sink.write_raw(&Tx3Block::to_bytes(comment)?)?;
        sink.patch_link32(hd_addr + Hd3Block::COMMENT_OFFSET, tx)?;
    }

    let mut prev_dg = None;
    for group in groups {
        let dg_addr = write_group(sink, mdf, group)?;
        match prev_dg {
            Some(prev) => sink.patch_link32(prev + Dg3Block::DG_NEXT_OFFSET, dg_addr)?,
            None => sink.patch_link32(hd_addr + Hd3Block::DG_FIRST_OFFSET, dg_addr)?,
        }
        prev_dg = Some(dg_addr);
    }
    Ok(())
}

fn write_group(sink: &mut BlockSink, mdf: &Mdf, group: &ChannelGroup) -> Result<u64> {
    // Trailing invalidation bytes have no dedicated area in 3.x; they
    // are carried as plain record payload.
    let record_bytes = group.record_len as u64 + group.invalidation_len as u64;
    let record_size = u16::try_from(record_bytes).map_err(|_| lossy_record(record_bytes))?;
    let cycles = u32::try_from(group.cycles).map_err(|_| Error::LossyConversion {
        reason: format!("{} cycles exceed the 3.x cycle counter", group.cycles),
    })?;
    let cn_nr = u16::try_from(group.channels.len()).map_err(|_| {
        Error::Serialization(format!(
            "{} channels exceed the 3.x channel counter",
            group.channels.len()
        ))
    })?;

    let mut first_cn = 0u64;
    let mut prev_cn = None;
    for channel in &group.channels {
        let cn_addr = write_channel(sink, channel)?;
        match prev_cn {
            Some(prev) => sink.patch_link32(prev + Cn3Block::CN_NEXT_OFFSET, cn_addr)?,
            None => first_cn = cn_addr,
        }
        prev_cn = Some(cn_addr);
    }

    let comment = match &group.comment {
        Some(c) => sink.write_raw(&Tx3Block::to_bytes(c)?)?,
        None => 0,
    };
    let cg = Cg3Block {
        cg_next: 0,
        cn_first: link32(first_cn)?,
        comment: link32(comment)?,
        cn_nr,
        record_size,
        cycles,
    };
    let cg_addr = sink.write_raw(&cg.to_bytes())?;

    let dg = Dg3Block {
        dg_next: 0,
        cg_first: link32(cg_addr)?,
        data: 0,
        cg_nr: 1,
        record_id_len: 0,
    };
    let dg_addr = sink.write_raw(&dg.to_bytes())?;

    // The record stream follows headerless; the DG points straight at
    // the first record byte.
    let chunks = mdf.normalized_chunks(group)?;
    let mut data_addr = 0u64;
    for chunk in &chunks {
        if chunk.is_empty() {
            continue;
        }
        let at = sink.write_raw(chunk)?;
        if data_addr == 0 {
            data_addr = at;
        }
    }
    if data_addr != 0 {
        sink.patch_link32(dg_addr + Dg3Block::DATA_OFFSET, data_addr)?;
    }
    Ok(dg_addr)
}

fn write_channel(sink: &mut BlockSink, channel: &Channel) -> Result<u64> {
    let bit_count = u16::try_from(channel.bit_count).map_err(|_| Error::LossyConversion {
        reason: format!(
            "channel {:?} is {} bits wide, beyond the 3.x bit counter",
            channel.name, channel.bit_count
        ),
    })?;
    let byte_offset = u16::try_from(channel.byte_offset).map_err(|_| Error::LossyConversion {
        reason: format!(
            "channel {:?} sits at byte {}, beyond the 3.x offset field",
            channel.name, channel.byte_offset
        ),
    })?;

    // The conversion block carries the unit text, so one is written
    // whenever either is present.
    let cc_addr = if channel.unit.is_some() || !channel.conversion.is_identity() {
        let cc = Cc3Block::from_model(&channel.conversion, channel.unit.as_deref())?;
        sink.write_raw(&cc.to_bytes()?)?
    } else {
        0
    };
    // Names beyond the 31-char inline field spill into a TX block.
    let long_name = if channel.name.len() > 31 {
        sink.write_raw(&Tx3Block::to_bytes(&channel.name)?)?
    } else {
        0
    };

    let cn = Cn3Block {
        cn_next: 0,
        conversion: link32(cc_addr)?,
        channel_type: if channel.master {
            CHANNEL_TYPE_MASTER3
        } else {
            0
        },
        short_name: channel.name.clone(),
        description: channel.comment.clone().unwrap_or_default(),
        start_offset: channel.bit_offset as u16,
        bit_count,
        data_type: Cn3Block::data_type_code(channel.data_type, channel.bit_count),
        long_name: link32(long_name)?,
        additional_byte_offset: byte_offset,
    };
    sink.write_raw(&cn.to_bytes())
}

fn lossy_record(record_bytes: u64) -> Error {
    Error::LossyConversion {
        reason: format!("record of {record_bytes} bytes exceeds the 3.x record size field"),
    }
}
