//! Keep only the named channels, plus each touched group's master, and
//! repack the records to the retained byte spans.

use crate::{
    Result,
    mdf::{Mdf, find_channel},
    model::GroupData,
    record::{self, ChunkBuilder},
};

pub(crate) fn filter<S: AsRef<str>>(mdf: &Mdf, names: &[S]) -> Result<Mdf> {
    let layout = mdf.layout()?;
    let groups = layout.groups();

    // Every requested name must resolve somewhere, otherwise the whole
    // call fails.
    for name in names {
        find_channel(groups, name.as_ref())?;
    }

    let mut out_groups = Vec::new();
    for group in groups {
        let requested: Vec<bool> = group
            .channels
            .iter()
            .map(|c| names.iter().any(|n| n.as_ref() == c.name))
            .collect();
        if !requested.iter().any(|&r| r) {
            continue;
        }

        // Kept channels in original order; the master rides along.
        let kept: Vec<usize> = group
            .channels
            .iter()
            .enumerate()
            .filter(|(i, c)| requested[*i] || c.master)
            .map(|(i, _)| i)
            .collect();

        // Byte spans of the kept fields, and their new offsets.
        let mut channels = Vec::with_capacity(kept.len());
        let mut spans = Vec::with_capacity(kept.len());
        let mut offset = 0u32;
        for &i in &kept {
            let ch = &group.channels[i];
            let span = ch.byte_span();
            spans.push((ch.byte_offset as usize, span));
            let mut out = ch.clone();
            out.byte_offset = offset;
            channels.push(out);
            offset += span as u32;
        }

        let id_len = group.record_id_len as usize;
        let mut builder = ChunkBuilder::new(offset as usize);
        record::for_each_record(mdf.chunk_iter(group), group.stride(), |rec| {
            let mut packed = Vec::with_capacity(offset as usize);
            for &(start, len) in &spans {
                packed.extend_from_slice(&rec[id_len + start..id_len + start + len]);
            }
            builder.push_record(&packed);
            Ok(())
        })?;

        let mut out = group.clone();
        out.record_id_len = 0;
        out.record_len = offset;
        out.invalidation_len = 0;
        out.channels = channels;
        out.data = GroupData::Owned(builder.finish());
        out_groups.push(out);
    }

    Ok(Mdf::from_parts(
        mdf.version(),
        mdf.memory_mode(),
        mdf.info().clone(),
        out_groups,
    ))
}
