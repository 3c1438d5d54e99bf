//! Append several structurally identical files into one.
//!
//! Every input is first re-expressed in the target version, then the
//! record streams are concatenated group by group. When all inputs
//! declare absolute start times and they differ, later inputs' master
//! samples are rebased onto the first input's origin.

use crate::{
    Error, Result,
    conversion::Conversion,
    mdf::Mdf,
    model::{Channel, ChannelGroup, DataType, GroupData},
    record,
    version::MdfVersion,
};

pub(crate) fn merge(inputs: &[Mdf], target: MdfVersion) -> Result<Mdf> {
    if inputs.is_empty() {
        return Err(incompatible("no files to merge"));
    }

    let mut converted = Vec::with_capacity(inputs.len());
    for mdf in inputs {
        converted.push(mdf.convert(target)?.into_owned_parts());
    }

    let (base_info, mut base_groups) = converted.remove(0);
    for (_, groups) in &converted {
        check_structure(&base_groups, groups)?;
    }

    // Rebase onto the first file's origin only when every input carries
    // an absolute start time and they are not all equal.
    let mut origins = vec![base_info.start_time_ns];
    origins.extend(converted.iter().map(|(info, _)| info.start_time_ns));
    let rebase = origins.iter().all(|&o| o != 0) && origins.iter().any(|&o| o != origins[0]);

    for (index, (info, groups)) in converted.into_iter().enumerate() {
        let mut groups = groups;
        if rebase {
            let delta_ns = info.start_time_ns as i128 - base_info.start_time_ns as i128;
            let delta = delta_ns as f64 * 1e-9;
            if delta != 0.0 {
                for group in &mut groups {
                    rebase_master(group, delta, index + 1)?;
                }
            }
        }
        for (base, other) in base_groups.iter_mut().zip(groups) {
            let GroupData::Owned(chunks) = other.data else {
                return Err(incompatible("merge input still references its store"));
            };
            match &mut base.data {
                GroupData::Owned(existing) => existing.extend(chunks),
                GroupData::Stored(_) => {
                    return Err(incompatible("merge input still references its store"));
                }
            }
            base.cycles += other.cycles;
        }
    }

    Ok(Mdf::from_parts(
        target,
        inputs[0].memory_mode(),
        base_info,
        base_groups,
    ))
}

fn check_structure(base: &[ChannelGroup], other: &[ChannelGroup]) -> Result<()> {
    if base.len() != other.len() {
        return Err(incompatible(&format!(
            "group counts differ ({} vs {})",
            base.len(),
            other.len()
        )));
    }
    for (gi, (a, b)) in base.iter().zip(other).enumerate() {
        if a.record_len != b.record_len || a.invalidation_len != b.invalidation_len {
            return Err(incompatible(&format!("record layouts differ in group {gi}")));
        }
        if a.channels.len() != b.channels.len() {
            return Err(incompatible(&format!("channel counts differ in group {gi}")));
        }
        for (ca, cb) in a.channels.iter().zip(&b.channels) {
            if !same_channel(ca, cb) {
                return Err(incompatible(&format!(
                    "channel {:?} does not match {:?} in group {gi}",
                    ca.name, cb.name
                )));
            }
        }
    }
    Ok(())
}

fn same_channel(a: &Channel, b: &Channel) -> bool {
    a.name == b.name
        && a.data_type == b.data_type
        && a.byte_offset == b.byte_offset
        && a.bit_offset == b.bit_offset
        && a.bit_count == b.bit_count
        && a.shape == b.shape
}

/// Shift a group's master samples by `delta` seconds, in place.
fn rebase_master(group: &mut ChannelGroup, delta: f64, file_index: usize) -> Result<()> {
    let Some(mi) = group.master_index() else {
        return Err(incompatible(&format!(
            "file {file_index} needs a time rebase but a group has no master channel"
        )));
    };
    let master = group.channels[mi].clone();
    // The shift happens on raw samples, so only plain float masters
    // with at most a linear conversion can absorb it.
    let raw_delta = match &master.conversion {
        Conversion::Identity => delta,
        Conversion::Linear { scale, .. } if *scale != 0.0 => delta / scale,
        _ => {
            return Err(incompatible(&format!(
                "master channel {:?} has a non-linear conversion and cannot be rebased",
                master.name
            )));
        }
    };
    let float32 = match (master.data_type, master.bit_count) {
        (DataType::FloatLE | DataType::FloatBE, 32) => true,
        (DataType::FloatLE | DataType::FloatBE, 64) => false,
        _ => {
            return Err(incompatible(&format!(
                "master channel {:?} is not a float and cannot absorb a {delta} s offset",
                master.name
            )));
        }
    };
    if master.bit_offset != 0 {
        return Err(incompatible(&format!(
            "master channel {:?} is bit-packed",
            master.name
        )));
    }

    let be = master.data_type.is_big_endian();
    let offset = master.byte_offset as usize;
    let stride = group.stride();
    let GroupData::Owned(chunks) = &mut group.data else {
        return Err(incompatible("merge input still references its store"));
    };
    for chunk in chunks {
        for rec in chunk.chunks_exact_mut(stride) {
            if float32 {
                let bits = record::extract_unsigned(rec, offset, 0, 32, be) as u32;
                let shifted = f32::from_bits(bits) + raw_delta as f32;
                record::insert_unsigned(rec, offset, 32, shifted.to_bits() as u64, be);
            } else {
                let bits = record::extract_unsigned(rec, offset, 0, 64, be);
                let shifted = f64::from_bits(bits) + raw_delta;
                record::insert_unsigned(rec, offset, 64, shifted.to_bits(), be);
            }
        }
    }
    Ok(())
}

fn incompatible(reason: &str) -> Error {
    Error::IncompatibleMerge {
        reason: reason.to_string(),
    }
}
