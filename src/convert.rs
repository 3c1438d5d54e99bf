//! Re-express a file in another container version.
//!
//! The operation moves raw record bytes; conversions are carried as
//! descriptors and never applied. Anything the target layout cannot
//! hold exactly fails with [`Error::LossyConversion`] instead of being
//! narrowed silently.

use crate::{
    Error, Result,
    conversion::Conversion,
    mdf::Mdf,
    model::{ChannelGroup, GroupData},
    version::MdfVersion,
};

pub(crate) fn convert(mdf: &Mdf, target: MdfVersion) -> Result<Mdf> {
    let layout = mdf.layout()?;
    let mut groups = Vec::with_capacity(layout.groups().len());
    for group in layout.groups() {
        if !target.is_v4() {
            check_v3_expressible(group)?;
        }
        let data = mdf.normalized_chunks(group)?;
        let mut out = group.clone();
        out.record_id_len = 0;
        if !target.is_v4() && out.invalidation_len > 0 {
            // The 3.x layout has no invalidation area; the bytes stay in
            // the record as plain trailing payload.
            out.record_len += out.invalidation_len;
            out.invalidation_len = 0;
        }
        out.data = GroupData::Owned(data);
        groups.push(out);
    }
    Ok(Mdf::from_parts(
        target,
        mdf.memory_mode(),
        mdf.info().clone(),
        groups,
    ))
}

fn check_v3_expressible(group: &ChannelGroup) -> Result<()> {
    let record_bytes = group.record_len as u64 + group.invalidation_len as u64;
    if record_bytes > u16::MAX as u64 {
        return Err(lossy(format!(
            "record of {record_bytes} bytes exceeds the 3.x record size field"
        )));
    }
    if group.cycles > u32::MAX as u64 {
        return Err(lossy(format!(
            "{} cycles exceed the 3.x cycle counter",
            group.cycles
        )));
    }
    for channel in &group.channels {
        if !channel.shape.is_empty() {
            return Err(lossy(format!(
                "array channel {:?} has no 3.x representation",
                channel.name
            )));
        }
        if channel.bit_count > u16::MAX as u32 {
            return Err(lossy(format!(
                "channel {:?} is {} bits wide, beyond the 3.x bit counter",
                channel.name, channel.bit_count
            )));
        }
        if let Conversion::Lookup { .. } = channel.conversion {
            return Err(lossy(format!(
                "channel {:?} uses an exact-match lookup, which the 3.x layout cannot express",
                channel.name
            )));
        }
    }
    Ok(())
}

fn lossy(reason: String) -> Error {
    Error::LossyConversion { reason }
}
