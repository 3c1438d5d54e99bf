//! Keep a half-open time window `[start, stop)` of every group.

use crate::{
    Result,
    mdf::Mdf,
    model::GroupData,
    record::{self, ChunkBuilder},
};

/// How cut bounds relate to the file's time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeRef {
    /// Bounds are master-channel timestamps as stored.
    #[default]
    Absolute,
    /// Bounds are offsets from the earliest first timestamp across all
    /// groups.
    Relative,
}

pub(crate) fn cut(
    mdf: &Mdf,
    start: Option<f64>,
    stop: Option<f64>,
    time_ref: TimeRef,
) -> Result<Mdf> {
    let layout = mdf.layout()?;
    let groups = layout.groups();

    // Resolve relative bounds against the earliest master start.
    let origin = match time_ref {
        TimeRef::Absolute => 0.0,
        TimeRef::Relative => {
            let mut earliest = f64::INFINITY;
            for group in groups {
                if group.cycles == 0 {
                    continue;
                }
                let ts = mdf.master_timestamps(group)?;
                if let Some(&first) = ts.first() {
                    earliest = earliest.min(first);
                }
            }
            if earliest.is_finite() { earliest } else { 0.0 }
        }
    };
    let start = start.map(|s| s + origin);
    let stop = stop.map(|s| s + origin);

    let mut out_groups = Vec::with_capacity(groups.len());
    for group in groups {
        let ts = mdf.master_timestamps(group)?;
        // Timestamps are monotonic, so the window is one index range.
        let i0 = match start {
            Some(start) => ts.partition_point(|&t| t < start),
            None => 0,
        };
        let i1 = match stop {
            Some(stop) => ts.partition_point(|&t| t < stop),
            None => ts.len(),
        };
        let (i0, i1) = (i0.min(ts.len()), i1.min(ts.len()));

        let stride = group.stride() as u64;
        let id_len = group.record_id_len as usize;
        let out_stride = group.stride() - id_len;
        let mut builder = ChunkBuilder::new(out_stride);
        if i0 < i1 {
            let pieces =
                mdf.read_stream_range(group, i0 as u64 * stride, i1 as u64 * stride)?;
            record::for_each_record(pieces.into_iter().map(Ok), stride as usize, |rec| {
                builder.push_record(&rec[id_len..]);
                Ok(())
            })?;
        }

        let mut out = group.clone();
        out.record_id_len = 0;
        out.cycles = i1.saturating_sub(i0) as u64;
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
