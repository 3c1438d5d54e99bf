//! Container block layouts. `common` holds the byte helpers and the
//! identification block shared by both versions; `v3` and `v4` hold the
//! per-version block structs and their decode passes.

pub(crate) mod common;
pub(crate) mod v3;
pub(crate) mod v4;

use log::warn;

use crate::model::Channel;

/// Drop channels whose declared field reaches past the group's record.
/// A descriptor fault invalidates that channel only, never the file, and
/// keeps later queries from indexing outside the record bytes.
pub(crate) fn retain_fitting_channels(channels: &mut Vec<Channel>, record_bytes: usize) {
    channels.retain(|c| {
        let fits = (c.byte_offset as usize)
            .checked_add(c.byte_span())
            .is_some_and(|end| end <= record_bytes);
        if !fits {
            warn!(
                "skipping channel {:?}: field extends past the {record_bytes}-byte record",
                c.name
            );
        }
        fits
    });
}
