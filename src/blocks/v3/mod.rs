//! 3.x block layouts: 2-char block ids with 16-bit sizes, 32-bit links,
//! inline fixed-width names, raw contiguous sample data.

pub(crate) mod blocks;
pub(crate) mod decode;
