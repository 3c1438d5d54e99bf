use core::fmt;

use crate::{
    Error, Result,
    blocks::{v3, v4},
    mdf::Mdf,
    model::{DecodedFile, FileInfo},
    store::BlockStore,
    writer::{BlockSink, Compression},
};

/// Container versions this crate can read and write.
///
/// The enum is closed on purpose: every version-specific code path is
/// reached through [`MdfVersion::codec`], so supporting another version
/// means adding a variant and a codec entry, not touching callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MdfVersion {
    V3_30,
    V4_10,
}

impl MdfVersion {
    /// Map the numeric version field of the identification block.
    pub fn from_version_number(version: u16) -> Result<Self> {
        match version {
            330 => Ok(MdfVersion::V3_30),
            410 => Ok(MdfVersion::V4_10),
            other => Err(Error::UnsupportedVersion { version: other }),
        }
    }

    pub fn version_number(self) -> u16 {
        match self {
            MdfVersion::V3_30 => 330,
            MdfVersion::V4_10 => 410,
        }
    }

    /// The 8-byte version string stored in the identification block,
    /// space padded.
    pub(crate) fn id_string(self) -> &'static str {
        match self {
            MdfVersion::V3_30 => "3.30    ",
            MdfVersion::V4_10 => "4.10    ",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MdfVersion::V3_30 => "3.30",
            MdfVersion::V4_10 => "4.10",
        }
    }

    pub fn is_v4(self) -> bool {
        matches!(self, MdfVersion::V4_10)
    }

    pub(crate) fn codec(self) -> &'static Codec {
        match self {
            MdfVersion::V3_30 => &V3_CODEC,
            MdfVersion::V4_10 => &V4_CODEC,
        }
    }
}

impl fmt::Display for MdfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-version entry points. Everything else in the crate is
/// version-neutral and goes through this table.
pub(crate) struct Codec {
    /// Walk the block graph into the logical model.
    pub decode: fn(&mut dyn BlockStore) -> Result<DecodedFile>,
    /// Read only the handshake: identification and file header.
    pub probe: fn(&mut dyn BlockStore) -> Result<FileInfo>,
    /// Serialize a logical file into the container layout.
    pub encode: fn(&Mdf, &mut BlockSink, Compression) -> Result<()>,
}

static V3_CODEC: Codec = Codec {
    decode: v3::decode::decode_file,
    probe: v3::decode::probe_file,
    encode: crate::writer::v3::encode_file,
};

static V4_CODEC: Codec = Codec {
    decode: v4::decode::decode_file,
    probe: v4::decode::probe_file,
    encode: crate::writer::v4::encode_file,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_numbers_round_trip() -> Result<()> {
        for v in [MdfVersion::V3_30, MdfVersion::V4_10] {
            assert_eq!(MdfVersion::from_version_number(v.version_number())?, v);
        }
        Ok(())
    }

    #[test]
    fn unknown_version_is_rejected() {
        assert!(matches!(
            MdfVersion::from_version_number(211),
            Err(Error::UnsupportedVersion { version: 211 })
        ));
    }
}
