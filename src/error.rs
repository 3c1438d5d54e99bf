use core::fmt;

/// Errors reported by this crate.
#[derive(Debug)]
pub enum Error {
    /// The identification block names a container version outside the
    /// supported set.
    UnsupportedVersion { version: u16 },
    /// A block failed structural validation. Only the channels that depend
    /// on the block are affected.
    CorruptBlock { offset: u64, reason: String },
    /// A buffer was shorter than the layout requires. Carries the source
    /// location that detected the underrun.
    TooShortBuffer {
        actual: usize,
        expected: usize,
        file: &'static str,
        line: u32,
    },
    /// Block id bytes did not match the expected id.
    BlockId {
        actual: String,
        expected: &'static str,
    },
    /// A conversion could not be resolved or applied.
    InvalidConversion { reason: String },
    /// The requested re-expression would silently lose information.
    LossyConversion { reason: String },
    /// The files handed to merge do not agree structurally.
    IncompatibleMerge { reason: String },
    /// No channel with the given name exists in the file.
    UnknownChannel { name: String },
    /// The save destination already exists and overwrite was not requested.
    DestinationExists { path: String },
    /// A block could not be serialized.
    Serialization(String),
    IO(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedVersion { version } => {
                write!(f, "unsupported container version number {version}")
            }
            Error::CorruptBlock { offset, reason } => {
                write!(f, "corrupt block at offset {offset:#x}: {reason}")
            }
            Error::TooShortBuffer {
                actual,
                expected,
                file,
                line,
            } => write!(
                f,
                "buffer too short at {file}:{line}: got {actual} bytes, need {expected}"
            ),
            Error::BlockId { actual, expected } => {
                write!(f, "unexpected block id {actual:?}, expected {expected:?}")
            }
            Error::InvalidConversion { reason } => {
                write!(f, "invalid conversion: {reason}")
            }
            Error::LossyConversion { reason } => {
                write!(f, "conversion would lose information: {reason}")
            }
            Error::IncompatibleMerge { reason } => {
                write!(f, "files cannot be merged: {reason}")
            }
            Error::UnknownChannel { name } => {
                write!(f, "no channel named {name:?}")
            }
            Error::DestinationExists { path } => {
                write!(f, "destination {path:?} already exists")
            }
            Error::Serialization(msg) => write!(f, "block serialization failed: {msg}"),
            Error::IO(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IO(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
