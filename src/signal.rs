/// Decoded sample values for one channel, one vector per native width.
///
/// Integer channels keep their full 64-bit range; narrower fields are
/// widened without changing the value. Only conversions move samples into
/// `Float64`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Samples {
    UnsignedInteger(Vec<u64>),
    SignedInteger(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Text(Vec<String>),
    ByteArrays(Vec<Vec<u8>>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::UnsignedInteger(v) => v.len(),
            Samples::SignedInteger(v) => v.len(),
            Samples::Float32(v) => v.len(),
            Samples::Float64(v) => v.len(),
            Samples::Text(v) => v.len(),
            Samples::ByteArrays(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of sample `i`, or `None` for text and byte channels.
    pub fn value_f64(&self, i: usize) -> Option<f64> {
        match self {
            Samples::UnsignedInteger(v) => v.get(i).map(|&x| x as f64),
            Samples::SignedInteger(v) => v.get(i).map(|&x| x as f64),
            Samples::Float32(v) => v.get(i).map(|&x| x as f64),
            Samples::Float64(v) => v.get(i).copied(),
            Samples::Text(_) | Samples::ByteArrays(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Samples::Text(_) | Samples::ByteArrays(_))
    }
}

/// One channel as returned by the query layer: converted samples paired
/// with the timestamps of the owning group's master channel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Signal {
    pub name: String,
    pub samples: Samples,
    pub timestamps: Vec<f64>,
    /// Per-dimension extents for array channels, empty for scalars. Array
    /// samples are flattened row-major, so `samples.len()` equals
    /// `timestamps.len() * shape.iter().product()`.
    pub shape: Vec<usize>,
    pub unit: Option<String>,
    pub comment: Option<String>,
}

impl Signal {
    /// Number of records behind this signal.
    pub fn cycles(&self) -> usize {
        self.timestamps.len()
    }
}
