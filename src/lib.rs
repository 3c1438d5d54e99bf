#![forbid(unsafe_code)]

//! # mdfio
//!
//! A Rust library for reading, transforming and writing ASAM MDF
//! (Measurement Data Format) files in the 3.30 and 4.10 container
//! layouts.
//!
//! MDF is a binary format standardized by ASAM for storing measurement
//! data, commonly used in automotive and industrial applications for
//! recording sensor data, CAN bus messages, and other time-series
//! measurements.
//!
//! ## Features
//!
//! - **Reading**: open 3.30 and 4.10 files under three memory
//!   strategies, from fully resident to probe-only
//! - **Queries**: decode channels by name or position with automatic
//!   value conversion (linear, rational, tabular, formula, lookup)
//! - **Structural operations**: re-express a file in the other version,
//!   cut a time window, keep a channel subset, append files
//! - **Writing**: serialize back to either layout, optionally with
//!   deflate or transposed-deflate record compression (4.10 only)
//!
//! ## Quick Start
//!
//! ### Reading a file
//!
//! ```no_run
//! use mdfio::{Mdf, MemoryMode, Result};
//!
//! fn main() -> Result<()> {
//!     let mdf = Mdf::open("recording.mf4", MemoryMode::Full)?;
//!     for name in mdf.channel_names()? {
//!         let signal = mdf.get(&name)?;
//!         println!("{name}: {} samples", signal.cycles());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Creating a file
//!
//! ```no_run
//! use mdfio::{Compression, Mdf, MdfVersion, Result, Samples, Signal};
//!
//! fn main() -> Result<()> {
//!     let speed = Signal {
//!         name: "speed".into(),
//!         samples: Samples::Float64(vec![0.0, 10.0, 20.0]),
//!         timestamps: vec![0.0, 0.1, 0.2],
//!         shape: Vec::new(),
//!         unit: Some("km/h".into()),
//!         comment: None,
//!     };
//!     let mut mdf = Mdf::new(MdfVersion::V4_10);
//!     mdf.append(&[speed], None)?;
//!     mdf.save("output.mf4", Compression::TransposedDeflate, false)?;
//!     Ok(())
//! }
//! ```

mod blocks;
mod conversion;
mod convert;
mod cut;
mod error;
mod filter;
mod mdf;
mod merge;
mod model;
mod record;
mod signal;
mod store;
mod version;
mod writer;

pub use conversion::Conversion;
pub use cut::TimeRef;
pub use error::{Error, Result};
pub use mdf::Mdf;
pub use model::DataType;
pub use signal::{Samples, Signal};
pub use store::MemoryMode;
pub use version::MdfVersion;
pub use writer::Compression;
