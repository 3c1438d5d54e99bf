//! The `Mdf` facade: open a file under a memory strategy, query signals,
//! derive new files through the structural operations, save.

use std::cell::RefCell;
use std::fs::File;
use std::path::Path;

use log::debug;

use crate::{
    Error, Result,
    blocks::v4::data::decompress_chunk,
    conversion::Conversion,
    cut::TimeRef,
    model::{Channel, ChannelGroup, ChunkEncoding, DataType, FileInfo, GroupData},
    record::{self, ChunkBuilder},
    signal::{Samples, Signal},
    store::{BlockStore, BufferedFileStore, EagerStore, MemoryMode, MinimalFileStore},
    version::MdfVersion,
    writer::Compression,
};

/// One logical measurement file.
///
/// Opened files borrow a backing store according to their memory mode;
/// files produced by the structural operations own all their data.
pub struct Mdf {
    version: MdfVersion,
    mode: MemoryMode,
    info: FileInfo,
    groups: Option<Vec<ChannelGroup>>,
    store: Option<RefCell<Box<dyn BlockStore>>>,
}

/// Group layout for one query, either cached or freshly decoded.
pub(crate) enum Layout<'a> {
    Cached(&'a [ChannelGroup]),
    Fresh(Vec<ChannelGroup>),
}

impl Layout<'_> {
    pub fn groups(&self) -> &[ChannelGroup] {
        match self {
            Layout::Cached(g) => g,
            Layout::Fresh(g) => g,
        }
    }
}

impl Mdf {
    /// Start an empty file to be populated with [`Mdf::append`].
    pub fn new(version: MdfVersion) -> Mdf {
        Mdf {
            version,
            mode: MemoryMode::Full,
            info: FileInfo::default(),
            groups: Some(Vec::new()),
            store: None,
        }
    }

    /// Open a file under the given memory strategy.
    pub fn open(path: impl AsRef<Path>, mode: MemoryMode) -> Result<Mdf> {
        let path = path.as_ref();
        match mode {
            MemoryMode::Full => {
                let data = std::fs::read(path)?;
                let mut mdf = Self::from_store(Box::new(EagerStore::new(data)), mode)?;
                mdf.materialize()?;
                mdf.store = None;
                debug!("opened {path:?} fully resident, {} groups", mdf.group_count()?);
                Ok(mdf)
            }
            MemoryMode::Low => {
                let store = BufferedFileStore::new(File::open(path)?)?;
                let mdf = Self::from_store(Box::new(store), mode)?;
                debug!("opened {path:?} with cached layout, {} groups", mdf.group_count()?);
                Ok(mdf)
            }
            MemoryMode::Minimum => {
                let store = MinimalFileStore::new(File::open(path)?)?;
                Self::probe_store(Box::new(store), mode)
            }
        }
    }

    /// Interpret an in-memory byte buffer as a file. Behaves like
    /// [`MemoryMode::Full`].
    pub fn from_bytes(data: Vec<u8>) -> Result<Mdf> {
        let mut mdf = Self::from_store(Box::new(EagerStore::new(data)), MemoryMode::Full)?;
        mdf.materialize()?;
        mdf.store = None;
        Ok(mdf)
    }

    /// Decode the layout now and cache it.
    fn from_store(mut store: Box<dyn BlockStore>, mode: MemoryMode) -> Result<Mdf> {
        let version = Self::read_version(store.as_mut())?;
        let decoded = (version.codec().decode)(store.as_mut())?;
        Ok(Mdf {
            version,
            mode,
            info: decoded.info,
            groups: Some(decoded.groups),
            store: Some(RefCell::new(store)),
        })
    }

    /// Handshake only: version and file metadata, no layout walk.
    fn probe_store(mut store: Box<dyn BlockStore>, mode: MemoryMode) -> Result<Mdf> {
        let version = Self::read_version(store.as_mut())?;
        let info = (version.codec().probe)(store.as_mut())?;
        Ok(Mdf {
            version,
            mode,
            info,
            groups: None,
            store: Some(RefCell::new(store)),
        })
    }

    fn read_version(store: &mut dyn BlockStore) -> Result<MdfVersion> {
        let id_bytes = store.read_range(0, crate::blocks::common::ID_BLOCK_LEN)?;
        Ok(crate::blocks::common::IdBlock::from_bytes(&id_bytes)?.version)
    }

    /// Assemble a fully owned file; used by the structural operations.
    pub(crate) fn from_parts(
        version: MdfVersion,
        mode: MemoryMode,
        info: FileInfo,
        groups: Vec<ChannelGroup>,
    ) -> Mdf {
        Mdf {
            version,
            mode,
            info,
            groups: Some(groups),
            store: None,
        }
    }

    /// Take apart a fully owned file; merge consumes its inputs'
    /// converted copies this way.
    pub(crate) fn into_owned_parts(self) -> (FileInfo, Vec<ChannelGroup>) {
        (self.info, self.groups.unwrap_or_default())
    }

    pub fn version(&self) -> MdfVersion {
        self.version
    }

    pub fn memory_mode(&self) -> MemoryMode {
        self.mode
    }

    /// Absolute measurement start in nanoseconds since the Unix epoch,
    /// 0 when undeclared.
    pub fn start_time_ns(&self) -> u64 {
        self.info.start_time_ns
    }

    pub fn comment(&self) -> Option<&str> {
        self.info.comment.as_deref()
    }

    pub fn set_start_time_ns(&mut self, ns: u64) {
        self.info.start_time_ns = ns;
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.info.comment = Some(comment.into());
    }

    /// Append one channel group built from the given signals.
    ///
    /// A float64 master named `time` is synthesized from the first
    /// signal's timestamps; every signal must carry the same number of
    /// timestamps. Array signals hold `shape` flattened numeric elements
    /// per timestamp.
    pub fn append(&mut self, signals: &[Signal], comment: Option<&str>) -> Result<()> {
        if signals.is_empty() {
            return Err(Error::Serialization("appending an empty signal set".into()));
        }
        let cycles = signals[0].timestamps.len();
        for s in signals {
            let elements = s.shape.iter().product::<usize>().max(1);
            if s.timestamps.len() != cycles || s.samples.len() != cycles * elements {
                return Err(Error::Serialization(format!(
                    "signal {:?} does not share the group time base",
                    s.name
                )));
            }
            if elements > 1 && !s.samples.is_numeric() {
                return Err(Error::Serialization(format!(
                    "array signal {:?} must carry numeric samples",
                    s.name
                )));
            }
        }

        let mut channels = vec![Channel {
            name: "time".into(),
            unit: Some("s".into()),
            comment: None,
            data_type: DataType::FloatLE,
            byte_offset: 0,
            bit_offset: 0,
            bit_count: 64,
            shape: Vec::new(),
            conversion: Conversion::Identity,
            master: true,
        }];
        let mut offset = 8u32;
        let mut fields = Vec::with_capacity(signals.len());
        for s in signals {
            let (data_type, width) = appended_field(&s.samples, &s.name)?;
            let elements = s.shape.iter().product::<usize>().max(1);
            channels.push(Channel {
                name: s.name.clone(),
                unit: s.unit.clone(),
                comment: s.comment.clone(),
                data_type,
                byte_offset: offset,
                bit_offset: 0,
                bit_count: width as u32 * 8,
                shape: s.shape.clone(),
                conversion: Conversion::Identity,
                master: false,
            });
            fields.push((width, elements));
            offset += (width * elements) as u32;
        }

        let stride = offset as usize;
        let mut builder = ChunkBuilder::new(stride);
        let mut rec = vec![0u8; stride];
        for i in 0..cycles {
            rec.fill(0);
            rec[..8].copy_from_slice(&signals[0].timestamps[i].to_le_bytes());
            let mut at = 8usize;
            for (s, &(width, elements)) in signals.iter().zip(&fields) {
                for e in 0..elements {
                    write_sample(&mut rec[at..at + width], &s.samples, i * elements + e);
                    at += width;
                }
            }
            builder.push_record(&rec);
        }

        let group = ChannelGroup {
            comment: comment.map(str::to_string),
            record_id_len: 0,
            record_len: offset,
            invalidation_len: 0,
            cycles: cycles as u64,
            channels,
            data: GroupData::Owned(builder.finish()),
        };
        let Some(groups) = &mut self.groups else {
            return Err(Error::Serialization(
                "append needs a fully loaded file".into(),
            ));
        };
        groups.push(group);
        Ok(())
    }

    pub(crate) fn info(&self) -> &FileInfo {
        &self.info
    }

    pub(crate) fn layout(&self) -> Result<Layout<'_>> {
        if let Some(groups) = &self.groups {
            return Ok(Layout::Cached(groups));
        }
        let store = self.store.as_ref().ok_or_else(|| Error::CorruptBlock {
            offset: 0,
            reason: "file has neither cached layout nor backing store".into(),
        })?;
        let decoded = {
            let mut store = store.borrow_mut();
            (self.version.codec().decode)(store.as_mut())?
        };
        Ok(Layout::Fresh(decoded.groups))
    }

    pub fn group_count(&self) -> Result<usize> {
        Ok(self.layout()?.groups().len())
    }

    /// All channel names in group/channel order.
    pub fn channel_names(&self) -> Result<Vec<String>> {
        let layout = self.layout()?;
        Ok(layout
            .groups()
            .iter()
            .flat_map(|g| g.channels.iter().map(|c| c.name.clone()))
            .collect())
    }

    /// Decode one channel by name. When several groups carry the name,
    /// the first occurrence in group/channel order wins.
    pub fn get(&self, name: &str) -> Result<Signal> {
        let layout = self.layout()?;
        let (gi, ci) = find_channel(layout.groups(), name)?;
        self.build_signal(layout.groups(), gi, ci)
    }

    /// Decode one channel by position.
    pub fn get_in_group(&self, group: usize, index: usize) -> Result<Signal> {
        let layout = self.layout()?;
        let groups = layout.groups();
        let g = groups.get(group).ok_or_else(|| Error::UnknownChannel {
            name: format!("group {group}"),
        })?;
        if index >= g.channels.len() {
            return Err(Error::UnknownChannel {
                name: format!("group {group} channel {index}"),
            });
        }
        self.build_signal(groups, group, index)
    }

    /// Decode several channels, in exactly the requested order. Any
    /// unknown name fails the whole call.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Signal>> {
        let layout = self.layout()?;
        let groups = layout.groups();
        let mut positions = Vec::with_capacity(names.len());
        for name in names {
            positions.push(find_channel(groups, name.as_ref())?);
        }
        positions
            .into_iter()
            .map(|(gi, ci)| self.build_signal(groups, gi, ci))
            .collect()
    }

    pub fn channel_unit(&self, name: &str) -> Result<Option<String>> {
        let layout = self.layout()?;
        let (gi, ci) = find_channel(layout.groups(), name)?;
        Ok(layout.groups()[gi].channels[ci].unit.clone())
    }

    pub fn channel_comment(&self, name: &str) -> Result<Option<String>> {
        let layout = self.layout()?;
        let (gi, ci) = find_channel(layout.groups(), name)?;
        Ok(layout.groups()[gi].channels[ci].comment.clone())
    }

    /// Attach a conversion to a channel of an owned (appended or
    /// derived) file. The stored raw samples stay untouched; queries
    /// apply the conversion on the way out.
    pub fn set_channel_conversion(&mut self, name: &str, conversion: Conversion) -> Result<()> {
        let Some(groups) = &mut self.groups else {
            return Err(Error::Serialization(
                "conversions can only be set on a fully loaded file".into(),
            ));
        };
        let (gi, ci) = find_channel(groups, name)?;
        groups[gi].channels[ci].conversion = conversion;
        Ok(())
    }

    /// Re-express the file in another container version. Samples and
    /// timestamps are preserved exactly; forms the target cannot hold
    /// fail with [`Error::LossyConversion`].
    pub fn convert(&self, target: MdfVersion) -> Result<Mdf> {
        crate::convert::convert(self, target)
    }

    /// Keep the half-open time window `[start, stop)` of every group.
    pub fn cut(&self, start: Option<f64>, stop: Option<f64>, time_ref: TimeRef) -> Result<Mdf> {
        crate::cut::cut(self, start, stop, time_ref)
    }

    /// Keep only the named channels plus each touched group's master.
    pub fn filter<S: AsRef<str>>(&self, names: &[S]) -> Result<Mdf> {
        crate::filter::filter(self, names)
    }

    /// Append several structurally identical files into one.
    pub fn merge(inputs: &[Mdf], target: MdfVersion) -> Result<Mdf> {
        crate::merge::merge(inputs, target)
    }

    /// Serialize to `path` in this file's container version.
    pub fn save(&self, path: impl AsRef<Path>, compression: Compression, overwrite: bool) -> Result<()> {
        crate::writer::save_file(self, path.as_ref(), compression, overwrite)
    }

    fn build_signal(&self, groups: &[ChannelGroup], gi: usize, ci: usize) -> Result<Signal> {
        let group = &groups[gi];
        let channel = &group.channels[ci];
        let raw = record::decode_channel_samples(
            self.chunk_iter(group),
            group.stride(),
            group.record_id_len as usize,
            channel,
            group.cycles,
        )?;
        let samples = channel.conversion.apply(&raw)?;
        Ok(Signal {
            name: channel.name.clone(),
            samples,
            timestamps: self.master_timestamps(group)?,
            shape: channel.shape.clone(),
            unit: channel.unit.clone(),
            comment: channel.comment.clone(),
        })
    }

    /// Timestamps of the group's master channel, or an implicit record
    /// index ramp for masterless groups.
    pub(crate) fn master_timestamps(&self, group: &ChannelGroup) -> Result<Vec<f64>> {
        let Some(mi) = group.master_index() else {
            return Ok((0..group.cycles).map(|i| i as f64).collect());
        };
        let master = &group.channels[mi];
        let raw = record::decode_channel_samples(
            self.chunk_iter(group),
            group.stride(),
            group.record_id_len as usize,
            master,
            group.cycles,
        )?;
        let values = master.conversion.apply(&raw)?;
        (0..values.len())
            .map(|i| {
                values.value_f64(i).ok_or_else(|| Error::InvalidConversion {
                    reason: format!("master channel {:?} is not numeric", master.name),
                })
            })
            .collect()
    }

    /// Iterate the group's data chunks, decompressed.
    pub(crate) fn chunk_iter<'a>(
        &'a self,
        group: &'a ChannelGroup,
    ) -> Box<dyn Iterator<Item = Result<Vec<u8>>> + 'a> {
        match &group.data {
            GroupData::Owned(chunks) => Box::new(chunks.iter().map(|c| Ok(c.clone()))),
            GroupData::Stored(chunks) => Box::new(chunks.iter().map(move |chunk| {
                let store = self.store.as_ref().ok_or_else(|| Error::CorruptBlock {
                    offset: chunk.data_offset,
                    reason: "stored chunk without backing store".into(),
                })?;
                let payload = store
                    .borrow_mut()
                    .read_range(chunk.data_offset, chunk.stored_len as usize)?;
                decompress_chunk(
                    &payload,
                    chunk.encoding,
                    chunk.unpacked_len,
                    chunk.data_offset,
                )
            })),
        }
    }

    /// Read the byte range `[start, end)` of the group's logical record
    /// stream. Raw stored chunks are read bounded; compressed chunks
    /// must be inflated whole before slicing.
    pub(crate) fn read_stream_range(
        &self,
        group: &ChannelGroup,
        start: u64,
        end: u64,
    ) -> Result<Vec<Vec<u8>>> {
        let mut pieces = Vec::new();
        if start >= end {
            return Ok(pieces);
        }
        let mut logical = 0u64;
        match &group.data {
            GroupData::Owned(chunks) => {
                for chunk in chunks {
                    let len = chunk.len() as u64;
                    if let Some((a, b)) = overlap(logical, len, start, end) {
                        pieces.push(chunk[a as usize..b as usize].to_vec());
                    }
                    logical += len;
                }
            }
            GroupData::Stored(chunks) => {
                for chunk in chunks {
                    let len = chunk.unpacked_len;
                    if let Some((a, b)) = overlap(logical, len, start, end) {
                        let store = self.store.as_ref().ok_or_else(|| Error::CorruptBlock {
                            offset: chunk.data_offset,
                            reason: "stored chunk without backing store".into(),
                        })?;
                        if chunk.encoding == ChunkEncoding::Raw {
                            let piece = store
                                .borrow_mut()
                                .read_range(chunk.data_offset + a, (b - a) as usize)?;
                            pieces.push(piece);
                        } else {
                            let payload = store
                                .borrow_mut()
                                .read_range(chunk.data_offset, chunk.stored_len as usize)?;
                            let full = decompress_chunk(
                                &payload,
                                chunk.encoding,
                                chunk.unpacked_len,
                                chunk.data_offset,
                            )?;
                            pieces.push(full[a as usize..b as usize].to_vec());
                        }
                    }
                    logical += len;
                }
            }
        }
        Ok(pieces)
    }

    /// The group's record stream with record-id prefixes stripped and
    /// chunks re-aligned to record boundaries. This is the canonical
    /// form the structural operations and the writer work from.
    pub(crate) fn normalized_chunks(&self, group: &ChannelGroup) -> Result<Vec<Vec<u8>>> {
        let stride = group.stride();
        let id_len = group.record_id_len as usize;
        let out_stride = stride - id_len;
        if out_stride == 0 {
            return Ok(Vec::new());
        }
        let mut builder = ChunkBuilder::new(out_stride);
        record::for_each_record(self.chunk_iter(group), stride, |rec| {
            builder.push_record(&rec[id_len..]);
            Ok(())
        })?;
        Ok(builder.finish())
    }

    fn materialize(&mut self) -> Result<()> {
        let Some(groups) = self.groups.take() else {
            return Ok(());
        };
        let mut owned = Vec::with_capacity(groups.len());
        for group in &groups {
            let chunks: Result<Vec<Vec<u8>>> = self.chunk_iter(group).collect();
            owned.push(chunks?);
        }
        let mut groups = groups;
        for (group, data) in groups.iter_mut().zip(owned) {
            group.data = GroupData::Owned(data);
        }
        self.groups = Some(groups);
        Ok(())
    }
}

fn overlap(base: u64, len: u64, start: u64, end: u64) -> Option<(u64, u64)> {
    let lo = start.max(base);
    let hi = end.min(base + len);
    if lo < hi {
        Some((lo - base, hi - base))
    } else {
        None
    }
}

/// Field layout for one appended signal: neutral data type and the
/// fixed per-record width in bytes.
fn appended_field(samples: &Samples, name: &str) -> Result<(DataType, usize)> {
    Ok(match samples {
        Samples::UnsignedInteger(_) => (DataType::UnsignedIntegerLE, 8),
        Samples::SignedInteger(_) => (DataType::SignedIntegerLE, 8),
        Samples::Float32(_) => (DataType::FloatLE, 4),
        Samples::Float64(_) => (DataType::FloatLE, 8),
        Samples::Text(values) => {
            let width = values.iter().map(|v| v.len()).max().unwrap_or(0).max(1);
            (DataType::StringUtf8, width)
        }
        Samples::ByteArrays(values) => {
            let width = values.first().map(|v| v.len()).unwrap_or(0).max(1);
            if values.iter().any(|v| v.len() != values[0].len()) {
                return Err(Error::Serialization(format!(
                    "byte arrays of signal {name:?} must share one length"
                )));
            }
            (DataType::ByteArray, width)
        }
    })
}

fn write_sample(dst: &mut [u8], samples: &Samples, index: usize) {
    match samples {
        Samples::UnsignedInteger(v) => dst.copy_from_slice(&v[index].to_le_bytes()),
        Samples::SignedInteger(v) => dst.copy_from_slice(&v[index].to_le_bytes()),
        Samples::Float32(v) => dst.copy_from_slice(&v[index].to_le_bytes()),
        Samples::Float64(v) => dst.copy_from_slice(&v[index].to_le_bytes()),
        Samples::Text(v) => {
            let bytes = v[index].as_bytes();
            dst[..bytes.len()].copy_from_slice(bytes);
        }
        Samples::ByteArrays(v) => dst[..v[index].len()].copy_from_slice(&v[index]),
    }
}

pub(crate) fn find_channel(groups: &[ChannelGroup], name: &str) -> Result<(usize, usize)> {
    for (gi, group) in groups.iter().enumerate() {
        for (ci, channel) in group.channels.iter().enumerate() {
            if channel.name == name {
                return Ok((gi, ci));
            }
        }
    }
    Err(Error::UnknownChannel {
        name: name.to_string(),
    })
}
