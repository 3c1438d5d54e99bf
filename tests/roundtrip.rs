use mdfio::{Compression, Error, Mdf, MdfVersion, MemoryMode, Result, Samples, Signal, TimeRef};

fn scalar(name: &str, samples: Samples, unit: Option<&str>) -> Signal {
    let cycles = samples.len();
    Signal {
        name: name.into(),
        samples,
        timestamps: (0..cycles).map(|i| i as f64 * 0.01).collect(),
        shape: Vec::new(),
        unit: unit.map(str::to_string),
        comment: None,
    }
}

fn reference_file(version: MdfVersion) -> Result<Mdf> {
    let mut mdf = Mdf::new(version);
    mdf.set_comment("bench recording");
    mdf.set_start_time_ns(1_700_000_000_000_000_000);
    mdf.append(
        &[
            scalar(
                "counter",
                Samples::UnsignedInteger((0..100).collect()),
                None,
            ),
            scalar(
                "delta",
                Samples::SignedInteger((0..100).map(|i| i - 50).collect()),
                Some("m"),
            ),
            scalar(
                "temperature",
                Samples::Float32((0..100).map(|i| 20.0 + i as f32 * 0.5).collect()),
                Some("degC"),
            ),
            scalar(
                "speed",
                Samples::Float64((0..100).map(|i| (i as f64).sqrt()).collect()),
                Some("km/h"),
            ),
        ],
        Some("drive signals"),
    )?;
    mdf.append(
        &[scalar(
            "gear",
            Samples::Text(
                (0..20)
                    .map(|i| ["P", "R", "N", "D"][i % 4].to_string())
                    .collect(),
            ),
            None,
        )],
        None,
    )?;
    Ok(mdf)
}

#[test]
fn v4_round_trip_all_modes_and_compressions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let original = reference_file(MdfVersion::V4_10)?;
    let names = original.channel_names()?;

    for (i, compression) in [
        Compression::Uncompressed,
        Compression::Deflate,
        Compression::TransposedDeflate,
    ]
    .into_iter()
    .enumerate()
    {
        let path = dir.path().join(format!("round_{i}.mf4"));
        original.save(&path, compression, false)?;

        for mode in [MemoryMode::Full, MemoryMode::Low, MemoryMode::Minimum] {
            let back = Mdf::open(&path, mode)?;
            assert_eq!(back.version(), MdfVersion::V4_10);
            assert_eq!(back.comment(), Some("bench recording"));
            assert_eq!(back.start_time_ns(), 1_700_000_000_000_000_000);
            assert_eq!(back.channel_names()?, names);
            for name in &names {
                assert_eq!(back.get(name)?, original.get(name)?, "channel {name}");
            }
        }
    }
    Ok(())
}

#[test]
fn v3_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let original = reference_file(MdfVersion::V3_30)?;
    let path = dir.path().join("round.mdf");
    original.save(&path, Compression::Uncompressed, false)?;

    for mode in [MemoryMode::Full, MemoryMode::Low, MemoryMode::Minimum] {
        let back = Mdf::open(&path, mode)?;
        assert_eq!(back.version(), MdfVersion::V3_30);
        assert_eq!(back.start_time_ns(), 1_700_000_000_000_000_000);
        for name in original.channel_names()? {
            assert_eq!(back.get(&name)?, original.get(&name)?, "channel {name}");
        }
    }
    Ok(())
}

#[test]
fn long_channel_names_survive_the_v3_layout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let long = "a_rather_long_channel_name_well_beyond_the_inline_field";
    let mut mdf = Mdf::new(MdfVersion::V3_30);
    mdf.append(
        &[scalar(long, Samples::Float64(vec![1.0, 2.0, 3.0]), None)],
        None,
    )?;
    let path = dir.path().join("long.mdf");
    mdf.save(&path, Compression::Uncompressed, false)?;

    let back = Mdf::open(&path, MemoryMode::Full)?;
    assert!(back.channel_names()?.contains(&long.to_string()));
    assert_eq!(back.get(long)?.samples, Samples::Float64(vec![1.0, 2.0, 3.0]));
    Ok(())
}

#[test]
fn existing_destination_is_guarded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("guarded.mf4");
    let mdf = reference_file(MdfVersion::V4_10)?;
    mdf.save(&path, Compression::Uncompressed, false)?;

    assert!(matches!(
        mdf.save(&path, Compression::Uncompressed, false),
        Err(Error::DestinationExists { .. })
    ));
    // Explicit overwrite replaces the file.
    mdf.save(&path, Compression::Deflate, true)?;
    let back = Mdf::open(&path, MemoryMode::Full)?;
    assert_eq!(back.get("counter")?, mdf.get("counter")?);
    Ok(())
}

#[test]
fn save_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let a = dir.path().join("a.mf4");
    let b = dir.path().join("b.mf4");
    let c = dir.path().join("c.mf4");

    reference_file(MdfVersion::V4_10)?.save(&a, Compression::Deflate, false)?;
    Mdf::open(&a, MemoryMode::Full)?.save(&b, Compression::Deflate, false)?;
    Mdf::open(&b, MemoryMode::Full)?.save(&c, Compression::Deflate, false)?;

    assert_eq!(std::fs::read(&b)?, std::fs::read(&c)?);
    Ok(())
}

#[test]
fn array_channels_round_trip_cut_and_select() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut mdf = Mdf::new(MdfVersion::V4_10);
    let accel = Signal {
        name: "accel".into(),
        samples: Samples::Float64((0..300).map(|k| k as f64 * 0.25).collect()),
        timestamps: (0..100).map(|i| i as f64 * 0.01).collect(),
        shape: vec![3],
        unit: Some("m/s2".into()),
        comment: None,
    };
    mdf.append(&[accel.clone()], None)?;

    let path = dir.path().join("array.mf4");
    mdf.save(&path, Compression::Deflate, false)?;
    for mode in [MemoryMode::Full, MemoryMode::Low, MemoryMode::Minimum] {
        let back = Mdf::open(&path, mode)?;
        let sig = back.get("accel")?;
        assert_eq!(sig.shape, vec![3]);
        assert_eq!(sig.cycles(), 100);
        assert_eq!(sig.samples, accel.samples);
        assert_eq!(back.select(&["accel"])?[0], sig);
    }

    // Saving the re-read file reproduces it byte for byte.
    let second = dir.path().join("array_again.mf4");
    Mdf::open(&path, MemoryMode::Full)?.save(&second, Compression::Deflate, false)?;
    assert_eq!(std::fs::read(&path)?, std::fs::read(&second)?);

    // Cutting keeps whole per-record rows together.
    let cut = mdf.cut(Some(0.30), Some(0.60), TimeRef::Absolute)?;
    let sig = cut.get("accel")?;
    assert_eq!(sig.cycles(), 30);
    assert_eq!(sig.samples.len(), 90);
    assert_eq!(sig.samples.value_f64(0), Some(90.0 * 0.25));

    // The 3.x layout has no array descriptors.
    assert!(matches!(
        mdf.convert(MdfVersion::V3_30),
        Err(Error::LossyConversion { .. })
    ));
    Ok(())
}

/// Locate the `##CN` block whose name text matches `name`.
fn channel_block_offset(bytes: &[u8], name: &str) -> usize {
    let mut at = 0;
    while let Some(pos) = bytes[at..].windows(4).position(|w| w == b"##CN") {
        let cn = at + pos;
        let tx = u64::from_le_bytes(bytes[cn + 40..cn + 48].try_into().unwrap()) as usize;
        let text = &bytes[tx + 24..];
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        if &text[..end] == name.as_bytes() {
            return cn;
        }
        at = cn + 4;
    }
    panic!("no channel block named {name:?}");
}

#[test]
fn oversized_field_declarations_invalidate_one_channel_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("patched.mf4");
    let original = reference_file(MdfVersion::V4_10)?;
    original.save(&path, Compression::Uncompressed, false)?;

    // Point one channel's field past the end of its 36-byte record.
    let mut bytes = std::fs::read(&path)?;
    let cn = channel_block_offset(&bytes, "delta");
    bytes[cn + 92..cn + 96].copy_from_slice(&100u32.to_le_bytes());

    let back = Mdf::from_bytes(bytes)?;
    assert!(!back.channel_names()?.iter().any(|n| n == "delta"));
    assert!(matches!(
        back.get("delta"),
        Err(Error::UnknownChannel { .. })
    ));
    // Intact siblings still decode.
    assert_eq!(back.get("counter")?, original.get("counter")?);
    assert_eq!(back.get("speed")?, original.get("speed")?);
    Ok(())
}

#[test]
fn unknown_channels_fail_lookups() -> Result<()> {
    let mdf = reference_file(MdfVersion::V4_10)?;
    assert!(matches!(
        mdf.get("no_such_channel"),
        Err(Error::UnknownChannel { .. })
    ));
    assert!(matches!(
        mdf.select(&["counter", "no_such_channel"]),
        Err(Error::UnknownChannel { .. })
    ));
    Ok(())
}

#[test]
fn truncated_file_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("short.mf4");
    let whole = dir.path().join("whole.mf4");
    reference_file(MdfVersion::V4_10)?.save(&whole, Compression::Uncompressed, false)?;
    let bytes = std::fs::read(&whole)?;
    std::fs::write(&path, &bytes[..200])?;

    assert!(Mdf::open(&path, MemoryMode::Full).is_err());
    Ok(())
}
