use mdfio::{
    Compression, Conversion, Error, Mdf, MdfVersion, MemoryMode, Result, Samples, Signal, TimeRef,
};

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

fn drive_file() -> Result<Mdf> {
    let mut mdf = Mdf::new(MdfVersion::V4_10);
    mdf.append(
        &[
            scalar(
                "counter",
                Samples::UnsignedInteger((0..100).collect()),
                None,
            ),
            scalar(
                "speed",
                Samples::Float64((0..100).map(|i| i as f64 * 0.5).collect()),
                Some("km/h"),
            ),
        ],
        None,
    )?;
    mdf.append(
        &[scalar(
            "brake",
            Samples::UnsignedInteger((0..50).map(|i| (i / 10) % 2).collect()),
            None,
        )],
        None,
    )?;
    Ok(mdf)
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "got {a}, expected {e}");
    }
}

#[test]
fn filter_keeps_requested_channels_and_masters() -> Result<()> {
    let mdf = drive_file()?;
    let filtered = mdf.filter(&["speed"])?;

    // The brake group carried no requested channel and is gone; the
    // master rides along with the kept channel.
    assert_eq!(filtered.group_count()?, 1);
    assert_eq!(filtered.channel_names()?, vec!["time", "speed"]);
    assert_eq!(filtered.get("speed")?, mdf.get("speed")?);
    assert!(matches!(
        filtered.get("counter"),
        Err(Error::UnknownChannel { .. })
    ));

    assert!(matches!(
        mdf.filter(&["speed", "no_such"]),
        Err(Error::UnknownChannel { .. })
    ));
    Ok(())
}

#[test]
fn select_returns_signals_in_request_order() -> Result<()> {
    let mdf = drive_file()?;
    let signals = mdf.select(&["brake", "speed", "counter"])?;
    assert_eq!(signals.len(), 3);
    assert_eq!(signals[0].name, "brake");
    assert_eq!(signals[1].name, "speed");
    assert_eq!(signals[2].name, "counter");
    assert_eq!(signals[1], mdf.get("speed")?);
    Ok(())
}

#[test]
fn cut_pieces_reassemble_into_the_original() -> Result<()> {
    let mdf = drive_file()?;
    let pieces = [
        mdf.cut(None, Some(0.3), TimeRef::Absolute)?,
        mdf.cut(Some(0.3), Some(0.7), TimeRef::Absolute)?,
        mdf.cut(Some(0.7), None, TimeRef::Absolute)?,
    ];
    let merged = Mdf::merge(&pieces, MdfVersion::V4_10)?;

    for name in mdf.channel_names()? {
        assert_eq!(merged.get(&name)?, mdf.get(&name)?, "channel {name}");
    }
    Ok(())
}

#[test]
fn cut_window_is_half_open() -> Result<()> {
    let mdf = drive_file()?;
    let cut = mdf.cut(Some(0.10), Some(0.20), TimeRef::Absolute)?;
    let speed = cut.get("speed")?;
    assert_eq!(speed.cycles(), 10);
    assert!((speed.timestamps[0] - 0.10).abs() < 1e-12);
    assert!(*speed.timestamps.last().unwrap() < 0.20);

    // An empty window leaves zero-cycle groups behind.
    let empty = mdf.cut(Some(5.0), Some(6.0), TimeRef::Absolute)?;
    assert_eq!(empty.get("speed")?.cycles(), 0);
    Ok(())
}

#[test]
fn relative_cut_counts_from_the_earliest_timestamp() -> Result<()> {
    let mut mdf = Mdf::new(MdfVersion::V4_10);
    let mut late = scalar("late", Samples::Float64((0..50).map(f64::from).collect()), None);
    for t in &mut late.timestamps {
        *t += 5.0;
    }
    mdf.append(&[late], None)?;

    let cut = mdf.cut(Some(0.0), Some(0.1), TimeRef::Relative)?;
    let sig = cut.get("late")?;
    assert_eq!(sig.cycles(), 10);
    assert!((sig.timestamps[0] - 5.0).abs() < 1e-12);
    Ok(())
}

#[test]
fn merge_repeats_samples_per_input() -> Result<()> {
    let inputs = [drive_file()?, drive_file()?, drive_file()?];
    let merged = Mdf::merge(&inputs, MdfVersion::V4_10)?;

    let one = inputs[0].get("counter")?;
    let tiled = merged.get("counter")?;
    assert_eq!(tiled.cycles(), one.cycles() * 3);
    let (Samples::UnsignedInteger(all), Samples::UnsignedInteger(base)) =
        (&tiled.samples, &one.samples)
    else {
        panic!("unexpected sample types");
    };
    assert_eq!(all.len(), base.len() * 3);
    for (i, v) in all.iter().enumerate() {
        assert_eq!(v, &base[i % base.len()]);
    }
    Ok(())
}

#[test]
fn merge_rebases_later_files_onto_the_first_origin() -> Result<()> {
    let mut first = drive_file()?;
    first.set_start_time_ns(1_000_000_000);
    let mut second = drive_file()?;
    second.set_start_time_ns(3_000_000_000);

    let merged = Mdf::merge(&[first, second], MdfVersion::V4_10)?;
    assert_eq!(merged.start_time_ns(), 1_000_000_000);

    let speed = merged.get("speed")?;
    assert_eq!(speed.cycles(), 200);
    let expected: Vec<f64> = (0..100)
        .map(|i| i as f64 * 0.01)
        .chain((0..100).map(|i| i as f64 * 0.01 + 2.0))
        .collect();
    assert_close(&speed.timestamps, &expected);
    Ok(())
}

#[test]
fn structurally_different_files_do_not_merge() -> Result<()> {
    let a = drive_file()?;
    let mut b = Mdf::new(MdfVersion::V4_10);
    b.append(
        &[scalar("other", Samples::Float64(vec![1.0]), None)],
        None,
    )?;
    assert!(matches!(
        Mdf::merge(&[a, b], MdfVersion::V4_10),
        Err(Error::IncompatibleMerge { .. })
    ));
    assert!(matches!(
        Mdf::merge(&[], MdfVersion::V4_10),
        Err(Error::IncompatibleMerge { .. })
    ));
    Ok(())
}

#[test]
fn convert_preserves_samples_and_conversions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut mdf = drive_file()?;
    mdf.set_channel_conversion(
        "counter",
        Conversion::Linear {
            scale: 2.0,
            offset: 1.0,
        },
    )?;
    mdf.set_channel_conversion(
        "speed",
        Conversion::Formula {
            expression: "3 * sin(X)".into(),
        },
    )?;
    mdf.set_channel_conversion(
        "brake",
        Conversion::Rational {
            numerator: [0.0, 4.0, -0.5],
            denominator: [0.0, 0.0, 1.0],
        },
    )?;

    let converted = mdf.convert(MdfVersion::V3_30)?;
    assert_eq!(converted.version(), MdfVersion::V3_30);
    let path = dir.path().join("converted.mdf");
    converted.save(&path, Compression::Uncompressed, false)?;

    let back = Mdf::open(&path, MemoryMode::Full)?;
    for name in mdf.channel_names()? {
        assert_eq!(back.get(&name)?, mdf.get(&name)?, "channel {name}");
    }

    // And back again into the 4.x layout.
    let again = back.convert(MdfVersion::V4_10)?;
    assert_eq!(again.get("speed")?, mdf.get("speed")?);
    Ok(())
}

#[test]
fn lookup_conversions_cannot_reach_the_v3_layout() -> Result<()> {
    let mut mdf = drive_file()?;
    mdf.set_channel_conversion(
        "counter",
        Conversion::Lookup {
            pairs: vec![(0.0, 1.0)],
            default: 0.0,
        },
    )?;
    assert!(matches!(
        mdf.convert(MdfVersion::V3_30),
        Err(Error::LossyConversion { .. })
    ));
    Ok(())
}
