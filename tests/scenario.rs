//! End-to-end exercise: a multi-group recording with one conversion of
//! each family, written compressed, re-read under every memory
//! strategy, cut apart and reassembled.

use mdfio::{
    Compression, Conversion, Mdf, MdfVersion, MemoryMode, Result, Samples, Signal, TimeRef,
};

const CYCLES: usize = 512;
const DT: f64 = 0.002;

fn signal(name: &str, samples: Samples, unit: Option<&str>) -> Signal {
    Signal {
        name: name.into(),
        samples,
        timestamps: (0..CYCLES).map(|i| i as f64 * DT).collect(),
        shape: Vec::new(),
        unit: unit.map(str::to_string),
        comment: None,
    }
}

/// Four groups, one channel each: unsigned ramp with a gain, signed
/// ramp with an offset, a sine through a formula, and a rational.
fn recording() -> Result<Mdf> {
    let mut mdf = Mdf::new(MdfVersion::V4_10);
    mdf.set_comment("synthetic rig run");
    mdf.set_start_time_ns(1_720_000_000_000_000_000);

    mdf.append(
        &[signal(
            "ramp_u",
            Samples::UnsignedInteger((0..CYCLES as u64).collect()),
            Some("count"),
        )],
        None,
    )?;
    mdf.set_channel_conversion(
        "ramp_u",
        Conversion::Linear {
            scale: 3.0,
            offset: 0.0,
        },
    )?;

    mdf.append(
        &[signal(
            "ramp_i",
            Samples::SignedInteger((0..CYCLES as i64).map(|i| i - 256).collect()),
            None,
        )],
        None,
    )?;
    mdf.set_channel_conversion(
        "ramp_i",
        Conversion::Linear {
            scale: 1.0,
            offset: -0.5,
        },
    )?;

    mdf.append(
        &[signal(
            "wave",
            Samples::Float64((0..CYCLES).map(|i| i as f64 * DT).collect()),
            Some("V"),
        )],
        None,
    )?;
    mdf.set_channel_conversion(
        "wave",
        Conversion::Formula {
            expression: "3 * sin(2*pi*X)".into(),
        },
    )?;

    mdf.append(
        &[signal(
            "ratio",
            Samples::Float64((0..CYCLES).map(|i| i as f64 * 0.125).collect()),
            None,
        )],
        None,
    )?;
    mdf.set_channel_conversion(
        "ratio",
        Conversion::Rational {
            numerator: [0.0, 4.0, -0.5],
            denominator: [0.0, 0.0, 1.0],
        },
    )?;

    Ok(mdf)
}

fn expected_value(name: &str, i: usize) -> f64 {
    match name {
        "ramp_u" => i as f64 * 3.0,
        "ramp_i" => (i as f64 - 256.0) - 0.5,
        "wave" => 3.0 * (2.0 * std::f64::consts::PI * i as f64 * DT).sin(),
        "ratio" => 4.0 * (i as f64 * 0.125) - 0.5,
        other => panic!("unknown channel {other}"),
    }
}

fn check_channels(mdf: &Mdf, from: usize, count: usize) -> Result<()> {
    for name in ["ramp_u", "ramp_i", "wave", "ratio"] {
        let sig = mdf.get(name)?;
        assert_eq!(sig.cycles(), count, "channel {name}");
        let Samples::Float64(values) = &sig.samples else {
            panic!("channel {name} did not convert to float");
        };
        for (k, v) in values.iter().enumerate() {
            let e = expected_value(name, from + k);
            assert!((v - e).abs() < 1e-9, "{name}[{k}]: got {v}, expected {e}");
            let t = sig.timestamps[k];
            let te = (from + k) as f64 * DT;
            assert!((t - te).abs() < 1e-9, "{name} time[{k}]: got {t}, expected {te}");
        }
    }
    Ok(())
}

#[test]
fn compressed_write_read_and_reassembly() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rig.mf4");
    recording()?.save(&path, Compression::TransposedDeflate, false)?;

    for mode in [MemoryMode::Full, MemoryMode::Low, MemoryMode::Minimum] {
        let mdf = Mdf::open(&path, mode)?;
        assert_eq!(mdf.group_count()?, 4);
        assert_eq!(mdf.comment(), Some("synthetic rig run"));
        check_channels(&mdf, 0, CYCLES)?;
    }

    // Cut an interior window and check the values line up.
    let mdf = Mdf::open(&path, MemoryMode::Low)?;
    let mid = mdf.cut(Some(100.0 * DT), Some(300.0 * DT), TimeRef::Absolute)?;
    check_channels(&mid, 100, 200)?;

    // Split at an interior timestamp and reassemble.
    let head = mdf.cut(None, Some(200.0 * DT), TimeRef::Absolute)?;
    let tail = mdf.cut(Some(200.0 * DT), None, TimeRef::Absolute)?;
    let whole = Mdf::merge(&[head, tail], MdfVersion::V4_10)?;
    check_channels(&whole, 0, CYCLES)?;

    // The reassembled file survives another save.
    let again = dir.path().join("rig_rejoined.mf4");
    whole.save(&again, Compression::Deflate, false)?;
    check_channels(&Mdf::open(&again, MemoryMode::Full)?, 0, CYCLES)?;
    Ok(())
}

#[test]
fn large_groups_span_multiple_data_chunks() -> Result<()> {
    // 300k 16-byte records overflow one 4 MiB data block, so the writer
    // has to emit a fragment list. The step is a dyadic rational to keep
    // the cut bounds exact.
    const N: usize = 300_000;
    const STEP: f64 = 1.0 / 8192.0;
    let dir = tempfile::tempdir()?;
    let mut mdf = Mdf::new(MdfVersion::V4_10);
    mdf.append(
        &[Signal {
            name: "pressure".into(),
            samples: Samples::Float64((0..N).map(|i| i as f64).collect()),
            timestamps: (0..N).map(|i| i as f64 * STEP).collect(),
            shape: Vec::new(),
            unit: Some("kPa".into()),
            comment: None,
        }],
        None,
    )?;
    let reference = mdf.get("pressure")?;

    for (i, compression) in [
        Compression::Uncompressed,
        Compression::Deflate,
        Compression::TransposedDeflate,
    ]
    .into_iter()
    .enumerate()
    {
        let path = dir.path().join(format!("large_{i}.mf4"));
        mdf.save(&path, compression, false)?;
        for mode in [MemoryMode::Full, MemoryMode::Low] {
            let back = Mdf::open(&path, mode)?;
            assert_eq!(back.get("pressure")?, reference);

            // A window straddling the fragment seam reads contiguously.
            let seam = 262_144.0 * STEP;
            let cut = back.cut(
                Some(seam - 100.0 * STEP),
                Some(seam + 100.0 * STEP),
                TimeRef::Absolute,
            )?;
            let sig = cut.get("pressure")?;
            assert_eq!(sig.cycles(), 200);
            assert_eq!(sig.samples.value_f64(0), Some(262_044.0));
        }
    }
    Ok(())
}

#[test]
fn scenario_survives_the_v3_layout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rig.mdf");
    recording()?.convert(MdfVersion::V3_30)?.save(
        &path,
        Compression::Uncompressed,
        false,
    )?;

    let mdf = Mdf::open(&path, MemoryMode::Full)?;
    assert_eq!(mdf.version(), MdfVersion::V3_30);
    check_channels(&mdf, 0, CYCLES)?;

    check_channels(&mdf.convert(MdfVersion::V4_10)?, 0, CYCLES)?;
    Ok(())
}
