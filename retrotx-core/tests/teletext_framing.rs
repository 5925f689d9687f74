//! Teletext service behaviour through the full pipeline.

use retrotx_core::pipeline::build_pipeline;
use retrotx_core::source::TestPatternSource;
use retrotx_core::video::presets;
use retrotx_core::FixedClock;
use std::io::Write;
use std::sync::Arc;

fn write_tti(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path
}

#[test]
fn teletext_lines_carry_data_in_the_vbi() {
    let dir = std::env::temp_dir().join("retrotx-itest-tti");
    let page = write_tti(
        &dir,
        "p100.tti",
        "PN,10000\r\nPS,8000\r\nSC,0000\r\nOL,1,HELLO WORLD\r\nOL,2,SECOND ROW\r\n",
    );

    let mut conf = presets::preset("pal").unwrap();
    conf.features.teletext = Some(page.display().to_string());
    let src = TestPatternSource::grey(100, 100, conf.audio_sample_rate);
    let mut p = build_pipeline(
        conf,
        14_000_000,
        14_000_000,
        Box::new(src),
        Arc::new(FixedClock(946684800)),
    )
    .unwrap();

    // Collect the first frame and look at a teletext line.
    let mut vbi_energy = 0u64;
    let mut active_line_energy = 0u64;
    let mut out = Vec::new();
    for n in 1..=625 {
        out.clear();
        p.next_line_iq(&mut out).unwrap();
        let line_no = n;
        let e: u64 = out
            .chunks_exact(2)
            .skip(300)
            .take(500)
            .map(|p| (p[0].max(0)) as u64)
            .sum();
        if (7..=22).contains(&line_no) {
            vbi_energy += e;
        }
        if line_no == 150 {
            active_line_energy = e;
        }
    }

    // Data bits lift the VBI lines well above blanking.
    assert!(vbi_energy > 0, "no teletext energy");
    assert!(active_line_energy > 0);
}

#[test]
fn non_tti_file_is_rejected() {
    let dir = std::env::temp_dir().join("retrotx-itest-tti2");
    let page = write_tti(&dir, "bogus.txt", "this is not teletext\n");

    let mut conf = presets::preset("pal").unwrap();
    conf.features.teletext = Some(page.display().to_string());
    let src = TestPatternSource::grey(100, 100, conf.audio_sample_rate);
    let r = build_pipeline(
        conf,
        14_000_000,
        14_000_000,
        Box::new(src),
        Arc::new(FixedClock(0)),
    );
    assert!(r.is_err());
}

#[test]
fn raw_packet_mode_loops_the_file() {
    let dir = std::env::temp_dir().join("retrotx-itest-raw");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("packets.t42");
    // Two 42-byte packets of recognisable filler.
    let mut data = vec![0x55u8; 42];
    data.extend(vec![0xAAu8; 42]);
    std::fs::write(&path, &data).unwrap();

    let mut conf = presets::preset("pal").unwrap();
    conf.features.teletext = Some(format!("raw:{}", path.display()));
    let src = TestPatternSource::grey(100, 100, conf.audio_sample_rate);
    let mut p = build_pipeline(
        conf,
        14_000_000,
        14_000_000,
        Box::new(src),
        Arc::new(FixedClock(0)),
    )
    .unwrap();

    // Three frames consume 96 packets; the two-packet file must loop.
    let mut out = Vec::new();
    for _ in 0..(3 * 625) {
        out.clear();
        p.next_line_iq(&mut out).unwrap();
    }
}

#[test]
fn teletext_requires_625_lines() {
    let mut conf = presets::preset("ntsc-m").unwrap();
    conf.features.teletext = Some("raw:-".into());
    let src = TestPatternSource::grey(100, 100, conf.audio_sample_rate);
    let r = build_pipeline(
        conf,
        14_000_000,
        14_000_000,
        Box::new(src),
        Arc::new(FixedClock(0)),
    );
    assert!(r.is_err());
}
