//! Scrambler pipelines end to end: the output must differ from clear
//! video in the scrambled regions and preserve the protected ones.

use retrotx_core::pipeline::build_pipeline;
use retrotx_core::source::{AvSource, TestPatternSource, VideoFrame};
use retrotx_core::video::presets;
use retrotx_core::{ChannelPipeline, FixedClock};
use std::sync::Arc;

const RATE: u32 = 14_000_000;

/// Grey horizontal ramp: every row identical, no chroma. Gives each
/// active sample a position-unique level so line rotations are
/// measurable.
struct GradientSource;

impl AvSource for GradientSource {
    fn read_video(&mut self) -> retrotx_core::Result<VideoFrame> {
        let (w, h) = (704usize, 576usize);
        let mut f = VideoFrame::filled(w, h, 0, 128, 128);
        for y in 0..h {
            for x in 0..w {
                f.y[y * w + x] = (x * 255 / (w - 1)) as u8;
            }
        }
        Ok(f)
    }

    fn read_audio(&mut self, samples: &mut [i16]) -> retrotx_core::Result<()> {
        samples.fill(0);
        Ok(())
    }

    fn audio_sample_rate(&self) -> u32 {
        32000
    }
}

fn pipeline(setup: impl FnOnce(&mut retrotx_core::VideoConfig)) -> ChannelPipeline {
    let mut conf = presets::preset("pal").unwrap();
    setup(&mut conf);
    let src = TestPatternSource::new(704, 576, conf.audio_sample_rate);
    build_pipeline(conf, RATE, RATE, Box::new(src), Arc::new(FixedClock(0))).unwrap()
}

fn collect_lines(p: &mut ChannelPipeline, frames: usize) -> Vec<Vec<i16>> {
    let mut lines = Vec::new();
    let mut out = Vec::new();
    for _ in 0..frames * 625 {
        out.clear();
        p.next_line_iq(&mut out).unwrap();
        lines.push(out.chunks_exact(2).map(|p| p[0]).collect());
    }
    lines
}

#[test]
fn videocrypt_free_access_frame_zero_golden() {
    // Free-access Videocrypt I at 14 MHz: frame 0 line 24 must cut at
    // 0xBC and the first byte of the VBI packet on line 12 must be
    // 0x15.
    let mut conf = presets::preset("pal").unwrap();
    conf.features.videocrypt = Some("free".into());
    let src = GradientSource;
    let mut p = build_pipeline(conf, RATE, RATE, Box::new(src), Arc::new(FixedClock(0))).unwrap();

    // The one-line scrambler window delays emission by one step, so
    // stream index i carries raster line i of frame 0.
    let lines = collect_lines(&mut p, 1);

    // At 14 MHz the line is 896 samples and the cut timing reference
    // maps sample x of the 14 MHz grid to x + 33 (half the hsync
    // pulse from the line start).
    let left = 120 + 33;

    // Line 24 carries the next line's ramp rotated at the cut point:
    // the rotation wrap is the largest downward step in the active
    // region.
    let l24 = &lines[24];
    let mut jump_at = 0usize;
    let mut jump = 0i32;
    for x in left + 1..878 {
        let d = l24[x] as i32 - l24[x - 1] as i32;
        if d < jump {
            jump = d;
            jump_at = x;
        }
    }
    assert!(jump < -15000, "no rotation wrap found (max step {jump})");
    let cut = jump_at - left;
    let cut_byte = 0xFF - (cut - 105) / 2;
    assert_eq!(cut_byte, 0xBC, "cut at sample offset {cut}");

    // Line 12: 40 VBI bits at 18 samples per bit from 10.86 us,
    // transmitted LSB first. Decode the first eight.
    let l12 = &lines[12];
    let threshold = 11000i16;
    let mut byte = 0u8;
    for b in 0..8 {
        let centre = 161 + 18 * b;
        if l12[centre] > threshold {
            byte |= 1 << b;
        }
    }
    assert_eq!(byte, 0x15);
}

#[test]
fn videocrypt_rearranges_active_video() {
    let mut clear = pipeline(|_| {});
    let mut vc = pipeline(|c| {
        c.features.videocrypt = Some("free".into());
    });

    let clear_lines = collect_lines(&mut clear, 2);
    let vc_lines = collect_lines(&mut vc, 2);

    // Deep in the second frame, active lines must differ.
    let mut changed = 0;
    for l in 700..900 {
        if clear_lines[l] != vc_lines[l] {
            changed += 1;
        }
    }
    assert!(changed > 150, "{changed} lines changed");

    // The scrambled line is a permutation of clear content, so the
    // sample population of a field stays comparable: compare field
    // energy.
    let energy = |lines: &[Vec<i16>]| -> f64 {
        lines[650..900]
            .iter()
            .flat_map(|l| l.iter())
            .map(|&s| (s as f64).abs())
            .sum::<f64>()
    };
    let ce = energy(&clear_lines);
    let ve = energy(&vc_lines);
    let ratio = ve / ce;
    assert!((0.7..1.3).contains(&ratio), "energy ratio {ratio}");
}

#[test]
fn videocrypt_leaves_wss_line_alone() {
    let mut clear = pipeline(|c| {
        c.features.wss = Some("16:9".into());
    });
    let mut vc = pipeline(|c| {
        c.features.wss = Some("16:9".into());
        c.features.videocrypt = Some("free".into());
    });

    let clear_lines = collect_lines(&mut clear, 2);
    let vc_lines = collect_lines(&mut vc, 2);

    // Find line 23 of frame 1 in the emitted stream: the videocrypt
    // window delays output by one line.
    for (i, l) in clear_lines.iter().enumerate().take(1250).skip(625) {
        let line_no = i % 625 + 1;
        if line_no == 23 {
            // WSS data region must be identical.
            let a = &l[..400];
            let b = &vc_lines[i + 1][..400];
            assert_eq!(a, b, "WSS line touched at stream index {i}");
            break;
        }
    }
}

#[test]
fn syster_shuffle_reorders_fields() {
    let mut clear = pipeline(|_| {});
    let mut ng = pipeline(|c| {
        c.features.syster = Some("premiere-fa".into());
    });

    // The Syster window is 345 lines; compare the second frame.
    let clear_lines = collect_lines(&mut clear, 3);
    let ng_lines = collect_lines(&mut ng, 3);

    let mut changed = 0;
    for l in 1300..1850 {
        if clear_lines[l] != ng_lines[l] {
            changed += 1;
        }
    }
    assert!(changed > 200, "{changed} lines changed");
}

#[test]
fn d11_delays_are_visible() {
    let mut clear = pipeline(|_| {});
    let mut d11 = pipeline(|c| {
        c.features.d11 = Some("premiere-fa".into());
    });

    let clear_lines = collect_lines(&mut clear, 2);
    let d11_lines = collect_lines(&mut d11, 2);

    let mut changed = 0;
    for l in 650..1200 {
        if clear_lines[l] != d11_lines[l] {
            changed += 1;
        }
    }
    assert!(changed > 100, "{changed} lines changed");
}

#[test]
fn videocrypts_shuffles_blocks() {
    let mut clear = pipeline(|_| {});
    let mut vcs = pipeline(|c| {
        c.features.videocrypts = Some("free".into());
    });

    let clear_lines = collect_lines(&mut clear, 3);
    let vcs_lines = collect_lines(&mut vcs, 3);

    let mut changed = 0;
    for l in 1300..1850 {
        if clear_lines[l] != vcs_lines[l] {
            changed += 1;
        }
    }
    assert!(changed > 200, "{changed} lines changed");
}

#[test]
fn unknown_syster_provider_fails_at_init() {
    let mut conf = presets::preset("pal").unwrap();
    conf.features.syster = Some("not-a-provider".into());
    let src = TestPatternSource::new(100, 100, conf.audio_sample_rate);
    let r = build_pipeline(conf, RATE, RATE, Box::new(src), Arc::new(FixedClock(0)));
    assert!(r.is_err());
}
