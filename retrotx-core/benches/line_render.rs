use criterion::{criterion_group, criterion_main, Criterion};
use retrotx_core::pipeline::build_pipeline;
use retrotx_core::source::TestPatternSource;
use retrotx_core::video::presets;
use retrotx_core::FixedClock;
use std::sync::Arc;

fn bench_line_render(c: &mut Criterion) {
    let conf = presets::preset("pal-i").unwrap();
    let src = TestPatternSource::new(704, 576, conf.audio_sample_rate);
    let mut p = build_pipeline(
        conf,
        16_000_000,
        16_000_000,
        Box::new(src),
        Arc::new(FixedClock(0)),
    )
    .unwrap();

    let mut out = Vec::new();
    c.bench_function("pal_i_line_16msps", |b| {
        b.iter(|| {
            out.clear();
            p.next_line_iq(&mut out).unwrap();
            out.len()
        })
    });
}

fn bench_scrambled_line(c: &mut Criterion) {
    let mut conf = presets::preset("pal-i").unwrap();
    conf.features.videocrypt = Some("free".into());
    let src = TestPatternSource::new(704, 576, conf.audio_sample_rate);
    let mut p = build_pipeline(
        conf,
        16_000_000,
        16_000_000,
        Box::new(src),
        Arc::new(FixedClock(0)),
    )
    .unwrap();

    let mut out = Vec::new();
    c.bench_function("pal_i_videocrypt_line_16msps", |b| {
        b.iter(|| {
            out.clear();
            p.next_line_iq(&mut out).unwrap();
            out.len()
        })
    });
}

criterion_group!(benches, bench_line_render, bench_scrambled_line);
criterion_main!(benches);
