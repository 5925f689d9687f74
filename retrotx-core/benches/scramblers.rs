use criterion::{black_box, criterion_group, criterion_main, Criterion};
use retrotx_core::mac::golay::golay_encode;

fn bench_videocrypt_prbs(c: &mut Criterion) {
    const SR1_TAPS: u32 = 0x7BB88888;
    const SR2_TAPS: u32 = 0x17A2C100;

    c.bench_function("videocrypt_prbs_field", |b| {
        b.iter(|| {
            let mut sr1: u32 = black_box(0x7D3D603F);
            let mut sr2: u32 = black_box(0x08C871B2);
            let mut c16: u16 = 0;
            for _ in 0..287 {
                for _ in 0..16 {
                    sr1 = (sr1 >> 1) ^ if sr1 & 1 != 0 { SR1_TAPS } else { 0 };
                    sr2 = (sr2 >> 1) ^ if sr2 & 1 != 0 { SR2_TAPS } else { 0 };
                    let mut a = ((sr2 >> 24) & 0x1F) as u32;
                    if a == 31 {
                        a = 30;
                    }
                    c16 = (c16 << 1) | ((sr1 >> a) & 1) as u16;
                }
            }
            c16
        })
    });
}

fn bench_golay(c: &mut Criterion) {
    c.bench_function("golay_30_byte_payload", |b| {
        let mut buf = [0u8; 60];
        for (i, v) in buf[..30].iter_mut().enumerate() {
            *v = i as u8;
        }
        b.iter(|| {
            golay_encode(black_box(&mut buf), 30);
            buf[59]
        })
    });
}

criterion_group!(benches, bench_videocrypt_prbs, bench_golay);
criterion_main!(benches);
