//! Spectral checks on the FM audio modulator.
//!
//! A single tone at modulation index 1.0 produces Bessel-weighted
//! sidebands: J1/J0 of the carrier within fractions of a dB.

use approx::assert_relative_eq;
use retrotx_core::dsp::FmModulator;
use rustfft::{num_complex::Complex32, FftPlanner};

const FS: usize = 1_000_000;
const N: usize = 100_000;

fn spectrum(samples: &[Complex32]) -> Vec<f32> {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(samples.len());
    let mut buf = samples.to_vec();
    fft.process(&mut buf);
    buf.iter().map(|c| c.norm()).collect()
}

#[test]
fn tone_at_index_one_matches_bessel_ratio() {
    // 1 kHz tone at full scale, peak deviation 1 kHz: beta = 1.0.
    let mut fm = FmModulator::new(100_000.0, 1_000.0, 1.0, FS as u32);

    let samples: Vec<Complex32> = (0..N)
        .map(|n| {
            let tone = (std::f64::consts::TAU * 1000.0 * n as f64 / FS as f64).sin();
            let c = fm.modulate((tone * 32767.0) as i16);
            Complex32::new(c.re as f32, c.im as f32)
        })
        .collect();

    let mag = spectrum(&samples);

    // Carrier at bin 10000, sidebands 1 kHz away at bins 9900/10100.
    let carrier = mag[10_000];
    let sb_hi = mag[10_100];
    let sb_lo = mag[9_900];

    // J1(1)/J0(1) = 0.4401/0.7652 = 0.5752; 0.5 dB is a ratio of
    // about 1.059.
    let expect = 0.5752f32;
    for sb in [sb_hi, sb_lo] {
        let ratio = sb / carrier;
        assert_relative_eq!(ratio, expect, max_relative = 0.059);
    }
}

#[test]
fn silence_leaves_a_clean_carrier() {
    let mut fm = FmModulator::new(100_000.0, 50_000.0, 1.0, FS as u32);

    let samples: Vec<Complex32> = (0..N)
        .map(|_| {
            let c = fm.modulate(0);
            Complex32::new(c.re as f32, c.im as f32)
        })
        .collect();

    let mag = spectrum(&samples);
    let carrier = mag[10_000];

    // All other bins at least 40 dB down.
    for (i, &m) in mag.iter().enumerate().take(N / 2) {
        if (i as i64 - 10_000).abs() <= 2 {
            continue;
        }
        assert!(
            m < carrier * 0.01,
            "spur at bin {i}: {:.1} dB",
            20.0 * (m / carrier).log10()
        );
    }
}

#[test]
fn deviation_scales_occupied_bandwidth() {
    let occupied = |deviation: f64| -> usize {
        let mut fm = FmModulator::new(100_000.0, deviation, 1.0, FS as u32);
        let samples: Vec<Complex32> = (0..N)
            .map(|n| {
                let tone = (std::f64::consts::TAU * 1000.0 * n as f64 / FS as f64).sin();
                let c = fm.modulate((tone * 32767.0) as i16);
                Complex32::new(c.re as f32, c.im as f32)
            })
            .collect();
        let mag = spectrum(&samples);
        let peak = mag[10_000].max(mag[10_500]);
        (0..N / 2)
            .filter(|&i| mag[i] > peak * 0.01)
            .count()
    };

    let narrow = occupied(1_000.0);
    let wide = occupied(20_000.0);
    assert!(wide > narrow * 3, "narrow {narrow} wide {wide}");
}
