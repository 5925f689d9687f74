//! Windowed-sinc FIR filters on the int16 signal path.
//!
//! The polyphase form covers rational resampling (interpolation L,
//! decimation M); the complex variant carries separate I and Q tap
//! sets for asymmetric (vestigial) passbands.

use super::rational::Rational;
use ndarray::Array2;
use num_complex::Complex;
use std::f64::consts::PI;

fn hamming(n: usize, ntaps: usize) -> f64 {
    0.54 - 0.46 * (2.0 * PI * n as f64 / (ntaps - 1) as f64).cos()
}

/// Windowed-sinc low-pass prototype.
pub fn low_pass_taps(
    ntaps: usize,
    sample_rate: f64,
    cutoff: f64,
    width: f64,
    gain: f64,
) -> Vec<f64> {
    // Transition width steers the window only through the tap count the
    // caller chose; it is kept in the signature to make call sites
    // self-documenting.
    let _ = width;
    let mid = (ntaps - 1) as f64 / 2.0;
    let fc = cutoff / sample_rate;

    let mut taps: Vec<f64> = (0..ntaps)
        .map(|n| {
            let t = n as f64 - mid;
            let s = if t.abs() < 1e-12 {
                2.0 * fc
            } else {
                (2.0 * PI * fc * t).sin() / (PI * t)
            };
            s * hamming(n, ntaps)
        })
        .collect();

    let sum: f64 = taps.iter().sum();
    for t in &mut taps {
        *t *= gain / sum;
    }

    taps
}

/// Complex band-pass prototype: a low-pass of half the passband width
/// shifted to the passband centre. Returns (I taps, Q taps).
pub fn complex_band_pass_taps(
    ntaps: usize,
    sample_rate: f64,
    low_cutoff: f64,
    high_cutoff: f64,
    width: f64,
    gain: f64,
) -> (Vec<f64>, Vec<f64>) {
    let proto = low_pass_taps(
        ntaps,
        sample_rate,
        (high_cutoff - low_cutoff) / 2.0,
        width,
        gain,
    );
    let centre = (low_cutoff + high_cutoff) / 2.0;
    let mid = (ntaps - 1) as f64 / 2.0;

    let mut itaps = Vec::with_capacity(ntaps);
    let mut qtaps = Vec::with_capacity(ntaps);
    for (n, t) in proto.iter().enumerate() {
        let ph = 2.0 * PI * centre / sample_rate * (n as f64 - mid);
        itaps.push(t * ph.cos() * 2.0);
        qtaps.push(t * ph.sin() * 2.0);
    }

    (itaps, qtaps)
}

fn quantise(taps: &[f64]) -> Vec<i32> {
    taps.iter().map(|t| (t * 32767.0).round() as i32).collect()
}

/// Polyphase int16 FIR with rational rate conversion.
pub struct FirInt16 {
    interpolation: usize,
    decimation: usize,
    // One row of taps per output phase.
    bank: Array2<i32>,
    ataps: usize,
    win: Vec<i16>,
    pos: usize,
    // Input phase accumulator for decimation.
    d: usize,
}

impl FirInt16 {
    pub fn new(taps: &[f64], interpolation: usize, decimation: usize) -> Self {
        let q = quantise(taps);
        let ataps = (q.len() + interpolation - 1) / interpolation;
        let mut bank = Array2::zeros((interpolation, ataps));

        // Phase p takes taps p, p+L, p+2L, ... reversed for the
        // convolution order used in process().
        for p in 0..interpolation {
            for (k, t) in q.iter().skip(p).step_by(interpolation).enumerate() {
                bank[(p, k)] = *t * interpolation as i32;
            }
        }

        Self {
            interpolation,
            decimation,
            bank,
            ataps,
            win: vec![0; ataps],
            pos: 0,
            d: 0,
        }
    }

    /// Filter designed for an exact rational rate change.
    pub fn resampler(in_rate: Rational, out_rate: Rational) -> Self {
        let ratio = out_rate.div(in_rate).reduce();
        let interpolation = ratio.num.unsigned_abs() as usize;
        let decimation = ratio.den.unsigned_abs() as usize;

        let in_hz = in_rate.to_f64();
        let out_hz = out_rate.to_f64();
        let low = in_hz.min(out_hz);

        // Transition band sized against the slower rate.
        let taps = low_pass_taps(
            21 * interpolation | 1,
            in_hz * interpolation as f64,
            low * 0.45,
            low * 0.10,
            1.0,
        );

        Self::new(&taps, interpolation, decimation)
    }

    #[inline]
    fn push(&mut self, s: i16) {
        self.pos = if self.pos == 0 {
            self.ataps - 1
        } else {
            self.pos - 1
        };
        self.win[self.pos] = s;
    }

    #[inline]
    fn dot(&self, phase: usize) -> i16 {
        let mut acc: i64 = 0;
        for k in 0..self.ataps {
            let s = self.win[(self.pos + k) % self.ataps];
            acc += s as i64 * self.bank[(phase, k)] as i64;
        }
        (acc >> 15).clamp(i16::MIN as i64, i16::MAX as i64) as i16
    }

    /// Process `input`, appending output samples. At most
    /// `len * L / M + 1` samples are produced.
    pub fn process(&mut self, input: &[i16], output: &mut Vec<i16>) {
        for &s in input {
            self.push(s);
            while self.d < self.interpolation {
                output.push(self.dot(self.d));
                self.d += self.decimation;
            }
            self.d -= self.interpolation;
        }
    }

    /// In-place filtering of every `step`-th sample of a buffer, used
    /// on the interleaved (luma, chroma) line layout. Only valid for
    /// 1:1 rates.
    pub fn process_inplace(&mut self, buf: &mut [i16], step: usize) {
        debug_assert_eq!(self.interpolation, 1);
        debug_assert_eq!(self.decimation, 1);
        let mut i = 0;
        while i < buf.len() {
            self.push(buf[i]);
            buf[i] = self.dot(0);
            i += step;
        }
    }

    pub fn ratio(&self) -> (usize, usize) {
        (self.interpolation, self.decimation)
    }
}

/// Complex FIR over interleaved int16 IQ, with independent I/Q taps.
pub struct FirComplex {
    itaps: Vec<i32>,
    qtaps: Vec<i32>,
    win: Vec<Complex<i32>>,
    pos: usize,
}

impl FirComplex {
    pub fn new(itaps: &[f64], qtaps: &[f64]) -> Self {
        assert_eq!(itaps.len(), qtaps.len());
        Self {
            itaps: quantise(itaps),
            qtaps: quantise(qtaps),
            win: vec![Complex::new(0, 0); itaps.len()],
            pos: 0,
        }
    }

    pub fn band_pass(
        ntaps: usize,
        sample_rate: f64,
        low_cutoff: f64,
        high_cutoff: f64,
        width: f64,
    ) -> Self {
        let (i, q) = complex_band_pass_taps(ntaps, sample_rate, low_cutoff, high_cutoff, width, 1.0);
        Self::new(&i, &q)
    }

    #[inline]
    pub fn filter(&mut self, sample: Complex<i32>) -> Complex<i32> {
        let n = self.win.len();
        self.pos = if self.pos == 0 { n - 1 } else { self.pos - 1 };
        self.win[self.pos] = sample;

        let mut re: i64 = 0;
        let mut im: i64 = 0;
        for k in 0..n {
            let s = self.win[(self.pos + k) % n];
            let it = self.itaps[k] as i64;
            let qt = self.qtaps[k] as i64;
            re += s.re as i64 * it - s.im as i64 * qt;
            im += s.re as i64 * qt + s.im as i64 * it;
        }

        Complex::new((re >> 15) as i32, (im >> 15) as i32)
    }

    /// Filter an interleaved int16 IQ buffer in place.
    pub fn process_iq(&mut self, buf: &mut [i16]) {
        for iq in buf.chunks_exact_mut(2) {
            let out = self.filter(Complex::new(iq[0] as i32, iq[1] as i32));
            iq[0] = out.re.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            iq[1] = out.im.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }
    }
}

/// int32 FIR used where the accumulator headroom of the mux path
/// matters.
pub struct FirInt32 {
    taps: Vec<i64>,
    win: Vec<i32>,
    pos: usize,
}

impl FirInt32 {
    pub fn new(taps: &[f64]) -> Self {
        Self {
            taps: taps.iter().map(|t| (t * 32767.0).round() as i64).collect(),
            win: vec![0; taps.len()],
            pos: 0,
        }
    }

    #[inline]
    pub fn filter(&mut self, sample: i32) -> i32 {
        let n = self.win.len();
        self.pos = if self.pos == 0 { n - 1 } else { self.pos - 1 };
        self.win[self.pos] = sample;

        let mut acc: i64 = 0;
        for k in 0..n {
            acc += self.win[(self.pos + k) % n] as i64 * self.taps[k];
        }
        (acc >> 15) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_pass_unity_dc_gain() {
        let taps = low_pass_taps(51, 48000.0, 4000.0, 1000.0, 1.0);
        let sum: f64 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn low_pass_attenuates_stopband() {
        let taps = low_pass_taps(101, 48000.0, 2000.0, 500.0, 1.0);
        let mut fir = FirInt16::new(&taps, 1, 1);
        // 12 kHz tone, well inside the stopband.
        let input: Vec<i16> = (0..4800)
            .map(|n| ((2.0 * PI * 12000.0 * n as f64 / 48000.0).sin() * 20000.0) as i16)
            .collect();
        let mut out = Vec::new();
        fir.process(&input, &mut out);
        let peak = out[200..].iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak < 1000, "stopband peak {peak}");
    }

    #[test]
    fn resampler_ratio_and_output_count() {
        let fir = FirInt16::resampler(Rational::new(32000, 1), Rational::new(48000, 1));
        assert_eq!(fir.ratio(), (3, 2));

        let mut fir = FirInt16::resampler(Rational::new(32000, 1), Rational::new(48000, 1));
        let input = vec![0i16; 3200];
        let mut out = Vec::new();
        fir.process(&input, &mut out);
        assert!((out.len() as i64 - 4800).abs() <= 3, "{} samples", out.len());
    }

    #[test]
    fn int32_filter_tracks_int16_design() {
        let taps = low_pass_taps(31, 48000.0, 8000.0, 2000.0, 1.0);
        let mut f32_ = FirInt32::new(&taps);
        // DC gain of unity within quantisation.
        let mut y = 0;
        for _ in 0..100 {
            y = f32_.filter(10000);
        }
        assert!((y - 10000).abs() < 100, "dc gain {y}");
    }

    #[test]
    fn complex_band_pass_passes_centre() {
        let mut fir = FirComplex::band_pass(129, 48000.0, 5000.0, 7000.0, 500.0);
        let mut buf: Vec<i16> = Vec::new();
        for n in 0..4800 {
            let ph = 2.0 * PI * 6000.0 * n as f64 / 48000.0;
            buf.push((ph.cos() * 16000.0) as i16);
            buf.push((ph.sin() * 16000.0) as i16);
        }
        fir.process_iq(&mut buf);
        let peak = buf[1000..].iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 8000, "passband peak {peak}");
    }
}
