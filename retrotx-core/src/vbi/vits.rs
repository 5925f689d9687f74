//! Insertion test signals.
//!
//! Classic ITU test lines: sine-squared 2T pulse, white bar, five-riser
//! staircase and multiburst, with the colour extension lines on the
//! second field. Line positions and burst frequencies depend on the
//! raster.

use crate::config::RasterFamily;
use crate::errors::{ConfigError, Result, TxError};
use crate::video::{EngineState, Line, LineProcessor, LineRing};
use std::f64::consts::PI;

const BURSTS_625: [f64; 6] = [0.5e6, 1.0e6, 2.0e6, 4.0e6, 4.8e6, 5.8e6];
const BURSTS_525: [f64; 6] = [0.5e6, 1.0e6, 2.0e6, 3.0e6, 3.58e6, 4.2e6];

/// Sine-squared pulse centred at `position` with half-amplitude width
/// `width` seconds.
fn pulse(t: f64, position: f64, width: f64, amplitude: f64) -> f64 {
    let t = t - (position - width);
    if t <= 0.0 || t >= width * 2.0 {
        return 0.0;
    }
    (t / (width * 2.0) * PI).sin().powi(2) * amplitude
}

/// Raised-cosine edged window from `left` lasting `width` seconds.
fn window(t: f64, left: f64, width: f64, rise: f64) -> f64 {
    let edge = |x: f64| -> f64 {
        if x <= -rise {
            0.0
        } else if x >= rise {
            1.0
        } else {
            (1.0 + (PI * (x + rise) / (2.0 * rise) - PI).cos()) / 2.0
        }
    };
    edge(t - left) * (1.0 - edge(t - left - width))
}

pub struct Vits {
    /// (luma, chroma amplitude) per precomputed line.
    lines: Vec<Vec<(i16, i16)>>,
    /// Raster line numbers carrying each precomputed line.
    numbers: Vec<u32>,
}

impl Vits {
    pub fn new(state: &EngineState) -> Result<Self> {
        match state.conf.raster {
            RasterFamily::R625 => Self::build_625(state),
            RasterFamily::R525 => Self::build_525(state),
            _ => Err(TxError::Config(ConfigError::UnsupportedRaster {
                feature: "vits",
                lines: state.conf.lines,
            })),
        }
    }

    fn scale(state: &EngineState, r: f64, c: f64) -> (i16, i16) {
        let span = (state.white_level - state.blanking_level) as f64;
        (
            (r / 0.7 * span) as i16,
            (c / 0.7 * span) as i16,
        )
    }

    fn build_625(state: &EngineState) -> Result<Self> {
        let ts = 1.0 / 25.0 / 625.0;
        let h = ts / 32.0;
        let width = state.width;
        let dt = ts / width as f64;

        let mut lines = Vec::with_capacity(4);
        for i in 0..4 {
            let mut line = Vec::with_capacity(width);
            for x in 0..width {
                let t = dt * x as f64;
                let mut r = 0.0;
                let mut c = 0.0;

                match i {
                    // Line 17: bar, 2T pulse, chroma pulse, staircase.
                    0 => {
                        r += window(t, 6.0 * h, 5.0 * h, 200e-9) * 0.70;
                        r += pulse(t, 13.0 * h, 200e-9, 0.70);
                        r += pulse(t, 16.0 * h, 2000e-9, 0.35);
                        c += pulse(t, 16.0 * h, 2000e-9, 0.35);
                        for (k, step) in [0.14, 0.28, 0.42, 0.56].iter().enumerate() {
                            r += window(t, (20 + 2 * k) as f64 * h, 2.0 * h, 200e-9) * step;
                        }
                        r += window(t, 28.0 * h, 3.0 * h, 200e-9) * 0.70;
                    }
                    // Line 18: pedestal and multiburst.
                    1 => {
                        r += window(t, 6.0 * h, 25.0 * h, 200e-9) * 0.35;
                        r += window(t, 6.0 * h, 2.0 * h, 200e-9) * 0.21;
                        r += window(t, 8.0 * h, 2.0 * h, 200e-9) * -0.21;
                        for (b, f) in BURSTS_625.iter().enumerate() {
                            let left = (12 + 3 * b) as f64 * h;
                            r += window(t, left, 2.0 * h, 200e-9)
                                * 0.21
                                * ((t - left) * 2.0 * PI * f).sin();
                        }
                    }
                    // Line 330: staircase with subcarrier.
                    2 => {
                        r += window(t, 6.0 * h, 5.0 * h, 200e-9) * 0.70;
                        r += pulse(t, 13.0 * h, 200e-9, 0.70);
                        c += window(t, 15.0 * h, 15.0 * h, 1e-6) * 0.14;
                        for (k, step) in [0.14, 0.28, 0.42, 0.56].iter().enumerate() {
                            r += window(t, (20 + 2 * k) as f64 * h, 2.0 * h, 200e-9) * step;
                        }
                        r += window(t, 28.0 * h, 3.0 * h, 200e-9) * 0.70;
                    }
                    // Line 331: pedestal with two chroma packets.
                    _ => {
                        r += window(t, 6.0 * h, 25.0 * h, 200e-9) * 0.35;
                        c += window(t, 7.0 * h, 7.0 * h, 1e-6) * 0.35;
                        c += window(t, 17.0 * h, 13.0 * h, 1e-6) * 0.21;
                    }
                }

                line.push(Self::scale(state, r, c));
            }
            lines.push(line);
        }

        Ok(Self {
            lines,
            numbers: vec![17, 18, 330, 331],
        })
    }

    fn build_525(state: &EngineState) -> Result<Self> {
        let ts = 1001.0 / 30000.0 / 525.0;
        let h = ts / 32.0;
        let width = state.width;
        let dt = ts / width as f64;

        let mut lines = Vec::with_capacity(2);
        for i in 0..2 {
            let mut line = Vec::with_capacity(width);
            for x in 0..width {
                let t = dt * x as f64;
                let mut r = 0.0;
                let mut c = 0.0;

                match i {
                    // Composite test: bar, 2T, staircase.
                    0 => {
                        r += window(t, 6.0 * h, 5.0 * h, 250e-9) * 0.70;
                        r += pulse(t, 13.0 * h, 250e-9, 0.70);
                        for (k, step) in [0.14, 0.28, 0.42, 0.56, 0.70].iter().enumerate() {
                            r += window(t, (18 + 2 * k) as f64 * h, 2.0 * h, 250e-9) * step;
                        }
                    }
                    // Multiburst.
                    _ => {
                        r += window(t, 6.0 * h, 25.0 * h, 250e-9) * 0.35;
                        for (b, f) in BURSTS_525.iter().enumerate() {
                            let left = (10 + 3 * b) as f64 * h;
                            c += window(t, left, 2.0 * h, 250e-9)
                                * 0.21
                                * ((t - left) * 2.0 * PI * f).sin();
                        }
                    }
                }

                line.push(Self::scale(state, r, c));
            }
            lines.push(line);
        }

        Ok(Self {
            lines,
            numbers: vec![17, 280],
        })
    }

    fn render(&self, idx: usize, state: &EngineState, l: &mut Line) {
        let blanking = state.blanking_level;
        let period = state.chroma_lut.len();
        let phase0 = l.chroma_phase.unwrap_or(0);

        for (x, &(r, c)) in self.lines[idx].iter().enumerate() {
            let mut v = blanking as i32 + r as i32;
            if c != 0 && period > 0 {
                let lut = state.chroma_lut[(phase0 + x) % period];
                v += (c as i32 * lut.re as i32) >> 15;
            }
            l.set(x, v.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
        }
    }
}

impl LineProcessor for Vits {
    fn name(&self) -> &'static str {
        "vits"
    }

    fn process(&mut self, state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        let number = ring.get(0).number;
        if let Some(idx) = self.numbers.iter().position(|&n| n == number) {
            if !ring.get(0).vbi_allocated {
                let l = ring.get_mut(0);
                self.render(idx, state, l);
                l.vbi_allocated = true;
            }
        }
        Ok(1)
    }
}
