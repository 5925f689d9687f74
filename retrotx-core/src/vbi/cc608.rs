//! EIA-608 closed captions.
//!
//! Two odd-parity bytes per field behind a 7-cycle clock run-in,
//! rendered on line 21 (525) or line 22 (625).

use super::data::{BitOrder, VbiLut};
use crate::config::RasterFamily;
use crate::errors::{ConfigError, Result, TxError};
use crate::video::{EngineState, LineProcessor, LineRing};
use std::f64::consts::PI;

/// Frame a caption byte pair: odd parity, start bit, 17 bits total.
fn encode_pair(c1: u8, c2: u8) -> [u8; 3] {
    let parity = |mut c: u8| -> u8 {
        c &= 0x7F;
        c | (((c.count_ones() + 1) & 1) as u8) << 7
    };
    let c1 = parity(c1);
    let c2 = parity(c2);

    [
        (c1 << 1) | 0x01,
        (c2 << 1) | (c1 >> 7),
        c2 >> 7,
    ]
}

pub struct Cc608 {
    lut: VbiLut,
    line: u32,
    cri: Vec<i16>,
    cri_x: usize,
    /// Caption bytes waiting to be sent, consumed two per frame.
    queue: Vec<u8>,
    demo: Vec<u8>,
}

impl Cc608 {
    pub fn new(state: &EngineState) -> Result<Self> {
        let (line, offset) = match state.conf.raster {
            RasterFamily::R525 => (21u32, 27.382e-6),
            RasterFamily::R625 => (22, 27.5e-6),
            _ => {
                return Err(TxError::Config(ConfigError::UnsupportedRaster {
                    feature: "cc608",
                    lines: state.conf.lines,
                }))
            }
        };

        let level = ((state.white_level - state.black_level) as f64 * 0.5).round() as i16;
        let lut = VbiLut::init_step(
            32,
            state.width,
            level,
            state.width as f64 / 32.0,
            state.pixel_rate as f64 * 240e-9,
            state.pixel_rate as f64 * offset,
        );

        // 7 cycles of the 0.5035 MHz clock run-in before the start
        // bit.
        let w = state.width as f64 * 7.0 / 32.0;
        let x0 = state.pixel_rate as f64 * offset - state.width as f64 * 8.75 / 32.0;
        let cri_len = w.ceil() as usize;
        let cri = (0..cri_len)
            .map(|i| ((0.5 - (i as f64 * 2.0 * PI / w * 7.0).cos() * 0.5) * level as f64) as i16)
            .collect();

        let demo: Vec<u8> = [
            0x14, 0x27, 0x14, 0x27, // roll-up 4 rows
            0x14, 0x2D, 0x14, 0x2D, // carriage return
            0x14, 0x70, 0x14, 0x70, // row 15, indent 0
        ]
        .into_iter()
        .chain(b"CAPTION TEST".iter().copied())
        .collect();

        Ok(Self {
            lut,
            line,
            cri,
            cri_x: x0.max(0.0) as usize,
            queue: Vec::new(),
            demo,
        })
    }

    /// Queue caption control codes or text for transmission.
    pub fn push(&mut self, bytes: &[u8]) {
        self.queue.extend_from_slice(bytes);
    }
}

impl LineProcessor for Cc608 {
    fn name(&self) -> &'static str {
        "cc608"
    }

    fn process(&mut self, _state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        let (frame, number) = {
            let l = ring.get(0);
            (l.frame, l.number)
        };
        if number != self.line {
            return Ok(1);
        }

        // Replay the demo message every 150 frames when idle.
        if self.queue.is_empty() && frame % 150 == 0 {
            let demo = self.demo.clone();
            self.queue.extend_from_slice(&demo);
        }

        let c1 = if self.queue.is_empty() {
            0
        } else {
            self.queue.remove(0)
        };
        let c2 = if self.queue.is_empty() {
            0
        } else {
            self.queue.remove(0)
        };

        let data = encode_pair(c1, c2);
        let l = ring.get_mut(0);

        for (i, &v) in self.cri.iter().enumerate() {
            let x = self.cri_x + i;
            if x >= l.width {
                break;
            }
            let s = l.samples[x * 2] as i32 + v as i32;
            l.samples[x * 2] = s.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }

        self.lut.render(&data, 0, 17, BitOrder::LsbFirst, l);
        l.vbi_allocated = true;

        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_bit_makes_odd() {
        let [b0, b1, _] = encode_pair(0x41, 0x42);
        // Start bit present.
        assert_eq!(b0 & 1, 1);
        let c1 = b0 >> 1 | (b1 & 1) << 7;
        assert_eq!(c1.count_ones() % 2, 1);
    }

    #[test]
    fn null_pair_still_frames() {
        let [b0, _, _] = encode_pair(0, 0);
        assert_eq!(b0 & 1, 1);
    }
}
