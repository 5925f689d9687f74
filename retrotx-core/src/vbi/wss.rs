//! Widescreen signalling (line 23).
//!
//! 14 data bits, biphase coded at 833 kbit/s behind a run-in and start
//! code. Mode `auto` switches between 4:3 and 16:9 from the source
//! pixel aspect ratio.

use super::data::{BitOrder, VbiLut};
use crate::dsp::Rational;
use crate::errors::{ConfigError, Result, TxError};
use crate::video::{EngineState, LineProcessor, LineRing};

struct WssMode {
    id: &'static str,
    code: u8,
}

const MODES: &[WssMode] = &[
    WssMode { id: "4:3", code: 0x08 },
    WssMode { id: "16:9", code: 0x07 },
    WssMode {
        id: "14:9-letterbox",
        code: 0x01,
    },
    WssMode {
        id: "16:9-letterbox",
        code: 0x04,
    },
    WssMode { id: "auto", code: 0xFF },
];

/// Write one aspect group with biphase coding: each data bit becomes
/// six sub-bits, inverting halfway.
fn group_bits(vbi: &mut [u8], mut code: u8, mut offset: usize, length: usize) -> usize {
    for _ in 0..length {
        for i in 0..6 {
            if i == 3 {
                code ^= 1;
            }
            let b = 7 - (offset % 8);
            vbi[offset / 8] &= !(1 << b);
            vbi[offset / 8] |= (code & 1) << b;
            offset += 1;
        }
        code >>= 1;
    }
    offset
}

pub struct Wss {
    lut: VbiLut,
    vbi: [u8; 18],
    code: u8,
    auto_threshold: Rational,
    blank_width: usize,
}

impl Wss {
    pub fn new(state: &EngineState, mode: &str) -> Result<Self> {
        if state.conf.lines != 625 {
            return Err(TxError::Config(ConfigError::UnsupportedRaster {
                feature: "wss",
                lines: state.conf.lines,
            }));
        }

        let m = MODES
            .iter()
            .find(|m| m.id.eq_ignore_ascii_case(mode))
            .ok_or_else(|| {
                TxError::Config(ConfigError::InvalidOption {
                    option: "wss",
                    reason: format!("unrecognised mode '{mode}'"),
                })
            })?;

        let level = ((state.white_level - state.black_level) as f64 * (5.0 / 7.0)).round() as i16;
        let lut = VbiLut::init_rc(
            137,
            state.width,
            level,
            state.width as f64 / 320.0,
            0.7,
            state.pixel_rate as f64 * 11e-6,
        );

        // Run-in and start code.
        let mut vbi = [0u8; 18];
        vbi[..7].copy_from_slice(&[0xF8, 0xE3, 0x8E, 0x38, 0xF1, 0xE0, 0xF8]);

        // Group 1: aspect ratio; groups 2-4 zero.
        let o = group_bits(&mut vbi, if m.code == 0xFF { 0x08 } else { m.code }, 29 + 24, 4);
        let o = group_bits(&mut vbi, 0x00, o, 4);
        let o = group_bits(&mut vbi, 0x00, o, 3);
        group_bits(&mut vbi, 0x00, o, 3);

        Ok(Self {
            lut,
            vbi,
            code: m.code,
            auto_threshold: Rational::new(14, 9).div(Rational::new(
                state.active_width as i64,
                state.conf.active_lines as i64,
            )),
            blank_width: (state.pixel_rate as f64 * 42.5e-6).round() as usize,
        })
    }

}

impl LineProcessor for Wss {
    fn name(&self) -> &'static str {
        "wss"
    }

    fn process(&mut self, state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        if ring.get(0).number != 23 {
            return Ok(1);
        }

        if self.code == 0xFF {
            let wide = state.source_pixel_aspect > self.auto_threshold;
            group_bits(&mut self.vbi, if wide { 0x07 } else { 0x08 }, 29 + 24, 4);
        }

        let black = state.black_level;
        let half = state.half_width;
        let blank = self.blank_width;
        let l = ring.get_mut(0);

        // The first 42.5 us must be clear of active video.
        for x in half..blank.min(l.width) {
            l.set(x, black);
        }

        self.lut.render(&self.vbi, 0, 137, BitOrder::MsbFirst, l);
        l.vbi_allocated = true;

        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_bits_biphase_inverts() {
        let mut vbi = [0u8; 18];
        group_bits(&mut vbi, 0x01, 0, 1);
        // Bit 1: 111 000 pattern (code 1 then inverted 0).
        assert_eq!(vbi[0] >> 2, 0b111000 >> 0);
    }

    #[test]
    fn run_in_fixed_bytes() {
        // The run-in must be untouched by group encoding.
        let mut vbi = [0u8; 18];
        vbi[..7].copy_from_slice(&[0xF8, 0xE3, 0x8E, 0x38, 0xF1, 0xE0, 0xF8]);
        group_bits(&mut vbi, 0x08, 29 + 24, 4);
        assert_eq!(&vbi[..6], &[0xF8, 0xE3, 0x8E, 0x38, 0xF1, 0xE0]);
    }

    #[test]
    fn unknown_mode_rejected() {
        assert!(MODES.iter().all(|m| m.id != "21:9"));
    }
}
