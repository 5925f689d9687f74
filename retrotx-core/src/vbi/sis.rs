//! Sound-in-Syncs.
//!
//! Carries a NICAM bit-pair stream as 4-level "quit" symbols inside
//! the horizontal sync interval, rate limited by a 44/125 accumulator
//! so on average 46 of 50 bit-pairs are sent per line.

use super::data::{BitOrder, VbiLut};
use crate::audio::nicam::{NicamEncoder, NicamMode, NICAM_AUDIO_LEN, NICAM_FRAME_BITS, NICAM_FRAME_BYTES};
use crate::errors::{ConfigError, Result, TxError};
use crate::video::{EngineState, LineProcessor, LineRing};

/// Grey coding of bit pairs, alternating between two tables.
const GREY: [[u8; 4]; 2] = [[3, 0, 2, 1], [0, 3, 1, 2]];

pub struct Sis {
    lut: VbiLut,
    blank_left: usize,
    blank_win: Vec<i16>,
    blank_level: i16,

    nicam: NicamEncoder,
    frame: [u8; NICAM_FRAME_BYTES],
    frame_bit: usize,
    audio: [i16; NICAM_AUDIO_LEN * 2],
    /// Rate-limit accumulator.
    re: u32,
}

impl Sis {
    pub fn new(state: &EngineState, mode: &str) -> Result<Self> {
        if mode != "dcsis" {
            return Err(TxError::Config(ConfigError::InvalidOption {
                option: "sis",
                reason: format!("unrecognised SiS mode '{mode}'"),
            }));
        }
        if state.conf.lines != 625 {
            return Err(TxError::Config(ConfigError::UnsupportedRaster {
                feature: "sis",
                lines: state.conf.lines,
            }));
        }

        let level = state.white_level - state.black_level;
        let bwidth = state.width as f64 / 382.0;
        let lut = VbiLut::init_quits(25, state.width, level, bwidth, bwidth * 3.32);

        // The data burst sits in a blanked window at the line start.
        let pr = state.pixel_rate as f64;
        let left = 0.2e-6;
        let rise = 80e-9;
        let width = 4.56e-6;
        let blank_left = (pr * (left - rise / 2.0)).floor().max(0.0) as usize;
        let blank_width = (pr * (width + rise)).ceil() as usize;
        let blank_win = (0..blank_width)
            .map(|i| {
                let t = (blank_left + i) as f64 / pr;
                let w = if t < left {
                    (t - (left - rise)) / rise
                } else if t < left + width {
                    1.0
                } else {
                    1.0 - (t - left - width) / rise
                };
                (w.clamp(0.0, 1.0) * i16::MAX as f64) as i16
            })
            .collect();

        Ok(Self {
            lut,
            blank_left,
            blank_win,
            blank_level: state.sync_level,
            nicam: NicamEncoder::new(NicamMode::Stereo, false),
            frame: [0; NICAM_FRAME_BYTES],
            frame_bit: NICAM_FRAME_BITS,
            audio: [0; NICAM_AUDIO_LEN * 2],
            re: 0,
        })
    }

}

impl LineProcessor for Sis {
    fn name(&self) -> &'static str {
        "sis"
    }

    fn write_audio(&mut self, pcm: &[i16]) {
        let n = self.audio.len().min(pcm.len());
        self.audio[..n].copy_from_slice(&pcm[..n]);
    }

    fn process(&mut self, _state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        // Rate limit: most lines carry 50 bits, 4 are dropped when the
        // accumulator spills.
        let mut nb = 50usize;
        self.re += 44;
        if self.re >= 125 {
            nb -= 4;
            self.re -= 125;
        }

        let mut vbi = [0u8; 7];
        vbi[0] = 0xC0;

        let mut x = 2usize;
        while x < nb {
            if self.frame_bit >= NICAM_FRAME_BITS {
                self.frame = self.nicam.encode_frame(&self.audio);
                self.frame_bit = 0;
            }

            let sym =
                (self.frame[self.frame_bit >> 3] >> (6 - (self.frame_bit & 0x07))) & 0x03;
            let sym = GREY[if x & 4 != 0 { 1 } else { 0 }][sym as usize];
            vbi[x >> 3] |= sym << (6 - (x & 0x07));

            self.frame_bit += 2;
            x += 2;
        }

        let l = ring.get_mut(0);

        // Blank the sync interval under the burst.
        for (i, &w) in self.blank_win.iter().enumerate() {
            let px = self.blank_left + i;
            if px >= l.width {
                break;
            }
            let s = l.samples[px * 2] as i32;
            l.samples[px * 2] =
                (((s * (i16::MAX as i32 - w as i32)) + self.blank_level as i32 * w as i32) >> 15)
                    as i16;
        }

        self.lut
            .render(&vbi, (50 - nb) as i32, nb, BitOrder::MsbFirst, l);

        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_accumulator_drops_four_bits() {
        // 44/125: 56 of any 125 lines send the short burst.
        let mut re = 0u32;
        let mut short = 0;
        for _ in 0..125 {
            re += 44;
            if re >= 125 {
                short += 1;
                re -= 125;
            }
        }
        assert_eq!(short, 44);
        assert_eq!(re, 0);
    }

    #[test]
    fn grey_coding_is_a_permutation() {
        for t in GREY {
            let mut seen = [false; 4];
            for v in t {
                seen[v as usize] = true;
            }
            assert!(seen.iter().all(|&s| s));
        }
    }
}
