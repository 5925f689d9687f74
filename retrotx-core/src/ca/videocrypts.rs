//! Videocrypt S encoder.
//!
//! Line shuffling within 47-line blocks. Each active field is six
//! blocks; a block's lines are permuted by a fresh shuffle and written
//! one block later, so the processor runs over a 125-line delay
//! window. The VBI data shares the Videocrypt packet format at a
//! higher bit rate inside the active picture area.

use crate::errors::{ConfigError, Result, TxError};
use crate::video::{EngineState, LineProcessor, LineRing};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Reference rate: four times the PAL subcarrier.
const VCS_SAMPLE_RATE: f64 = 17_734_475.0;
const VCS_WIDTH: usize = 1135;
const VCS_VBI_LEFT: usize = 211;
const VCS_VBI_SAMPLES_PER_BIT: usize = 22;
const VCS_VBI_BITS_PER_LINE: usize = 40;

const VBI_FIELD_1_START: u32 = 24;
const VBI_FIELD_2_START: u32 = 336;
const VBI_LINES_PER_FIELD: u32 = 4;

/// The scrambler needs to reach any line of the following block,
/// which may sit in the next field.
pub const VCS_DELAY_LINES: usize = 125;

/// First line of each 47-line block.
const BLOCK_START: [u32; 12] = [28, 75, 122, 169, 216, 263, 340, 387, 434, 481, 528, 575];

/// Header synchronisation sequence.
const SEQUENCE: [u8; 8] = [0x81, 0x92, 0xA3, 0xB4, 0xC5, 0xD6, 0xE7, 0xF0];

const HAMMING: [u8; 16] = [
    0x15, 0x02, 0x49, 0x5E, 0x64, 0x73, 0x38, 0x2F, 0xD0, 0xC7, 0x8C, 0x9B, 0xA1, 0xB6, 0xFD,
    0xEA,
];

fn reverse8(mut b: u8) -> u8 {
    b = (b & 0xF0) >> 4 | (b & 0x0F) << 4;
    b = (b & 0xCC) >> 2 | (b & 0x33) << 2;
    b = (b & 0xAA) >> 1 | (b & 0x55) << 1;
    b
}

fn rnibble(a: u8) -> u8 {
    (a >> 4) | (a << 4)
}

fn interleave(frame: &mut [u8; 40]) {
    const OFFSETS: [usize; 6] = [0, 6, 12, 20, 26, 32];
    for &off in &OFFSETS {
        let s = &mut frame[off..off + 8];
        s[0] = reverse8(s[0]);
        s[7] = reverse8(s[7]);

        let mut r = [0u8; 8];
        for (i, rv) in r.iter_mut().enumerate() {
            let m = 0x80u8 >> i;
            for (j, &sv) in s.iter().enumerate() {
                *rv |= ((sv & m != 0) as u8) << j;
            }
        }
        s.copy_from_slice(&r);
    }
}

fn encode_vbi(data: &[u8], a: u8, b: u8) -> [u8; 40] {
    let mut vbi = [0u8; 40];

    vbi[0] = a;
    vbi[9] = a;
    vbi[10] = b;
    vbi[19] = b;

    for x in 0..8 {
        vbi[1 + x] = data[x];
        vbi[9] = vbi[9].wrapping_add(data[x]);
        vbi[11 + x] = data[8 + x];
        vbi[19] = vbi[19].wrapping_add(data[8 + x]);
    }

    for x in (0..20).rev() {
        vbi[x * 2 + 1] = HAMMING[(vbi[x] & 0x0F) as usize];
        vbi[x * 2] = HAMMING[(vbi[x] >> 4) as usize];
    }

    interleave(&mut vbi);
    vbi
}

pub struct VideocryptS {
    rng: ChaCha8Rng,
    mode: u8,
    counter: u8,
    message: [u8; 32],
    vbi: [u8; 40],
    /// Current block permutation: source line for each block line.
    block: [usize; 47],
    video_scale: Vec<usize>,
    active_lines: u32,
    warmup: usize,
}

impl VideocryptS {
    pub fn new(state: &EngineState, mode: &str) -> Result<Self> {
        if state.conf.lines != 625 {
            return Err(TxError::Config(ConfigError::UnsupportedRaster {
                feature: "videocrypt-s",
                lines: state.conf.lines,
            }));
        }
        if mode != "free" {
            return Err(TxError::Config(ConfigError::InvalidOption {
                option: "videocrypts",
                reason: format!("unrecognised mode '{mode}'"),
            }));
        }

        let f = state.width as f64 / VCS_WIDTH as f64;
        let video_scale = (0..VCS_WIDTH).map(|x| (x as f64 * f).round() as usize).collect();

        let mut block = [0usize; 47];
        for (i, b) in block.iter_mut().enumerate() {
            *b = i;
        }

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
            mode: 0x00,
            counter: 0,
            message: [0; 32],
            vbi: [0; 40],
            block,
            video_scale,
            active_lines: state.conf.lines,
            warmup: 0,
        })
    }

    fn block_shuffle(&mut self) {
        for (i, b) in self.block.iter_mut().enumerate() {
            *b = i;
        }
        self.block.shuffle(&mut self.rng);
    }

    /// Which delayed line feeds the line about to be transmitted, as
    /// an offset further back in the window, or 0 for no swap.
    fn shuffle_offset(&mut self, line: u32, total_lines: u32) -> usize {
        let in_field = (28..=309).contains(&line) || (340..=621).contains(&line);
        if !in_field {
            return 0;
        }

        // Line index 0-281 top field, 282-563 bottom field.
        let x = line - if line < 340 { 28 } else { 340 - 282 };
        let block = (x / 47) as usize;
        let bline = (x % 47) as usize;

        if bline == 0 {
            self.block_shuffle();
        }

        // Source comes from the next block, permuted.
        let block = (block + 1) % 12;
        let bline = self.block[bline];

        let target = BLOCK_START[block] + bline as u32;
        let mut j = target as i64 - line as i64;
        if j < 0 {
            j += total_lines as i64 - 1;
        }
        j as usize
    }
}

impl LineProcessor for VideocryptS {
    fn name(&self) -> &'static str {
        "videocrypt-s"
    }

    fn window(&self) -> usize {
        VCS_DELAY_LINES + 1
    }

    fn process(&mut self, state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        // Operate on the delayed line at this processor's window tail.
        let out_off = VCS_DELAY_LINES;
        if self.warmup < out_off {
            self.warmup += 1;
            return Ok(1);
        }
        let number = ring.get(out_off).number;

        if number == 1 {
            // The active message is updated every 2nd frame; free
            // access transmits zeros.
            if self.counter & 1 == 0 {
                self.message = [0u8; 32];
                let crc: u8 = self.message[..31].iter().fold(0, |a, &b| a.wrapping_add(b));
                self.message[31] = (!crc).wrapping_add(1);

                self.vbi = encode_vbi(
                    &self.message[..16],
                    SEQUENCE[((self.counter >> 1) & 7) as usize],
                    self.counter,
                );
            } else {
                self.vbi = encode_vbi(
                    &self.message[16..],
                    rnibble(SEQUENCE[((self.counter >> 1) & 7) as usize]),
                    if self.counter & 0x08 != 0 { 0x00 } else { self.mode },
                );
            }
            self.counter = self.counter.wrapping_add(1);
        }

        // Swap in the permuted source line.
        let j = self.shuffle_offset(number, self.active_lines);
        if j > 0 && j <= out_off {
            let left = state.active_left;
            let width = state.width;
            let (dst, src) = ring.pair_mut(out_off, out_off - j);
            for x in left..width {
                dst.samples[x * 2] = src.samples[x * 2];
            }
        }

        // VBI lines sit inside the active picture area.
        let vbi_line = if (VBI_FIELD_1_START..VBI_FIELD_1_START + VBI_LINES_PER_FIELD)
            .contains(&number)
        {
            Some(number - VBI_FIELD_1_START)
        } else if (VBI_FIELD_2_START..VBI_FIELD_2_START + VBI_LINES_PER_FIELD).contains(&number) {
            Some(number - VBI_FIELD_2_START + VBI_LINES_PER_FIELD)
        } else {
            None
        };

        if let Some(i) = vbi_line {
            let bline = &self.vbi[i as usize * 5..i as usize * 5 + 5];
            let black = state.black_level;
            let white = state.white_level;
            let left = state.active_left;
            let aw = state.active_width;
            let l = ring.get_mut(out_off);

            for x in left..(left + aw).min(l.width) {
                l.samples[x * 2] = black;
            }

            let mut x = self.video_scale[VCS_VBI_LEFT];
            for b in 0..VCS_VBI_BITS_PER_LINE {
                let c = (bline[b / 8] >> (b % 8)) & 1;
                let level = if c != 0 { white } else { black };
                let end = self.video_scale
                    [(VCS_VBI_LEFT + VCS_VBI_SAMPLES_PER_BIT * (b + 1)).min(VCS_WIDTH - 1)];
                while x < end && x < l.width {
                    l.samples[x * 2] = level;
                    x += 1;
                }
            }
            l.vbi_allocated = true;
        }

        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_starts_cover_both_fields() {
        assert_eq!(BLOCK_START.len(), 12);
        for w in BLOCK_START.windows(2) {
            let gap = w[1] as i64 - w[0] as i64;
            assert!(gap == 47 || gap == 77, "gap {gap}");
        }
    }

    #[test]
    fn shuffle_is_permutation() {
        let mut vcs = VideocryptS {
            rng: ChaCha8Rng::seed_from_u64(7),
            mode: 0,
            counter: 0,
            message: [0; 32],
            vbi: [0; 40],
            block: [0; 47],
            video_scale: (0..VCS_WIDTH).collect(),
            active_lines: 625,
            warmup: 0,
        };
        vcs.block_shuffle();
        let mut seen = [false; 47];
        for &b in &vcs.block {
            seen[b] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn offsets_stay_inside_delay_window() {
        let mut vcs = VideocryptS {
            rng: ChaCha8Rng::seed_from_u64(1),
            mode: 0,
            counter: 0,
            message: [0; 32],
            vbi: [0; 40],
            block: [0; 47],
            video_scale: (0..VCS_WIDTH).collect(),
            active_lines: 625,
            warmup: 0,
        };
        for line in 1..=625u32 {
            let j = vcs.shuffle_offset(line, 625);
            assert!(j <= VCS_DELAY_LINES, "line {line}: offset {j}");
        }
    }
}
