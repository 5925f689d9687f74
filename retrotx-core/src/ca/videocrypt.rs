//! Videocrypt I / II encoder.
//!
//! Line cut-and-rotate driven by a pair of feedback shift registers
//! seeded from the active control word each frame, with Hamming-coded
//! and interleaved VBI packets carrying the card messages.

use super::videocrypt_keys as keys;
use crate::errors::{ConfigError, Result, TxError};
use crate::vbi::{BitOrder, VbiLut};
use crate::video::{EngineState, LineProcessor, LineRing};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Free-access control word.
pub const CW_FA: u64 = 0xEB64C7D9823D9F3F;

const SR1_TAPS: u32 = 0x7BB88888;
const SR2_TAPS: u32 = 0x17A2C100;
const SR1_MASK: u32 = 0x7FFFFFFF;
const SR2_MASK: u32 = 0x1FFFFFFF;
const CW_MASK: u64 = 0x0FFF_FFFF_FFFF_FFFF;

/// Reference sample rate the cut points are defined against.
const VC_SAMPLE_RATE: f64 = 14_000_000.0;
const VC_WIDTH: usize = 896;
const VC_LEFT: usize = 120;
const VC_RIGHT: usize = VC_LEFT + 710;
const VC_OVERLAP: usize = 15;

const FIELD_1_START: u32 = 24;
const FIELD_2_START: u32 = 336;
const LINES_PER_FIELD: u32 = 287;

const VBI_LINES_PER_FIELD: u32 = 4;
const VC1_VBI_FIELD_1_START: u32 = 12;
const VC1_VBI_FIELD_2_START: u32 = 325;
const VC2_VBI_FIELD_1_START: u32 = 14;
const VC2_VBI_FIELD_2_START: u32 = 327;

/// Packet header sequences.
const SEQUENCE1: [u8; 8] = [0x87, 0x96, 0xA5, 0xB4, 0xC3, 0xD2, 0xE1, 0x87];
const SEQUENCE2: [u8; 8] = [0x80, 0x91, 0xA2, 0xB3, 0xC4, 0xD5, 0xE6, 0xF7];

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

fn rev(mut b: u64, n: u32) -> u64 {
    let mut r = 0u64;
    for _ in 0..n {
        r = (r << 1) | (b & 1);
        b >>= 1;
    }
    r
}

fn rnibble(a: u8) -> u8 {
    (a >> 4) | (a << 4)
}

/// Initialisation word: the frame counter replicated eight times with
/// alternating inversion, mixed into the control word.
fn generate_iw(cw: u64, fcnt: u8) -> u64 {
    let mut iw: u64 = (((fcnt ^ 0xFF) as u64) << 8) | fcnt as u64;
    iw |= (iw << 16) | (iw << 32) | (iw << 48);
    (iw ^ cw) & CW_MASK
}

/// 6-group, 8-byte transposition with the outer bytes bit-reversed.
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

/// Hamming-code one 16-byte half-message plus the two information
/// bytes and running checksums into a 40-byte VBI frame.
fn encode_vbi(data: &[u8], a: u8, b: u8) -> [u8; 40] {
    let mut vbi = [0u8; 40];

    let mut crc = a;
    vbi[0] = a;
    for x in 0..8 {
        vbi[1 + x] = data[x];
        crc = crc.wrapping_add(data[x]);
    }
    vbi[9] = crc;

    let mut crc = b;
    vbi[10] = b;
    for x in 0..8 {
        vbi[11 + x] = data[8 + x];
        crc = crc.wrapping_add(data[8 + x]);
    }
    vbi[19] = crc;

    for x in (0..20).rev() {
        vbi[x * 2 + 1] = HAMMING[(vbi[x] & 0x0F) as usize];
        vbi[x * 2] = HAMMING[(vbi[x] >> 4) as usize];
    }

    interleave(&mut vbi);
    vbi
}

/// Videocrypt I operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vc1Mode {
    Free,
    Conditional,
    Sky07,
    Sky09,
    Tac1,
    Tac2,
    Xtea,
    Ppv,
}

impl Vc1Mode {
    pub fn from_id(id: &str) -> Result<Self> {
        Ok(match id {
            "free" => Self::Free,
            "conditional" => Self::Conditional,
            "sky07" => Self::Sky07,
            "sky09" => Self::Sky09,
            "tac1" => Self::Tac1,
            "tac2" => Self::Tac2,
            "xtea" => Self::Xtea,
            "ppv" => Self::Ppv,
            _ => {
                return Err(TxError::Config(ConfigError::InvalidOption {
                    option: "videocrypt",
                    reason: format!("unrecognised mode '{id}'"),
                }))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vc2Mode {
    Free,
    Conditional,
}

impl Vc2Mode {
    pub fn from_id(id: &str) -> Result<Self> {
        Ok(match id {
            "free" => Self::Free,
            "conditional" => Self::Conditional,
            _ => {
                return Err(TxError::Config(ConfigError::InvalidOption {
                    option: "videocrypt2",
                    reason: format!("unrecognised mode '{id}'"),
                }))
            }
        })
    }
}

/// One message block: a mode byte, the control word its seed message
/// produces, and up to seven 32-byte card messages (the eighth slot
/// repeats the first).
#[derive(Debug, Clone)]
struct Block {
    mode: u8,
    codeword: u64,
    messages: [[u8; 32]; 7],
}

impl Block {
    fn zeroed(mode: u8, codeword: u64) -> Self {
        Self {
            mode,
            codeword,
            messages: [[0u8; 32]; 7],
        }
    }
}

/// The MTV sample conditional-access blocks; require an active Sky 07
/// card.
fn mtv_blocks() -> Vec<Block> {
    let mut b0 = Block::zeroed(0x07, 0x0B2DD55A7BCE178E);
    b0.messages[0][0] = 0x20;
    b0.messages[6][..31].copy_from_slice(&[
        0xF8, 0x19, 0x10, 0x83, 0x20, 0x85, 0x60, 0xAF, 0x8F, 0xF0, 0x49, 0x34, 0x86, 0xC4,
        0x6A, 0xCA, 0xC3, 0x21, 0x4D, 0x44, 0xB3, 0x24, 0x36, 0x57, 0xEC, 0xA7, 0xCE, 0x12,
        0x38, 0x91, 0x3E,
    ]);

    let mut b1 = Block::zeroed(0x07, 0x0F9885DA50770B80);
    b1.messages[0][..12].copy_from_slice(&[
        0x20, 0x00, 0x69, 0x20, 0x20, 0x20, 0x48, 0x41, 0x43, 0x4B, 0x54, 0x56,
    ]);
    b1.messages[6][..31].copy_from_slice(&[
        0xF8, 0x19, 0x10, 0x83, 0x20, 0xD1, 0xB5, 0xA9, 0x1F, 0x82, 0xFE, 0xB3, 0x6B, 0x0A,
        0x82, 0xC3, 0x30, 0x7B, 0x65, 0x9C, 0xF2, 0xBD, 0x5C, 0xB0, 0x6A, 0x3B, 0x64, 0x0F,
        0xA2, 0x66, 0xBB,
    ]);

    vec![b0, b1]
}

/// Seed message template for the kernel modes.
fn seed_template(cmd: u8) -> [u8; 32] {
    let mut m = [0u8; 32];
    m[..5].copy_from_slice(&[cmd, 0x19, 0x10, 0x83, 0x20]);
    m
}

pub struct Videocrypt {
    rng: ChaCha8Rng,

    counter: u8,
    /// Clear until the first frame update has run; frame 0 transmits
    /// the idle VBI filler.
    primed: bool,
    cw: u64,
    sr1: u32,
    sr2: u32,
    c: u16,

    mode1: Option<Vc1Mode>,
    blocks: Vec<Block>,
    block: usize,
    message: [u8; 32],
    /// 40 bytes: five per VBI line across both fields.
    vbi: [u8; 40],

    mode2: Option<Vc2Mode>,
    blocks2: Vec<Block>,
    block2: usize,
    message2: [u8; 32],
    vbi2: [u8; 40],

    lut: VbiLut,
    video_scale: Vec<usize>,
    warmup: usize,
}

impl Videocrypt {
    pub fn new(state: &EngineState, mode1: Option<Vc1Mode>, mode2: Option<Vc2Mode>) -> Result<Self> {
        if state.conf.lines != 625 {
            return Err(TxError::Config(ConfigError::UnsupportedRaster {
                feature: "videocrypt",
                lines: state.conf.lines,
            }));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(rand::random());

        // 40 bits per VBI line at 18 samples per bit (14 MHz).
        let level = state.white_level - state.black_level;
        let lut = VbiLut::init_step(
            40,
            state.width,
            level,
            state.pixel_rate as f64 / VC_SAMPLE_RATE * 18.0,
            state.pixel_rate as f64 * 375e-9,
            state.pixel_rate as f64 * 10.86e-6,
        );

        // Videocrypt timings are taken from the centre of the hsync
        // pulse at the 14 MHz reference rate.
        let f = state.width as f64 / VC_WIDTH as f64;
        let l = VC_SAMPLE_RATE * state.conf.hsync_width / 2.0;
        let video_scale = (0..VC_WIDTH + VC_OVERLAP + 1)
            .map(|x| ((l + x as f64) * f).round() as usize)
            .collect();

        let blocks = match mode1 {
            None => Vec::new(),
            Some(Vc1Mode::Free) => vec![Block::zeroed(0x05, CW_FA)],
            Some(Vc1Mode::Conditional) => mtv_blocks(),
            Some(m) => {
                let mut b = Block::zeroed(0x07, CW_FA);
                b.messages[5] = seed_template(if m == Vc1Mode::Sky09 { 0xF9 } else { 0xF8 });
                let mut blocks = vec![b];
                Self::reseed_vc1(&mut rng, m, &mut blocks[0]);
                blocks
            }
        };

        let blocks2 = match mode2 {
            None => Vec::new(),
            Some(Vc2Mode::Free) => vec![Block::zeroed(0x9C, CW_FA)],
            Some(Vc2Mode::Conditional) => {
                let mut b = Block::zeroed(0x9C, CW_FA);
                b.messages[5] = seed_template(0xF8);
                let mut blocks = vec![b];
                Self::reseed_vc2(&mut rng, &mut blocks[0]);
                blocks
            }
        };

        Ok(Self {
            rng,
            counter: 0,
            primed: false,
            cw: CW_FA,
            sr1: 0,
            sr2: 0,
            // The code register opens at 0xBC00: the first scrambled
            // line of a stream cuts at 0xBC before any bits have been
            // clocked.
            c: 0xBC00,
            mode1,
            blocks,
            block: 0,
            message: [0; 32],
            // Frame 0 carries the idle filler packet; message packets
            // start with the first frame update.
            vbi: [0x15; 40],
            mode2,
            blocks2,
            block2: 0,
            message2: [0; 32],
            vbi2: [0; 40],
            lut,
            video_scale,
            warmup: 0,
        })
    }

    fn reseed_vc1(rng: &mut ChaCha8Rng, mode: Vc1Mode, block: &mut Block) {
        match mode {
            Vc1Mode::Free | Vc1Mode::Conditional => {}
            Vc1Mode::Sky07 => {
                keys::rand_seed(rng, &mut block.messages[5]);
                let cw = keys::process_p07_msg(&mut block.messages[5], keys::VC_SKY7);
                block.codeword = keys::rev_cw(&cw);
            }
            Vc1Mode::Sky09 => {
                keys::rand_seed(rng, &mut block.messages[5]);
                let cw = keys::process_p09_msg(&mut block.messages[5]);
                block.codeword = keys::rev_cw(&cw);
            }
            Vc1Mode::Tac1 | Vc1Mode::Tac2 => {
                let ca = if mode == Vc1Mode::Tac1 {
                    keys::VC_TAC1
                } else {
                    keys::VC_TAC2
                };
                keys::rand_seed(rng, &mut block.messages[5]);
                let cw = keys::process_p07_msg(&mut block.messages[5], ca);
                block.codeword = keys::rev_cw(&cw);
            }
            Vc1Mode::Xtea => {
                block.codeword = keys::seed_xtea(rng, &mut block.messages[5]);
            }
            Vc1Mode::Ppv => {
                let card = [0x6D, 0xF6, 0x7B, 0x69, 0xA4, 0x51, 0xBF];
                block.codeword = keys::seed_ppv(rng, &mut block.messages[5], &card);
            }
        }
    }

    fn reseed_vc2(rng: &mut ChaCha8Rng, block: &mut Block) {
        keys::rand_seed(rng, &mut block.messages[5]);
        let cw = keys::process_p07_msg(&mut block.messages[5], keys::VC2_MC);
        block.codeword = keys::rev_cw(&cw);
    }

    /// Queue a card EMM into the current block (message slot 2).
    pub fn queue_emm(&mut self, cardserial: u32, mode: Vc1Mode) {
        let Some(block) = self.blocks.get_mut(self.block) else {
            return;
        };
        match mode {
            Vc1Mode::Sky09 => {
                let emm = [0xE1, 0x52, 0x01, 0x25, 0x80, 0xFF, 0x20];
                block.messages[2][..7].copy_from_slice(&emm);
                keys::xor_serial(&mut block.messages[2], 0xE1, cardserial, 0xA9);
                keys::process_p09_msg(&mut block.messages[2]);
            }
            _ => {
                let emm = [0xE0, 0x3F, 0x3E, 0xEC, 0x1C, 0x60, 0x0F];
                block.messages[2][..7].copy_from_slice(&emm);
                keys::xor_serial(&mut block.messages[2], 0xE0, cardserial, 0xA7);
                keys::process_p07_msg(&mut block.messages[2], keys::VC_SKY7);
            }
        }
    }

    fn prbs_reset(&mut self) {
        let iw = generate_iw(self.cw, self.counter);
        self.sr1 = (iw & SR1_MASK as u64) as u32;
        self.sr2 = ((iw >> 31) & SR2_MASK as u64) as u32;
    }

    /// Take the cut point byte for this line from the code register,
    /// then clock the next 16 PRBS bits into it. A line's cut point is
    /// governed by the register state left behind by the previous
    /// scrambled line.
    fn prbs_advance(&mut self) -> u8 {
        let x = (self.c >> 8) as u8;

        for _ in 0..16 {
            self.sr1 = (self.sr1 >> 1) ^ if self.sr1 & 1 != 0 { SR1_TAPS } else { 0 };
            self.sr2 = (self.sr2 >> 1) ^ if self.sr2 & 1 != 0 { SR2_TAPS } else { 0 };

            let mut a = (rev(self.sr2 as u64, 29) & 0x1F) as u32;
            if a == 31 {
                a = 30;
            }

            let bit = ((rev(self.sr1 as u64, 31) >> a) & 1) as u16;
            self.c = (self.c >> 1) | (bit << 15);
        }

        x
    }

    fn frame_update(&mut self) {
        // Videocrypt I message cadence: a new message every 8 frames,
        // each half transmitted for 4.
        if !self.blocks.is_empty() {
            if self.counter & 7 == 0 {
                let idx = ((self.counter >> 3) & 7) as usize % 7;
                self.message = self.blocks[self.block].messages[idx];
                self.message[31] = keys::message_crc(&self.message);
            }

            // Each half of the message is transmitted for 4 frames;
            // the 40 encoded bytes cover all eight VBI lines. The
            // very first frame keeps the idle filler packet, so the
            // message repeats start on frame 1.
            if self.primed {
                self.vbi = if self.counter & 4 == 0 {
                    encode_vbi(
                        &self.message[..16],
                        SEQUENCE1[((self.counter >> 4) & 7) as usize],
                        self.counter,
                    )
                } else {
                    encode_vbi(
                        &self.message[16..],
                        rnibble(SEQUENCE1[((self.counter >> 4) & 7) as usize]),
                        self.blocks[self.block].mode,
                    )
                };
            }
        }

        // Videocrypt II: a new message every 2 frames, one half per
        // frame.
        if !self.blocks2.is_empty() {
            if self.counter & 1 == 0 {
                let idx = ((self.counter >> 1) & 7) as usize % 7;
                self.message2 = self.blocks2[self.block2].messages[idx];
                self.message2[31] = keys::message_crc(&self.message2);

                self.vbi2 = encode_vbi(
                    &self.message2[..16],
                    SEQUENCE2[((self.counter >> 1) & 7) as usize],
                    self.counter,
                );
            } else {
                self.vbi2 = encode_vbi(
                    &self.message2[16..],
                    rnibble(SEQUENCE2[((self.counter >> 1) & 7) as usize]),
                    if self.counter & 0x08 != 0 {
                        0x00
                    } else {
                        self.blocks2[self.block2].mode
                    },
                );
            }
        }

        self.prbs_reset();
        self.primed = true;
        self.counter = self.counter.wrapping_add(1);

        // Every 64 frames: apply the block codeword and advance.
        if self.counter & 0x3F == 0 && !self.blocks.is_empty() {
            self.cw = self.blocks[self.block].codeword & CW_MASK;
            self.block += 1;
            if self.block == self.blocks.len() {
                self.block = 0;
            }
            if let Some(m) = self.mode1 {
                Self::reseed_vc1(&mut self.rng, m, &mut self.blocks[self.block]);
            }
        }

        // Every 16 frames for Videocrypt II.
        if self.counter & 0x0F == 0 && !self.blocks2.is_empty() {
            self.cw = self.blocks2[self.block2].codeword & CW_MASK;
            self.block2 += 1;
            if self.block2 == self.blocks2.len() {
                self.block2 = 0;
            }
            if self.mode2 == Some(Vc2Mode::Conditional) {
                Self::reseed_vc2(&mut self.rng, &mut self.blocks2[self.block2]);
            }
        }
    }

    fn vbi_line(&self, line: u32) -> Option<&[u8]> {
        let idx = if !self.blocks.is_empty()
            && (VC1_VBI_FIELD_1_START..VC1_VBI_FIELD_1_START + VBI_LINES_PER_FIELD).contains(&line)
        {
            Some((line - VC1_VBI_FIELD_1_START, &self.vbi))
        } else if !self.blocks.is_empty()
            && (VC1_VBI_FIELD_2_START..VC1_VBI_FIELD_2_START + VBI_LINES_PER_FIELD).contains(&line)
        {
            Some((line - VC1_VBI_FIELD_2_START + VBI_LINES_PER_FIELD, &self.vbi))
        } else if !self.blocks2.is_empty()
            && (VC2_VBI_FIELD_1_START..VC2_VBI_FIELD_1_START + VBI_LINES_PER_FIELD).contains(&line)
        {
            Some((line - VC2_VBI_FIELD_1_START, &self.vbi2))
        } else if !self.blocks2.is_empty()
            && (VC2_VBI_FIELD_2_START..VC2_VBI_FIELD_2_START + VBI_LINES_PER_FIELD).contains(&line)
        {
            Some((line - VC2_VBI_FIELD_2_START + VBI_LINES_PER_FIELD, &self.vbi2))
        } else {
            None
        };

        idx.map(|(i, buf)| &buf[i as usize * 5..i as usize * 5 + 5])
    }

    fn in_scramble_field(line: u32) -> bool {
        (FIELD_1_START..FIELD_1_START + LINES_PER_FIELD).contains(&line)
            || (FIELD_2_START..FIELD_2_START + LINES_PER_FIELD).contains(&line)
    }
}

impl LineProcessor for Videocrypt {
    fn name(&self) -> &'static str {
        "videocrypt"
    }

    fn window(&self) -> usize {
        2
    }

    fn process(&mut self, _state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        // Finalise the line at the window tail; offset 0 is the line
        // rendered one step later, which feeds the rotation delay.
        if self.warmup < 1 {
            self.warmup += 1;
            return Ok(1);
        }
        let number = ring.get(1).number;

        if number == 1 {
            self.frame_update();
        }

        if let Some(bline) = self.vbi_line(number) {
            let l = ring.get_mut(1);
            self.lut.render(bline, 0, 40, BitOrder::LsbFirst, l);
            l.vbi_allocated = true;
        }

        // Line 336 is scrambled into 335, a VBI line; keep teletext
        // away from it.
        if number == 335 && !self.blocks.is_empty() {
            ring.get_mut(1).vbi_allocated = true;
        }

        // WSS on line 23 must survive.
        if number == 23 || !Self::in_scramble_field(number) {
            return Ok(1);
        }
        if self.blocks.is_empty() && self.blocks2.is_empty() {
            return Ok(1);
        }

        let x = self.prbs_advance();
        let cut = 105 + (0xFF - x as usize) * 2;
        let lshift = 710 - cut;
        let vs = &self.video_scale;

        let (current, delay) = ring.pair_mut(1, 0);

        let mut y = vs[VC_LEFT + lshift];
        let mut px = vs[VC_LEFT];
        while px < vs[VC_LEFT + cut] {
            current.samples[px * 2] = delay.samples[y * 2];
            px += 1;
            y += 1;
        }
        let mut y = vs[VC_LEFT];
        while px < vs[VC_RIGHT + VC_OVERLAP] {
            current.samples[px * 2] = delay.samples[y * 2];
            px += 1;
            y += 1;
        }

        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iw_replicates_inverted_counter() {
        let iw = generate_iw(0, 0x12);
        // Each 16-bit group is (fcnt^FF)<<8 | fcnt.
        let g = 0xED12u64;
        assert_eq!(iw, (g | (g << 16) | (g << 32) | (g << 48)) & CW_MASK);
    }

    #[test]
    fn prbs_seed_and_first_code() {
        // Frame 0 with the free-access control word.
        let mut vc = Videocrypt {
            rng: ChaCha8Rng::seed_from_u64(0),
            counter: 0,
            primed: false,
            cw: CW_FA,
            sr1: 0,
            sr2: 0,
            c: 0xBC00,
            mode1: Some(Vc1Mode::Free),
            blocks: vec![Block::zeroed(0x05, CW_FA)],
            block: 0,
            message: [0; 32],
            vbi: [0x15; 40],
            mode2: None,
            blocks2: Vec::new(),
            block2: 0,
            message2: [0; 32],
            vbi2: [0; 40],
            lut: VbiLut::init_step(1, 16, 1, 1.0, 1.0, 0.0),
            video_scale: (0..VC_WIDTH + VC_OVERLAP + 1).map(|x| x + 33).collect(),
            warmup: 0,
        };

        vc.prbs_reset();
        assert_eq!(vc.sr1, 0x7D3D603F);
        assert_eq!(vc.sr2, 0x08C871B2);

        // The first scrambled line reads the opening register value;
        // the 16 bits clocked behind it govern the next line.
        let x = vc.prbs_advance();
        assert_eq!(x, 0xBC);
        assert_eq!(vc.c, 0xFD41);
        assert_eq!(105 + (0xFF - x as usize) * 2, 239);

        let x = vc.prbs_advance();
        assert_eq!(x, 0xFD);
    }

    #[test]
    fn vbi_frame_first_bytes_free_access() {
        let vbi = encode_vbi(&[0u8; 16], SEQUENCE1[0], 0x00);
        assert_eq!(
            &vbi[..10],
            &[0x80, 0x00, 0x82, 0x7C, 0x83, 0x7E, 0x81, 0x03, 0x82, 0x7E]
        );
    }

    #[test]
    fn interleave_transposes_groups() {
        let mut frame = [0u8; 40];
        frame[1] = 0xFF;
        interleave(&mut frame);
        // Column 1 becomes a single bit in every transposed row.
        for (i, &b) in frame[..8].iter().enumerate() {
            assert_eq!(b, 1 << 1, "row {i}");
        }
    }

    #[test]
    fn emm_lands_in_message_slot_two() {
        let mut vc = Videocrypt {
            rng: ChaCha8Rng::seed_from_u64(0),
            counter: 0,
            primed: false,
            cw: CW_FA,
            sr1: 0,
            sr2: 0,
            c: 0xBC00,
            mode1: Some(Vc1Mode::Sky07),
            blocks: vec![Block::zeroed(0x07, CW_FA)],
            block: 0,
            message: [0; 32],
            vbi: [0x15; 40],
            mode2: None,
            blocks2: Vec::new(),
            block2: 0,
            message2: [0; 32],
            vbi2: [0; 40],
            lut: VbiLut::init_step(1, 16, 1, 1.0, 1.0, 0.0),
            video_scale: (0..VC_WIDTH + VC_OVERLAP + 1).map(|x| x + 33).collect(),
            warmup: 0,
        };
        vc.queue_emm(0x00C0FFEE, Vc1Mode::Sky07);
        let msg = &vc.blocks[0].messages[2];
        assert_eq!(msg[0], 0xE0);
        assert_eq!(msg[11], 0xEE);
        // Signature and checksum are filled by the kernel.
        assert_ne!(&msg[27..31], &[0, 0, 0, 0]);
    }

    #[test]
    fn message_rotation_never_reads_slot_seven() {
        // (counter >> 3 & 7) % 7 cycles 0..6,0: the eighth message
        // slot is unreachable and free access repeats message 0.
        let seen: Vec<usize> = (0u8..64)
            .step_by(8)
            .map(|c| ((c >> 3) & 7) as usize % 7)
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6, 0]);
    }

    #[test]
    fn scrambled_cut_points_vary_per_line() {
        let mut sr1: u32 = 0x7D3D603F;
        let mut sr2: u32 = 0x08C871B2;
        let mut c: u16 = 0;
        let mut cuts = std::collections::HashSet::new();
        for _ in 0..287 {
            for _ in 0..16 {
                sr1 = (sr1 >> 1) ^ if sr1 & 1 != 0 { SR1_TAPS } else { 0 };
                sr2 = (sr2 >> 1) ^ if sr2 & 1 != 0 { SR2_TAPS } else { 0 };
                let mut a = (rev(sr2 as u64, 29) & 0x1F) as u32;
                if a == 31 {
                    a = 30;
                }
                let bit = ((rev(sr1 as u64, 31) >> a) & 1) as u16;
                c = (c >> 1) | (bit << 15);
            }
            cuts.insert((c >> 8) as u8);
        }
        assert!(cuts.len() > 100, "only {} distinct cut points", cuts.len());
    }
}
