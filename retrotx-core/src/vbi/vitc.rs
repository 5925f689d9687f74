//! Vertical interval timecode.
//!
//! SMPTE timecode on two insertion lines per field, with drop-frame
//! compensation for 30000/1001 rasters and the XOR CRC rotated by two
//! bits.

use super::data::{BitOrder, VbiLut};
use crate::config::RasterFamily;
use crate::dsp::Rational;
use crate::errors::{ConfigError, Result, TxError};
use crate::video::{EngineState, LineProcessor, LineRing};

fn put_bits(data: &mut [u8], mut offset: usize, bits: u64, nbits: usize) -> usize {
    for i in 0..nbits {
        let b = 1u8 << (offset & 7);
        if (bits >> i) & 1 != 0 {
            data[offset >> 3] |= b;
        } else {
            data[offset >> 3] &= !b;
        }
        offset += 1;
    }
    offset
}

pub struct Vitc {
    lut: VbiLut,
    lines: [u32; 2],
    fps: u32,
    frame_drop: bool,
    is_625: bool,
}

impl Vitc {
    pub fn new(state: &EngineState) -> Result<Self> {
        let (lines, hr, is_625) = match state.conf.raster {
            RasterFamily::R625 => ([19u32, 332u32], 116u32, true),
            RasterFamily::R525 => ([14, 277], 115, false),
            _ => {
                return Err(TxError::Config(ConfigError::UnsupportedRaster {
                    feature: "vitc",
                    lines: state.conf.lines,
                }))
            }
        };

        let (fps, frame_drop) = if state.conf.frame_rate.den == 1 && state.conf.frame_rate.num <= 30
        {
            (state.conf.frame_rate.num as u32, false)
        } else if state.conf.frame_rate == Rational::new(30000, 1001) {
            (30, true)
        } else {
            return Err(TxError::Config(ConfigError::InvalidOption {
                option: "vitc",
                reason: format!("unsupported frame rate {}", state.conf.frame_rate),
            }));
        };

        let level = ((state.white_level - state.black_level) as f64 * 0.785).round() as i16;
        let lut = VbiLut::init_step(
            hr as usize,
            state.width,
            level,
            state.width as f64 / hr as f64,
            state.pixel_rate as f64 * 200e-9,
            0.0,
        );

        Ok(Self {
            lut,
            lines,
            fps,
            frame_drop,
            is_625,
        })
    }

    fn timecode(&self, frame: u32, second_field: bool) -> u32 {
        let mut fn_ = frame as u64;

        if self.frame_drop {
            // Two frame numbers are dropped every minute except every
            // tenth minute.
            fn_ += (fn_ / 17982) * 18;
            fn_ += (fn_ % 18000).saturating_sub(2) / 1798 * 2;
        }

        let fps = self.fps as u64;
        let mut tc = (fn_ % fps % 10) | ((fn_ % fps / 10) << 4);
        if self.frame_drop {
            tc |= 1 << 6;
        }

        let mut t = fn_ / fps;
        tc |= ((t % 10) << 8) | ((t / 10 % 6) << 12);
        if !self.is_625 && second_field {
            tc |= 1 << 15;
        }

        t /= 60;
        tc |= ((t % 10) << 16) | ((t / 10 % 6) << 20);

        t /= 60;
        tc |= ((t % 24 % 10) << 24) | ((t % 24 / 10) << 28);
        if self.is_625 && second_field {
            tc |= 1 << 31;
        }

        tc as u32
    }

    fn build(&self, timecode: u32) -> ([u8; 12], usize) {
        let mut data = [0u8; 12];
        let mut x = 0;
        for i in 0..8 {
            x = put_bits(&mut data, x, 0x01, 2); // sync
            x = put_bits(&mut data, x, (timecode >> (i * 4)) as u64, 4);
            x = put_bits(&mut data, x, 0, 4); // user bits
        }

        x = put_bits(&mut data, x, 0x01, 2);
        put_bits(&mut data, x, 0, 8);

        let mut crc = 0u8;
        for b in &data[..11] {
            crc ^= b;
        }
        crc = crc.rotate_left(6);
        let x = put_bits(&mut data, x, crc as u64, 8);

        (data, x)
    }
}

impl LineProcessor for Vitc {
    fn name(&self) -> &'static str {
        "vitc"
    }

    fn process(&mut self, _state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        let (frame, number) = {
            let l = ring.get(0);
            (l.frame, l.number)
        };

        let on_line = number == self.lines[0]
            || number == self.lines[0] + 2
            || number == self.lines[1]
            || number == self.lines[1] + 2;
        if !on_line {
            return Ok(1);
        }

        let second_field = number >= self.lines[1];
        let (data, nbits) = self.build(self.timecode(frame, second_field));

        let l = ring.get_mut(0);
        self.lut.render(&data, 21, nbits, BitOrder::LsbFirst, l);
        l.vbi_allocated = true;

        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vitc_625() -> Vitc {
        Vitc {
            lut: VbiLut::init_step(116, 1024, 1000, 8.0, 2.0, 0.0),
            lines: [19, 332],
            fps: 25,
            frame_drop: false,
            is_625: true,
        }
    }

    #[test]
    fn timecode_bcd_fields() {
        let v = vitc_625();
        // Frame 12345 at 25 fps: 00:08:13 frame 20.
        let tc = v.timecode(12345, false);
        assert_eq!(tc & 0x3F, 0x20);
        assert_eq!((tc >> 8) & 0x7F, 0x13);
        assert_eq!((tc >> 16) & 0x7F, 0x08);
        assert_eq!((tc >> 24) & 0x3F, 0x00);
    }

    #[test]
    fn field_flag_in_bit_31_for_625() {
        let v = vitc_625();
        let a = v.timecode(1, false);
        let b = v.timecode(1, true);
        assert_eq!(b & !(1 << 31), a);
        assert_ne!(a, b);
    }

    #[test]
    fn crc_is_xor_rotated() {
        let v = vitc_625();
        let (data, nbits) = v.build(v.timecode(0, false));
        assert_eq!(nbits, 90);
        let mut crc = 0u8;
        for b in &data[..11] {
            crc ^= b;
        }
        assert_eq!(data[11], crc.rotate_left(6));
    }

    #[test]
    fn drop_frame_skips_frame_numbers() {
        let v = Vitc {
            frame_drop: true,
            fps: 30,
            is_625: false,
            ..vitc_625()
        };
        // First frame of a minute (except each tenth) starts at 2.
        let tc = v.timecode(1800, false);
        assert_eq!(tc & 0x3F, 0x02);
    }
}
