//! Analogue copy protection (Macrovision-style).
//!
//! Six P-sync / AGC pulse pairs on the early VBI lines of both fields.
//! The AGC pulse level follows a clipped sawtooth over 1712 frames so
//! recorder AGC loops cannot settle.

use crate::errors::{ConfigError, Result, TxError};
use crate::video::{EngineState, LineProcessor, LineRing};

pub struct Acp {
    psync_level: i16,
    pagc_level: i16,
    psync_width: usize,
    pagc_width: usize,
    left: [usize; 6],
    is_625: bool,
}

impl Acp {
    pub fn new(state: &EngineState) -> Result<Self> {
        let (left, spacing, psync_width, is_625) = match state.conf.lines {
            625 => (8.88e-6, 5.92e-6, 2.368e-6, true),
            525 => (8.288e-6, 8.288e-6, 2.222e-6, false),
            lines => {
                return Err(TxError::Config(ConfigError::UnsupportedRaster {
                    feature: "acp",
                    lines,
                }))
            }
        };

        let pr = state.pixel_rate as f64;
        let span = (state.white_level - state.sync_level) as f64;

        let mut lefts = [0usize; 6];
        for (i, l) in lefts.iter_mut().enumerate() {
            *l = (pr * (left + spacing * i as f64)).round() as usize;
        }

        Ok(Self {
            psync_level: state.sync_level + (span * 0.06).round() as i16,
            pagc_level: state.sync_level + (span * 1.10).round() as i16,
            psync_width: (pr * psync_width).round() as usize,
            pagc_width: (pr * 2.7e-6).round() as usize,
            left: lefts,
            is_625,
        })
    }

    fn on_line(&self, number: u32) -> bool {
        if self.is_625 {
            (9..=18).contains(&number) || (321..=330).contains(&number)
        } else {
            (12..=19).contains(&number) || (275..=282).contains(&number)
        }
    }
}

impl LineProcessor for Acp {
    fn name(&self) -> &'static str {
        "acp"
    }

    fn process(&mut self, state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        let (frame, number, allocated) = {
            let l = ring.get(0);
            (l.frame, l.number, l.vbi_allocated)
        };

        if number == 1 {
            // Clipped sawtooth over 1712 frames, expressed as a grey
            // level and converted through the luma lookup.
            let mut i = (frame as i32 * 4 % 1712 - 856).abs() - 150;
            i = i.clamp(0, 255);
            let luma = state.luma_for_grey(i as u8);
            self.pagc_level = state.sync_level
                + ((luma - state.sync_level) as f64 * 1.10).round() as i16;
        }

        if !self.on_line(number) || allocated {
            return Ok(1);
        }

        let l = ring.get_mut(0);
        for &left in &self.left {
            let mut x = left;
            while x < left + self.psync_width && x < l.width {
                l.set(x, self.psync_level);
                x += 1;
            }
            while x < left + self.psync_width + self.pagc_width && x < l.width {
                l.set(x, self.pagc_level);
                x += 1;
            }
        }
        l.vbi_allocated = true;

        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acp() -> Acp {
        Acp {
            psync_level: -8000,
            pagc_level: 12000,
            psync_width: 30,
            pagc_width: 40,
            left: [100, 200, 300, 400, 500, 600],
            is_625: true,
        }
    }

    #[test]
    fn lines_625() {
        let a = acp();
        assert!(a.on_line(9));
        assert!(a.on_line(18));
        assert!(!a.on_line(19));
        assert!(a.on_line(321));
        assert!(a.on_line(330));
        assert!(!a.on_line(331));
    }

    #[test]
    fn lines_525() {
        let a = Acp {
            is_625: false,
            ..acp()
        };
        assert!(a.on_line(12));
        assert!(a.on_line(19));
        assert!(!a.on_line(20));
        assert!(a.on_line(275));
        assert!(a.on_line(282));
    }
}
