//! Audio subcarrier modulators.
//!
//! Each enabled modulator contributes a complex sample per output
//! sample; the sum rides on the vision signal in the IQ domain. PCM
//! arrives in per-video-frame blocks at the source rate and is
//! stepped up to the output rate with an exact rational accumulator.

pub mod nicam;

use crate::config::{PreEmphasis, VideoConfig};
use crate::dsp::{FirComplex, FmModulator, IirInt16, Nco, Rational};
use nicam::{NicamEncoder, NicamMode, NICAM_AUDIO_LEN, NICAM_FRAME_BITS, NICAM_FRAME_BYTES};
use num_complex::Complex;

fn emphasis_filter(mode: PreEmphasis, rate: u32) -> Option<IirInt16> {
    match mode {
        PreEmphasis::None => None,
        PreEmphasis::Us50 => Some(IirInt16::pre_emphasis(50e-6, 4.0, rate)),
        PreEmphasis::Us75 => Some(IirInt16::pre_emphasis(75e-6, 4.0, rate)),
        // J.17 approximated by its asymptotic time constant.
        PreEmphasis::J17 => Some(IirInt16::pre_emphasis(80e-6, 6.0, rate)),
    }
}

/// Input tap selection for a subcarrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Mono,
    Left,
    Right,
}

struct FmSubcarrier {
    channel: Channel,
    modulator: FmModulator,
    emphasis: Option<IirInt16>,
}

struct A2Subcarrier {
    signal: Nco,
    pilot: Nco,
    /// Pilot AM tone: 117.5 Hz for stereo identification.
    tone: Nco,
    emphasis: Option<IirInt16>,
}

struct AmSubcarrier {
    nco: Nco,
}

struct NicamSubcarrier {
    encoder: NicamEncoder,
    frame: [u8; NICAM_FRAME_BYTES],
    frame_bit: usize,
    /// Pending PCM at the audio rate, consumed 32 pairs per NICAM
    /// frame.
    pending: Vec<i16>,
    /// DQPSK phase index.
    phase: u8,
    symbol_acc: u64,
    carrier: Nco,
    shaper: FirComplex,
    level: i16,
    sample_rate: u32,
}

const NICAM_SYMBOL_RATE: u64 = 364_000;

impl NicamSubcarrier {
    fn new(conf: &VideoConfig, sample_rate: u32) -> Self {
        let n = conf.nicam.unwrap();
        let mode = if conf.mac_audio.stereo {
            NicamMode::Stereo
        } else {
            NicamMode::Mono
        };

        // The DQPSK spectrum is shaped around DC then mixed up to the
        // subcarrier.
        let bw = NICAM_SYMBOL_RATE as f64 / 2.0 * (1.0 + n.beta);
        let shaper = FirComplex::band_pass(63, sample_rate as f64, -bw, bw, bw / 4.0);

        Self {
            encoder: NicamEncoder::new(mode, false),
            frame: [0; NICAM_FRAME_BYTES],
            frame_bit: NICAM_FRAME_BITS,
            pending: Vec::new(),
            phase: 0,
            symbol_acc: 0,
            carrier: Nco::new(
                Rational::new(n.carrier as i64, 1),
                sample_rate,
                1.0,
            ),
            shaper,
            level: (n.level * i16::MAX as f64) as i16,
            sample_rate,
        }
    }

    fn push_pcm(&mut self, pcm: &[i16]) {
        self.pending.extend_from_slice(pcm);
        // Bound the backlog to roughly a second.
        let max = 32000 * 2;
        if self.pending.len() > max {
            let cut = self.pending.len() - max;
            self.pending.drain(..cut);
        }
    }

    fn next_bit_pair(&mut self) -> u8 {
        if self.frame_bit >= NICAM_FRAME_BITS {
            let mut block = [0i16; NICAM_AUDIO_LEN * 2];
            let take = block.len().min(self.pending.len());
            block[..take].copy_from_slice(&self.pending[..take]);
            self.pending.drain(..take);
            self.frame = self.encoder.encode_frame(&block);
            self.frame_bit = 0;
        }
        let pair = (self.frame[self.frame_bit / 8] >> (6 - self.frame_bit % 8)) & 3;
        self.frame_bit += 2;
        pair
    }

    fn sample(&mut self) -> Complex<i32> {
        // Advance the symbol clock.
        self.symbol_acc += NICAM_SYMBOL_RATE;
        if self.symbol_acc >= self.sample_rate as u64 {
            self.symbol_acc -= self.sample_rate as u64;
            let pair = self.next_bit_pair();
            // Differential phase steps: 00 +0, 01 -1, 11 -2, 10 -3
            // quarter turns.
            let step = match pair {
                0b00 => 0,
                0b01 => 3,
                0b11 => 2,
                _ => 1,
            };
            self.phase = (self.phase + step) & 3;
        }

        const QUARTER: [(i32, i32); 4] = [(32767, 0), (0, 32767), (-32767, 0), (0, -32767)];
        let (re, im) = QUARTER[self.phase as usize];
        let shaped = self.shaper.filter(Complex::new(re, im));
        let mixed = self.carrier.mix_offset(shaped);

        Complex::new(
            (mixed.re * self.level as i32) >> 15,
            (mixed.im * self.level as i32) >> 15,
        )
    }
}

/// All enabled audio modulators plus the shared PCM upsampling state.
pub struct AudioStack {
    fm: Vec<FmSubcarrier>,
    a2: Option<A2Subcarrier>,
    a2_level: i16,
    am: Option<AmSubcarrier>,
    am_level: i16,
    nicam: Option<NicamSubcarrier>,

    pcm: Vec<i16>,
    pcm_pos: usize,
    audio_rate: u32,
    sample_rate: u32,
    acc: u64,
    current: (i16, i16),
}

impl AudioStack {
    pub fn new(conf: &VideoConfig, sample_rate: u32) -> Self {
        let audio_rate = conf.audio_sample_rate;
        let mut fm = Vec::new();

        for (carrier, channel) in [
            (conf.fm_mono, Channel::Mono),
            (conf.fm_left, Channel::Left),
            (conf.fm_right, Channel::Right),
        ] {
            if let Some(c) = carrier {
                let mut modulator =
                    FmModulator::new(c.carrier, c.deviation, c.level, sample_rate);
                if conf.fm_energy_dispersal > 0.0 {
                    modulator = modulator.with_dispersal(crate::dsp::EnergyDispersal::new(
                        conf.fm_energy_dispersal,
                        2048,
                        sample_rate,
                    ));
                }
                fm.push(FmSubcarrier {
                    channel,
                    modulator,
                    emphasis: emphasis_filter(c.pre_emphasis, audio_rate),
                });
            }
        }

        let a2 = conf.a2_stereo.map(|a| A2Subcarrier {
            signal: Nco::new(Rational::new(a.signal_carrier as i64, 1), sample_rate, 1.0),
            pilot: Nco::new(
                Rational::new((a.signal_carrier + a.pilot_carrier) as i64, 1),
                sample_rate,
                1.0,
            ),
            tone: Nco::new(Rational::new(235, 2), sample_rate, 1.0),
            emphasis: emphasis_filter(PreEmphasis::Us50, audio_rate),
        });
        let a2_level = conf
            .a2_stereo
            .map(|a| (a.level * i16::MAX as f64) as i16)
            .unwrap_or(0);

        let am = conf.am_audio.map(|a| AmSubcarrier {
            nco: Nco::new(Rational::new(a.carrier as i64, 1), sample_rate, a.level),
        });
        let am_level = conf
            .am_audio
            .map(|a| (a.level * i16::MAX as f64) as i16)
            .unwrap_or(0);

        let nicam = conf
            .nicam
            .map(|_| NicamSubcarrier::new(conf, sample_rate));

        Self {
            fm,
            a2,
            a2_level,
            am,
            am_level,
            nicam,
            pcm: Vec::new(),
            pcm_pos: 0,
            audio_rate,
            sample_rate,
            acc: 0,
            current: (0, 0),
        }
    }

    pub fn is_silent(&self) -> bool {
        self.fm.is_empty() && self.a2.is_none() && self.am.is_none() && self.nicam.is_none()
    }

    /// Feed the stereo PCM block for the next video frame.
    pub fn write_pcm(&mut self, block: &[i16]) {
        // Drop whatever of the previous frame was not consumed; the
        // accumulator keeps long-term rates exact.
        self.pcm.clear();
        self.pcm.extend_from_slice(block);
        self.pcm_pos = 0;

        if let Some(n) = &mut self.nicam {
            n.push_pcm(block);
        }
    }

    #[inline]
    fn step_pcm(&mut self) {
        self.acc += self.audio_rate as u64;
        while self.acc >= self.sample_rate as u64 {
            self.acc -= self.sample_rate as u64;
            if self.pcm_pos + 1 < self.pcm.len() {
                self.current = (self.pcm[self.pcm_pos], self.pcm[self.pcm_pos + 1]);
                self.pcm_pos += 2;
            }
        }
    }

    /// One output sample: the summed complex contribution of every
    /// enabled subcarrier.
    pub fn sample(&mut self) -> Complex<i32> {
        self.step_pcm();
        let (l, r) = self.current;
        let mono = ((l as i32 + r as i32) / 2) as i16;

        let mut sum = Complex::new(0i32, 0i32);

        for fmc in &mut self.fm {
            let mut s = match fmc.channel {
                Channel::Mono => mono,
                Channel::Left => l,
                Channel::Right => r,
            };
            if let Some(e) = &mut fmc.emphasis {
                s = e.filter(s);
            }
            let out = fmc.modulator.modulate(s);
            sum.re += out.re;
            sum.im += out.im;
        }

        if let Some(a2) = &mut self.a2 {
            let mut s = ((l as i32 - r as i32) / 2) as i16;
            if let Some(e) = &mut a2.emphasis {
                s = e.filter(s);
            }
            let sig = a2.signal.mix_am(s);
            // The pilot is amplitude modulated by the identification
            // tone.
            let tone = a2.tone.carrier().re >> 1;
            let pil = a2.pilot.mix_am((tone >> 2) as i16);

            sum.re += ((sig.re + pil.re / 4) * self.a2_level as i32) >> 15;
            sum.im += ((sig.im + pil.im / 4) * self.a2_level as i32) >> 15;
            a2.tone.advance(1);
        }

        if let Some(am) = &mut self.am {
            let out = am.nco.mix_am(mono);
            sum.re += (out.re * self.am_level as i32) >> 15;
            sum.im += (out.im * self.am_level as i32) >> 15;
        }

        if let Some(n) = &mut self.nicam {
            let out = n.sample();
            sum.re += out.re;
            sum.im += out.im;
        }

        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::presets;

    fn stack(preset: &str, rate: u32) -> AudioStack {
        let conf = presets::preset(preset).unwrap();
        AudioStack::new(&conf, rate)
    }

    #[test]
    fn pal_i_has_fm_and_nicam() {
        let s = stack("pal-i", 16_000_000);
        assert_eq!(s.fm.len(), 1);
        assert!(s.nicam.is_some());
        assert!(!s.is_silent());
    }

    #[test]
    fn composite_preset_is_silent() {
        let s = stack("pal", 14_000_000);
        assert!(s.is_silent());
    }

    #[test]
    fn pcm_stepping_consumes_block() {
        let mut s = stack("pal-i", 1_000_000);
        // 32 kHz source at 1 MHz output: 40 pairs per 1250 samples.
        let block: Vec<i16> = (0..80).map(|i| i as i16).collect();
        s.write_pcm(&block);
        for _ in 0..1250 {
            s.sample();
        }
        assert!(s.pcm_pos >= 78, "consumed {} of 80", s.pcm_pos);
    }

    #[test]
    fn fm_output_is_bounded_by_level() {
        let mut s = stack("pal-i", 1_000_000);
        s.write_pcm(&vec![i16::MAX; 256]);
        let mut peak = 0i32;
        for _ in 0..5000 {
            let c = s.sample();
            peak = peak.max(c.re.abs()).max(c.im.abs());
        }
        // Mono level 0.22 plus NICAM 0.07 of full scale.
        assert!(peak < 11000, "peak {peak}");
    }

    #[test]
    fn nicam_symbol_clock_rate() {
        let conf = presets::preset("pal-i").unwrap();
        let mut n = NicamSubcarrier::new(&conf, 1_000_000);
        n.push_pcm(&vec![0i16; 64 * 1100]);

        // One second of output at 364 kbaud is 1000 NICAM frames.
        let mut frames = 0u32;
        let mut prev = n.frame_bit;
        for _ in 0..1_000_000 {
            let _ = n.sample();
            if n.frame_bit < prev {
                frames += 1;
            }
            prev = n.frame_bit;
        }
        assert!((995..=1005).contains(&frames), "{frames} frames");
    }
}
