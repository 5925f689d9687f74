//! Output modulation: baseband video plus the audio subcarrier sum
//! into interleaved int16 IQ.

use crate::audio::AudioStack;
use crate::config::{OutputModulation, VideoConfig};
use crate::dsp::{FirComplex, FmModulator, Limiter};

pub struct OutputModulator {
    kind: OutputModulation,
    level: i16,
    fm: Option<FmModulator>,
    limiter: Option<Limiter>,
    vsb: Option<FirComplex>,
    swap_iq: bool,
}

impl OutputModulator {
    pub fn new(conf: &VideoConfig, sample_rate: u32) -> Self {
        let fm = matches!(conf.modulation, OutputModulation::Fm).then(|| {
            let mut m = FmModulator::new(0.0, conf.fm_deviation / 2.0, conf.level, sample_rate);
            if conf.fm_energy_dispersal > 0.0 {
                m = m.with_dispersal(crate::dsp::EnergyDispersal::new(
                    conf.fm_energy_dispersal,
                    4096,
                    sample_rate,
                ));
            }
            m
        });

        // FM over-drive is held off by attenuating the sound channel
        // against the combined peak.
        let limiter = matches!(conf.modulation, OutputModulation::Fm)
            .then(|| Limiter::new((i16::MAX as f64 * 0.95) as i16, 65));

        let vsb = matches!(conf.modulation, OutputModulation::Vsb).then(|| {
            FirComplex::band_pass(
                129,
                sample_rate as f64,
                -conf.vsb_lower_bw,
                conf.vsb_upper_bw,
                conf.vsb_lower_bw / 2.0,
            )
        });

        Self {
            kind: conf.modulation,
            level: (conf.level * i16::MAX as f64) as i16,
            fm,
            limiter,
            vsb,
            swap_iq: conf.swap_iq,
        }
    }

    /// Modulate one line of real baseband samples, appending
    /// interleaved IQ pairs to `out`.
    pub fn modulate_line(&mut self, line: &[i16], audio: &mut AudioStack, out: &mut Vec<i16>) {
        out.reserve(line.len() * 2);

        for &v in line {
            let (mut i, mut q): (i32, i32);

            match self.kind {
                OutputModulation::None => {
                    let a = audio.sample();
                    i = ((v as i32 * self.level as i32) >> 15) + a.re;
                    q = 0;
                }
                OutputModulation::Am | OutputModulation::Vsb => {
                    // Envelope: sync at full carrier, white towards
                    // zero.
                    let e = ((i16::MAX as i32 - v as i32) / 2 * self.level as i32) >> 15;
                    let a = audio.sample();
                    i = e + a.re;
                    q = a.im;
                    if let Some(f) = &mut self.vsb {
                        let c = f.filter(num_complex::Complex::new(i, q));
                        i = c.re;
                        q = c.im;
                    }
                }
                OutputModulation::Fm => {
                    // Audio subcarriers ride inside the FM baseband.
                    let a = audio.sample();
                    let base = if let Some(l) = &mut self.limiter {
                        l.process(v, a.re.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
                    } else {
                        v
                    };
                    let c = self.fm.as_mut().expect("fm state").modulate(base);
                    i = c.re;
                    q = c.im;
                }
            }

            let (i, q) = if self.swap_iq { (q, i) } else { (i, q) };
            out.push(i.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
            out.push(q.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
        }
    }

    pub fn is_complex(&self) -> bool {
        !matches!(self.kind, OutputModulation::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::presets;

    fn modulate(preset: &str, line: &[i16]) -> Vec<i16> {
        let conf = presets::preset(preset).unwrap();
        let mut m = OutputModulator::new(&conf, 1_000_000);
        let mut audio = AudioStack::new(&conf, 1_000_000);
        let mut out = Vec::new();
        m.modulate_line(line, &mut audio, &mut out);
        out
    }

    #[test]
    fn baseband_passthrough_keeps_real_lane() {
        let line = vec![1000i16; 64];
        let out = modulate("pal", &line);
        assert_eq!(out.len(), 128);
        assert!(out.iter().skip(1).step_by(2).all(|&q| q == 0));
        assert!(out[0] > 900 && out[0] <= 1000);
    }

    #[test]
    fn fm_output_is_constant_envelope() {
        let line: Vec<i16> = (0..512).map(|i| ((i * 37) % 20000) as i16).collect();
        let out = modulate("pal-fm", &line);
        for iq in out.chunks_exact(2).skip(100) {
            let mag = ((iq[0] as f64).powi(2) + (iq[1] as f64).powi(2)).sqrt();
            assert!(
                (0.85..=1.05).contains(&(mag / 32767.0)),
                "envelope {mag}"
            );
        }
    }

    #[test]
    fn am_envelope_tracks_video_inverted() {
        let low = modulate("ntsc-m", &vec![-10000i16; 512]);
        let high = modulate("ntsc-m", &vec![20000i16; 512]);
        let mean_low: f64 =
            low.chunks_exact(2).map(|iq| iq[0] as f64).sum::<f64>() / 256.0;
        let mean_high: f64 =
            high.chunks_exact(2).map(|iq| iq[0] as f64).sum::<f64>() / 256.0;
        // Sync (low) carries more envelope than white (high).
        assert!(mean_low > mean_high);
    }
}
