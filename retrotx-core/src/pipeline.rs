//! Per-channel pipeline assembly.
//!
//! Builds a `VideoEngine` with the processors requested by the config,
//! wires the audio modulators and the output stage, and exposes a
//! line-at-a-time IQ block producer.

use crate::audio::AudioStack;
use crate::ca::{Eurocrypt, Syster, SysterVariant, Vc1Mode, Vc2Mode, Videocrypt, VideocryptS};
use crate::clock::Clock;
use crate::config::{RasterFamily, VideoConfig};
use crate::errors::Result;
use crate::mac::MacFramer;
use crate::rf::OutputModulator;
use crate::source::{AvSource, FreezeFrameSource};
use crate::vbi::{Acp, Cc608, Sis, Teletext, Vitc, Vits, Wss};
use crate::video::{EngineState, LineProcessor, LineRing, VideoEngine};
use std::sync::Arc;

/// MAC multiplex processor: the packet framer plus the optional
/// Eurocrypt packet generator feeding it.
struct MacProcessor {
    framer: MacFramer,
    eurocrypt: Option<Eurocrypt>,
    show_ecm: bool,
}

impl LineProcessor for MacProcessor {
    fn name(&self) -> &'static str {
        "mac"
    }

    fn process(&mut self, state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
        let (frame, number) = {
            let l = ring.get(0);
            (l.frame, l.number)
        };

        if number == 1 {
            if let Some(ec) = &mut self.eurocrypt {
                if let Some(cw) = ec.next_frame(&mut self.framer, frame) {
                    if self.show_ecm {
                        log::debug!("eurocrypt: frame {frame} active cw {cw:016X}");
                    }
                }
            }
        }

        self.framer.process(state, ring)
    }
}

/// A complete single-channel synthesis chain.
pub struct ChannelPipeline {
    engine: VideoEngine,
    audio: AudioStack,
    modulator: OutputModulator,
    line_buf: Vec<i16>,
}

impl ChannelPipeline {
    pub fn sample_rate(&self) -> u32 {
        self.engine.state.sample_rate
    }

    /// Samples per line at the output rate.
    pub fn line_samples(&self) -> usize {
        self.engine.line_width()
    }

    pub fn processor_names(&self) -> Vec<&'static str> {
        self.engine.processor_names()
    }

    /// Produce the IQ block for the next raster line, appended to
    /// `out` as interleaved pairs.
    pub fn next_line_iq(&mut self, out: &mut Vec<i16>) -> Result<()> {
        {
            let line = self.engine.next_line()?;
            self.line_buf.clear();
            for x in 0..line.width {
                self.line_buf.push(line.samples[x * 2]);
            }
        }

        if self.engine.state.audio_updated {
            let block = std::mem::take(&mut self.engine.state.audio_block);
            self.audio.write_pcm(&block);
            self.engine.state.audio_block = block;
            self.engine.state.audio_updated = false;
        }

        self.modulator
            .modulate_line(&self.line_buf, &mut self.audio, out);
        Ok(())
    }

    /// Total IQ samples in one full frame.
    pub fn frame_samples(&self) -> usize {
        self.engine.frame_samples()
    }
}

/// Build a pipeline from a config. Processors register in dependency
/// order; the widest window sizes the line ring.
pub fn build_pipeline(
    conf: VideoConfig,
    sample_rate: u32,
    pixel_rate: u32,
    source: Box<dyn AvSource>,
    clock: Arc<dyn Clock>,
) -> Result<ChannelPipeline> {
    // Source EOF freezes the last frame rather than ending the
    // stream.
    let source = Box::new(FreezeFrameSource::new(source));
    let mut engine = VideoEngine::new(conf.clone(), sample_rate, pixel_rate, source)?;

    if let Some(path) = &conf.features.teletext {
        let p = Teletext::new(&engine.state, path, clock.clone())?;
        engine.add_processor(Box::new(p));
    }

    if let Some(mode) = &conf.features.wss {
        let p = Wss::new(&engine.state, mode)?;
        engine.add_processor(Box::new(p));
    }

    if conf.features.vits {
        let p = Vits::new(&engine.state)?;
        engine.add_processor(Box::new(p));
    }

    if conf.features.vitc {
        let p = Vitc::new(&engine.state)?;
        engine.add_processor(Box::new(p));
    }

    if conf.features.cc608 {
        let p = Cc608::new(&engine.state)?;
        engine.add_processor(Box::new(p));
    }

    if conf.features.acp {
        let p = Acp::new(&engine.state)?;
        engine.add_processor(Box::new(p));
    }

    if let Some(mode) = &conf.features.sis {
        let p = Sis::new(&engine.state, mode)?;
        engine.add_processor(Box::new(p));
    }

    if conf.features.videocrypt.is_some() || conf.features.videocrypt2.is_some() {
        let m1 = conf
            .features
            .videocrypt
            .as_deref()
            .map(Vc1Mode::from_id)
            .transpose()?;
        let m2 = conf
            .features
            .videocrypt2
            .as_deref()
            .map(Vc2Mode::from_id)
            .transpose()?;
        let p = Videocrypt::new(&engine.state, m1, m2)?;
        engine.add_processor(Box::new(p));
    }

    if let Some(mode) = &conf.features.videocrypts {
        let p = VideocryptS::new(&engine.state, mode)?;
        engine.add_processor(Box::new(p));
    }

    // Syster variants are mutually exclusive in practice; shuffle
    // plus cut-and-rotate combine into one processor.
    if let Some(mode) = &conf.features.syster {
        let variant = if conf.features.systercnr.is_some() {
            SysterVariant::ShuffleCnr
        } else {
            SysterVariant::Shuffle
        };
        let p = Syster::new(&engine.state, variant, mode, conf.features.systeraudio)?;
        engine.add_processor(Box::new(p));
    } else if let Some(mode) = &conf.features.systercnr {
        let p = Syster::new(
            &engine.state,
            SysterVariant::CutAndRotate,
            mode,
            conf.features.systeraudio,
        )?;
        engine.add_processor(Box::new(p));
    } else if let Some(mode) = &conf.features.d11 {
        let p = Syster::new(
            &engine.state,
            SysterVariant::Discret11,
            mode,
            conf.features.systeraudio,
        )?;
        engine.add_processor(Box::new(p));
    }

    if conf.raster == RasterFamily::Mac {
        let framer = MacFramer::new(&engine.state, conf.id == "d2mac");
        let eurocrypt = conf
            .features
            .eurocrypt
            .as_deref()
            .map(|id| Eurocrypt::new(id, clock.clone(), rand::random()))
            .transpose()?;
        engine.add_processor(Box::new(MacProcessor {
            framer,
            eurocrypt,
            show_ecm: conf.features.show_ecm,
        }));
    }

    let audio = AudioStack::new(&conf, sample_rate);
    let modulator = OutputModulator::new(&conf, sample_rate);

    Ok(ChannelPipeline {
        engine,
        audio,
        modulator,
        line_buf: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::source::TestPatternSource;
    use crate::video::presets;

    fn pipeline(preset: &str, rate: u32, features: impl FnOnce(&mut VideoConfig)) -> ChannelPipeline {
        let mut conf = presets::preset(preset).unwrap();
        features(&mut conf);
        let src = TestPatternSource::grey(200, 144, conf.audio_sample_rate);
        build_pipeline(
            conf,
            rate,
            rate,
            Box::new(src),
            Arc::new(FixedClock(946684800)),
        )
        .unwrap()
    }

    #[test]
    fn frame_sample_count_is_exact() {
        let mut p = pipeline("pal", 14_000_000, |_| {});
        // 625 lines at 14 MHz, 25 fps: 560000 samples per frame.
        assert_eq!(p.frame_samples(), 560_000);

        let mut out = Vec::new();
        for _ in 0..625 {
            p.next_line_iq(&mut out).unwrap();
        }
        assert_eq!(out.len(), 560_000 * 2);
    }

    #[test]
    fn videocrypt_free_registers() {
        let p = pipeline("pal-i", 14_000_000, |c| {
            c.features.videocrypt = Some("free".into());
        });
        assert!(p.processor_names().contains(&"videocrypt"));
    }

    #[test]
    fn scrambled_line_differs_from_clear() {
        let mut clear = pipeline("pal", 14_000_000, |_| {});
        let mut scrambled = pipeline("pal", 14_000_000, |c| {
            c.features.videocrypt = Some("free".into());
        });

        let mut a = Vec::new();
        let mut b = Vec::new();
        // Line 100 is deep into the scrambled field.
        for _ in 0..100 {
            a.clear();
            b.clear();
            clear.next_line_iq(&mut a).unwrap();
            scrambled.next_line_iq(&mut b).unwrap();
        }
        assert_ne!(a, b);
    }

    #[test]
    fn mac_pipeline_with_eurocrypt_builds() {
        let p = pipeline("d2mac", 10_125_000, |c| {
            c.features.eurocrypt = Some("cplus".into());
        });
        assert!(p.processor_names().contains(&"mac"));
    }
}
