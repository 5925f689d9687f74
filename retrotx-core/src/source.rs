//! AV source contract.
//!
//! Demuxing and decoding live outside this crate; a source only has to
//! hand over planar YUV frames and interleaved stereo PCM at the rates
//! declared at init. A test-pattern source is provided for self-
//! contained operation and for the test suites.

use crate::dsp::Rational;
use crate::errors::{Result, SourceError, TxError};

/// One decoded video frame, 8-bit 4:4:4 planar YUV.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: usize,
    pub height: usize,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    pub pixel_aspect: Rational,
}

impl VideoFrame {
    pub fn filled(width: usize, height: usize, y: u8, u: u8, v: u8) -> Self {
        Self {
            width,
            height,
            y: vec![y; width * height],
            u: vec![u; width * height],
            v: vec![v; width * height],
            pixel_aspect: Rational::new(1, 1),
        }
    }

    /// 24-bit RGB of a pixel, for the engine's YIQ lookup. BT.601
    /// full-range conversion.
    #[inline]
    pub fn rgb(&self, x: usize, y: usize) -> u32 {
        let i = y * self.width + x;
        let yv = self.y[i] as f64;
        let u = self.u[i] as f64 - 128.0;
        let v = self.v[i] as f64 - 128.0;

        let r = (yv + 1.402 * v).clamp(0.0, 255.0) as u32;
        let g = (yv - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u32;
        let b = (yv + 1.772 * u).clamp(0.0, 255.0) as u32;

        (r << 16) | (g << 8) | b
    }
}

/// A source of frames and PCM. `read_audio` fills an interleaved
/// stereo buffer; returning `SourceError::Eof` from either call ends
/// the stream.
pub trait AvSource: Send {
    fn read_video(&mut self) -> Result<VideoFrame>;
    fn read_audio(&mut self, samples: &mut [i16]) -> Result<()>;
    fn audio_sample_rate(&self) -> u32;
}

/// Colour-bar test pattern with a stereo test tone.
pub struct TestPatternSource {
    width: usize,
    height: usize,
    frame: VideoFrame,
    tone_hz: f64,
    tone_level: f64,
    audio_rate: u32,
    phase: f64,
}

const BAR_RGB: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (0, 0, 0),
];

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f64;
    let g = g as f64;
    let b = b as f64;
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = (b - y) * 0.564 + 128.0;
    let v = (r - y) * 0.713 + 128.0;
    (
        y.clamp(0.0, 255.0) as u8,
        u.clamp(0.0, 255.0) as u8,
        v.clamp(0.0, 255.0) as u8,
    )
}

impl TestPatternSource {
    pub fn new(width: usize, height: usize, audio_rate: u32) -> Self {
        let mut frame = VideoFrame::filled(width, height, 0, 128, 128);
        for y in 0..height {
            for x in 0..width {
                let bar = x * 8 / width;
                let (py, pu, pv) = rgb_to_yuv(BAR_RGB[bar].0, BAR_RGB[bar].1, BAR_RGB[bar].2);
                let i = y * width + x;
                frame.y[i] = py;
                frame.u[i] = pu;
                frame.v[i] = pv;
            }
        }

        Self {
            width,
            height,
            frame,
            tone_hz: 1000.0,
            tone_level: 0.0,
            audio_rate,
            phase: 0.0,
        }
    }

    /// Constant mid-grey frame, used by the level tests.
    pub fn grey(width: usize, height: usize, audio_rate: u32) -> Self {
        let mut s = Self::new(width, height, audio_rate);
        s.frame = VideoFrame::filled(width, height, 128, 128, 128);
        s
    }

    pub fn with_tone(mut self, hz: f64, level: f64) -> Self {
        self.tone_hz = hz;
        self.tone_level = level;
        self
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

impl AvSource for TestPatternSource {
    fn read_video(&mut self) -> Result<VideoFrame> {
        Ok(self.frame.clone())
    }

    fn read_audio(&mut self, samples: &mut [i16]) -> Result<()> {
        let step = std::f64::consts::TAU * self.tone_hz / self.audio_rate as f64;
        for pair in samples.chunks_exact_mut(2) {
            let s = (self.phase.sin() * self.tone_level * 32767.0) as i16;
            pair[0] = s;
            pair[1] = s;
            self.phase += step;
            if self.phase > std::f64::consts::TAU {
                self.phase -= std::f64::consts::TAU;
            }
        }
        Ok(())
    }

    fn audio_sample_rate(&self) -> u32 {
        self.audio_rate
    }
}

impl AvSource for Box<dyn AvSource> {
    fn read_video(&mut self) -> Result<VideoFrame> {
        (**self).read_video()
    }

    fn read_audio(&mut self, samples: &mut [i16]) -> Result<()> {
        (**self).read_audio(samples)
    }

    fn audio_sample_rate(&self) -> u32 {
        (**self).audio_sample_rate()
    }
}

/// Wraps a source so that EOF freezes the last frame instead of ending
/// the stream. Audio is muted after EOF.
pub struct FreezeFrameSource<S: AvSource> {
    inner: S,
    last: Option<VideoFrame>,
    eof: bool,
}

impl<S: AvSource> FreezeFrameSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            last: None,
            eof: false,
        }
    }
}

impl<S: AvSource> AvSource for FreezeFrameSource<S> {
    fn read_video(&mut self) -> Result<VideoFrame> {
        if !self.eof {
            match self.inner.read_video() {
                Ok(f) => {
                    self.last = Some(f.clone());
                    return Ok(f);
                }
                Err(TxError::Source(SourceError::Eof)) => {
                    self.eof = true;
                }
                Err(e) => return Err(e),
            }
        }
        self.last
            .clone()
            .ok_or(TxError::Source(SourceError::Eof))
    }

    fn read_audio(&mut self, samples: &mut [i16]) -> Result<()> {
        if self.eof {
            samples.fill(0);
            return Ok(());
        }
        match self.inner.read_audio(samples) {
            Ok(()) => Ok(()),
            Err(TxError::Source(SourceError::Eof)) => {
                self.eof = true;
                samples.fill(0);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn audio_sample_rate(&self) -> u32 {
        self.inner.audio_sample_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_have_eight_levels() {
        let mut src = TestPatternSource::new(160, 8, 32000);
        let f = src.read_video().unwrap();
        let mut lumas: Vec<u8> = (0..8).map(|b| f.y[b * 20 + 10]).collect();
        lumas.dedup();
        assert_eq!(lumas.len(), 8);
        assert!(lumas[0] > lumas[7]);
    }

    #[test]
    fn tone_is_stereo_and_bounded() {
        let mut src = TestPatternSource::new(16, 4, 32000).with_tone(1000.0, 1.0);
        let mut buf = vec![0i16; 640];
        src.read_audio(&mut buf).unwrap();
        assert!(buf.chunks_exact(2).all(|p| p[0] == p[1]));
        assert!(buf.iter().any(|&s| s > 30000));
    }
}
