//! The line processor contract.
//!
//! A processor is a named per-line transform that runs after the
//! rasteriser. It sees the `window()` most recent lines through the
//! ring (offset 0 = the line just rendered) and may rewrite any of
//! them. Delay-based transforms write the oldest line; prompt
//! transforms write the current one.

use super::engine::EngineState;
use super::line::LineRing;
use crate::errors::Result;

pub trait LineProcessor: Send {
    fn name(&self) -> &'static str;

    /// How many recent lines this processor needs to see. The engine
    /// sizes the shared ring to the maximum across processors.
    fn window(&self) -> usize {
        1
    }

    /// Transform lines in the ring. Returns the number of lines
    /// finalised; always 1 in the current pipeline, the return value
    /// exists for future batching.
    fn process(&mut self, state: &mut EngineState, ring: &mut LineRing) -> Result<usize>;

    /// Per-frame audio transform hook, applied in processor order
    /// before the modulators see the PCM (e.g. Syster spectrum
    /// inversion).
    fn process_audio(&mut self, _pcm: &mut [i16]) {}

    /// Per-frame stereo PCM tap for processors that carry audio.
    fn write_audio(&mut self, _pcm: &[i16]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TestPatternSource;
    use crate::video::engine::VideoEngine;
    use crate::video::presets;

    struct Marker {
        seen: u32,
    }

    impl LineProcessor for Marker {
        fn name(&self) -> &'static str {
            "marker"
        }

        fn window(&self) -> usize {
            3
        }

        fn process(&mut self, _state: &mut EngineState, ring: &mut LineRing) -> Result<usize> {
            self.seen += 1;
            // Stamp the current line so the emission delay is visible.
            let l = ring.get_mut(0);
            l.set(0, l.number as i16);
            Ok(1)
        }
    }

    #[test]
    fn window_sizes_the_ring_and_delays_output() {
        let conf = presets::preset("pal").unwrap();
        let src = TestPatternSource::grey(100, 100, 32000);
        let mut e = VideoEngine::new(conf, 14_000_000, 14_000_000, Box::new(src)).unwrap();
        e.add_processor(Box::new(Marker { seen: 0 }));

        // With a 3-line window the emitted line lags by 2.
        let mut last = 0;
        for _ in 0..10 {
            last = e.next_line().unwrap().get(0);
        }
        assert_eq!(last, 8);
    }
}
