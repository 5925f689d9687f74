//! RF backend: the sink contract, the block FIFO bridging the
//! synchronous pipeline to device callbacks, the output modulator and
//! the file sink.

pub mod fifo;
pub mod file;
pub mod modulator;

pub use fifo::{Fifo, FifoReader, FifoWriter, ReadResult};
pub use file::{FileFormat, FileSink};
pub use modulator::OutputModulator;

use crate::errors::Result;

/// A radio or file sink. IQ samples are interleaved int16 pairs;
/// sinks that only take real samples use the I lane.
pub trait RadioSink: Send {
    fn write_iq(&mut self, iq: &[i16]) -> Result<()>;

    /// Optional on-device audio path (e.g. a baseband sound channel).
    fn write_audio(&mut self, _pcm: &[i16]) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()>;
}

/// Sink that discards everything; used by tests and dry runs.
pub struct NullSink {
    pub samples: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self { samples: 0 }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioSink for NullSink {
    fn write_iq(&mut self, iq: &[i16]) -> Result<()> {
        self.samples += (iq.len() / 2) as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
