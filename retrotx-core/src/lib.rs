//! retrotx core library
//!
//! Synthesises baseband and low-IF analogue television signals:
//! composite video, audio subcarriers and conditional-access data,
//! streamed as interleaved int16 IQ to a file or SDR sink. The
//! line-level pipeline reproduces legacy broadcast and pay-TV
//! standards closely enough for period decoders and descramblers to
//! lock onto the output.

pub mod audio;
pub mod ca;
pub mod clock;
pub mod config;
pub mod dsp;
pub mod errors;
pub mod mac;
pub mod mux;
pub mod pipeline;
pub mod rf;
pub mod source;
pub mod vbi;
pub mod video;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::VideoConfig;
pub use errors::{Result, TxError};
pub use mux::{run_channels, ChannelSpec, MuxStats};
pub use pipeline::{build_pipeline, ChannelPipeline};
pub use rf::{FileFormat, FileSink, RadioSink};
pub use source::{AvSource, TestPatternSource, VideoFrame};
