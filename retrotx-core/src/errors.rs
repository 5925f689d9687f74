//! Error types shared across the synthesis pipeline.

use thiserror::Error;

/// Top-level error type for all retrotx operations.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("FIFO error: {0}")]
    Fifo(#[from] FifoError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("conditional access error: {0}")]
    Ca(#[from] CaError),

    #[error("out of memory: {context}")]
    OutOfMemory { context: &'static str },
}

/// Errors raised while validating or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown mode '{id}'")]
    UnknownMode { id: String },

    #[error("invalid sample rate {rate} Hz")]
    InvalidSampleRate { rate: u32 },

    #[error("pixel rate {pixel_rate} Hz exceeds sample rate {sample_rate} Hz")]
    RateMismatch { pixel_rate: u32, sample_rate: u32 },

    #[error("{feature} is not supported on a {lines}-line raster")]
    UnsupportedRaster { feature: &'static str, lines: u32 },

    #[error("invalid level configuration: {reason}")]
    InvalidLevels { reason: String },

    #[error("invalid option '{option}': {reason}")]
    InvalidOption { option: &'static str, reason: String },
}

/// FIFO lifecycle errors.
#[derive(Debug, Error)]
pub enum FifoError {
    #[error("FIFO is closed")]
    Closed,

    #[error("FIFO requires at least {min} blocks, requested {requested}")]
    TooSmall { min: usize, requested: usize },
}

/// AV source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("end of stream")]
    Eof,

    #[error("source read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("{path}: {reason}")]
    Open { path: String, reason: String },
}

/// Radio / file sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("sink closed")]
    Closed,
}

/// Conditional-access configuration errors.
#[derive(Debug, Error)]
pub enum CaError {
    #[error("unknown provider '{id}'")]
    UnknownProvider { id: String },

    #[error("no EMM mode matches provider '{id}'")]
    NoEmmMode { id: String },

    #[error("card key mismatch for provider '{id}'")]
    CardKeyMismatch { id: String },
}

/// Result type alias for retrotx operations.
pub type Result<T> = std::result::Result<T, TxError>;

impl From<std::io::Error> for TxError {
    fn from(e: std::io::Error) -> Self {
        TxError::Sink(SinkError::WriteFailed {
            reason: e.to_string(),
        })
    }
}
