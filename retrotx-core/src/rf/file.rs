//! File and stdout sink.
//!
//! Writes the IQ stream in one of six sample formats, real or complex
//! interleaved, host byte order. Real modes drop the Q lane and scale
//! I into the target range.

use super::RadioSink;
use crate::errors::{Result, SinkError, SourceError, TxError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Int32,
    Float32,
}

impl FileFormat {
    pub fn from_id(id: &str) -> Option<Self> {
        Some(match id {
            "uint8" | "u8" => Self::Uint8,
            "int8" | "s8" => Self::Int8,
            "uint16" | "u16" => Self::Uint16,
            "int16" | "s16" => Self::Int16,
            "int32" | "s32" => Self::Int32,
            "float" | "float32" | "f32" => Self::Float32,
            _ => return None,
        })
    }
}

pub struct FileSink {
    out: BufWriter<Box<dyn Write + Send>>,
    format: FileFormat,
    complex: bool,
    buf: Vec<u8>,
}

impl FileSink {
    /// `-` writes to stdout.
    pub fn create(path: &str, format: FileFormat, complex: bool) -> Result<Self> {
        let out: Box<dyn Write + Send> = if path == "-" {
            Box::new(std::io::stdout())
        } else {
            Box::new(File::create(Path::new(path)).map_err(|e| {
                TxError::Source(SourceError::Open {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
            })?)
        };

        Ok(Self {
            out: BufWriter::with_capacity(1 << 16, out),
            format,
            complex,
            buf: Vec::new(),
        })
    }

    fn convert(&mut self, iq: &[i16]) {
        self.buf.clear();

        macro_rules! push {
            ($pair:ident, $write:expr) => {
                for $pair in iq.chunks_exact(2) {
                    $write
                }
            };
        }

        let complex = self.complex;
        let buf = &mut self.buf;

        match self.format {
            FileFormat::Uint8 => push!(p, {
                buf.push((((p[0] as i32 - i16::MIN as i32) >> 8) & 0xFF) as u8);
                if complex {
                    buf.push((((p[1] as i32 - i16::MIN as i32) >> 8) & 0xFF) as u8);
                }
            }),
            FileFormat::Int8 => push!(p, {
                buf.push((p[0] >> 8) as u8);
                if complex {
                    buf.push((p[1] >> 8) as u8);
                }
            }),
            FileFormat::Uint16 => push!(p, {
                buf.extend_from_slice(&(((p[0] as i32) - i16::MIN as i32) as u16).to_ne_bytes());
                if complex {
                    buf.extend_from_slice(
                        &(((p[1] as i32) - i16::MIN as i32) as u16).to_ne_bytes(),
                    );
                }
            }),
            FileFormat::Int16 => push!(p, {
                buf.extend_from_slice(&p[0].to_ne_bytes());
                if complex {
                    buf.extend_from_slice(&p[1].to_ne_bytes());
                }
            }),
            FileFormat::Int32 => push!(p, {
                buf.extend_from_slice(&(((p[0] as i32) << 16) | (p[0] as u16 as i32)).to_ne_bytes());
                if complex {
                    buf.extend_from_slice(
                        &(((p[1] as i32) << 16) | (p[1] as u16 as i32)).to_ne_bytes(),
                    );
                }
            }),
            FileFormat::Float32 => push!(p, {
                buf.extend_from_slice(&(p[0] as f32 / 32767.0).to_ne_bytes());
                if complex {
                    buf.extend_from_slice(&(p[1] as f32 / 32767.0).to_ne_bytes());
                }
            }),
        }
    }
}

impl RadioSink for FileSink {
    fn write_iq(&mut self, iq: &[i16]) -> Result<()> {
        self.convert(iq);
        self.out.write_all(&self.buf).map_err(|e| {
            TxError::Sink(SinkError::WriteFailed {
                reason: e.to_string(),
            })
        })
    }

    fn close(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| {
            TxError::Sink(SinkError::WriteFailed {
                reason: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(format: FileFormat, complex: bool, iq: &[i16]) -> Vec<u8> {
        let out: Box<dyn Write + Send> = Box::new(std::io::sink());
        let mut sink = FileSink {
            out: BufWriter::new(out),
            format,
            complex,
            buf: Vec::new(),
        };
        sink.convert(iq);
        sink.buf
    }

    #[test]
    fn uint8_real_scales_and_drops_q() {
        let out = convert(FileFormat::Uint8, false, &[0, 1234, i16::MIN, 99, i16::MAX, -7]);
        assert_eq!(out, vec![128, 0, 255]);
    }

    #[test]
    fn int16_complex_is_passthrough() {
        let out = convert(FileFormat::Int16, true, &[100, -100]);
        assert_eq!(out.len(), 4);
        let i = i16::from_ne_bytes([out[0], out[1]]);
        let q = i16::from_ne_bytes([out[2], out[3]]);
        assert_eq!((i, q), (100, -100));
    }

    #[test]
    fn int32_replicates_sample_in_both_halves() {
        let out = convert(FileFormat::Int32, false, &[0x1234, 0]);
        let v = i32::from_ne_bytes(out[..4].try_into().unwrap());
        assert_eq!(v, 0x1234_1234);
    }

    #[test]
    fn float_is_normalised() {
        let out = convert(FileFormat::Float32, false, &[i16::MAX, 0]);
        let v = f32::from_ne_bytes(out[..4].try_into().unwrap());
        assert!((v - 1.0).abs() < 1e-4);
    }
}
