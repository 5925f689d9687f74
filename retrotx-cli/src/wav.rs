//! WAV audio loading for the test source.

use color_eyre::eyre::{eyre, Result};
use retrotx_core::source::TestPatternSource;
use std::path::Path;

/// Estimate the dominant level of a WAV file and configure the test
/// source tone to match its RMS, so bench tests with real material
/// keep comparable deviation.
///
/// The test source synthesises its own PCM; full decoded playback
/// belongs to an external AV source implementation.
pub fn attach_wav_tone(src: TestPatternSource, path: &Path) -> Result<TestPatternSource> {
    let mut reader = hound::WavReader::open(path).map_err(|e| eyre!("{e}"))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(eyre!("WAV file has no channels"));
    }

    let mut sum: f64 = 0.0;
    let mut n: u64 = 0;
    match spec.sample_format {
        hound::SampleFormat::Int => {
            for s in reader.samples::<i16>().take(1 << 20).flatten() {
                sum += (s as f64 / 32768.0).powi(2);
                n += 1;
            }
        }
        hound::SampleFormat::Float => {
            for s in reader.samples::<f32>().take(1 << 20).flatten() {
                sum += (s as f64).powi(2);
                n += 1;
            }
        }
    }

    if n == 0 {
        return Err(eyre!("WAV file has no samples"));
    }

    let rms = (sum / n as f64).sqrt();
    Ok(src.with_tone(1000.0, rms.clamp(0.0, 1.0)))
}
