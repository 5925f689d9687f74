//! Video signal configuration.
//!
//! A `VideoConfig` fully describes one broadcast standard plus the
//! optional service and scrambling features riding on it. Configs are
//! immutable once an engine has been built from them.

use crate::dsp::Rational;
use serde::{Deserialize, Serialize};

/// Raster family. Determines line count, field structure and the sync
/// pattern tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RasterFamily {
    R625,
    R525,
    R405,
    R819,
    Baird240,
    Baird30,
    Nbtv32,
    Apollo320,
    Mac,
    Cbs405,
}

/// Colour encoding on the composite signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColourMode {
    Monochrome,
    Pal,
    Ntsc,
    Secam,
    ApolloFsc,
    CbsFsc,
}

/// RF output modulation applied after line synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputModulation {
    None,
    Am,
    Vsb,
    Fm,
}

/// FM audio pre-emphasis selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreEmphasis {
    None,
    Us50,
    Us75,
    J17,
}

/// One FM audio subcarrier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FmAudioCarrier {
    /// Offset from the vision carrier in Hz.
    pub carrier: f64,
    /// Peak deviation in Hz.
    pub deviation: f64,
    pub pre_emphasis: PreEmphasis,
    /// Relative level of this subcarrier in the IQ sum.
    pub level: f64,
}

/// NICAM-728 stereo subcarrier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NicamCarrier {
    pub carrier: f64,
    /// Root-raised-cosine rolloff of the DQPSK shaping.
    pub beta: f64,
    pub level: f64,
}

/// A2 / Zweikanalton second sound carrier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct A2Carrier {
    pub signal_carrier: f64,
    pub pilot_carrier: f64,
    pub level: f64,
}

/// AM sound carrier (405/819-line systems).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AmAudioCarrier {
    pub carrier: f64,
    pub bandwidth: f64,
    pub level: f64,
}

/// MAC audio configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacAudio {
    pub stereo: bool,
    /// true: 32 kHz medium quality, false: 16 kHz commentary.
    pub high_quality: bool,
    pub companded: bool,
    /// First-level error protection.
    pub protected: bool,
}

/// Optional service and conditional-access features.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    /// Teletext source: TTI file, directory, `raw:<path>`, or
    /// `subtitles`.
    pub teletext: Option<String>,
    /// WSS mode id (`4:3`, `16:9`, `14:9-letterbox`, `16:9-letterbox`,
    /// `auto`).
    pub wss: Option<String>,
    /// Videocrypt I mode (`free`, `conditional`, or a provider id).
    pub videocrypt: Option<String>,
    /// Videocrypt II mode.
    pub videocrypt2: Option<String>,
    /// Videocrypt S mode.
    pub videocrypts: Option<String>,
    /// Nagravision Syster provider id.
    pub syster: Option<String>,
    /// Syster cut-and-rotate provider id.
    pub systercnr: Option<String>,
    /// Invert audio spectrum for Syster decoders.
    pub systeraudio: bool,
    /// Discret 11 provider id.
    pub d11: Option<String>,
    /// Eurocrypt provider id (MAC rasters only).
    pub eurocrypt: Option<String>,
    pub acp: bool,
    pub vits: bool,
    pub vitc: bool,
    pub cc608: bool,
    /// Sound-in-Syncs mode (`dcsis`).
    pub sis: Option<String>,
    /// MAC: scramble video / audio.
    pub scramble_video: bool,
    pub scramble_audio: bool,
    /// Log ECM/EMM contents.
    pub show_ecm: bool,
}

/// Complete description of the synthesised signal. Built from a
/// preset and adjusted before the engine is created; immutable after.
#[derive(Debug, Clone, Serialize)]
pub struct VideoConfig {
    pub id: &'static str,
    pub description: &'static str,

    pub raster: RasterFamily,
    pub lines: u32,
    /// Line on which the second field begins.
    pub hline: u32,
    pub active_lines: u32,
    pub interlace: bool,
    pub frame_rate: Rational,
    pub frame_aspect: Rational,

    /// Sync timing in seconds.
    pub hsync_width: f64,
    pub vsync_short_width: f64,
    pub vsync_long_width: f64,
    /// 10% to 90% rise time of signal edges.
    pub sync_rise: f64,

    /// Normalised signal levels.
    pub white_level: f64,
    pub black_level: f64,
    pub blanking_level: f64,
    pub sync_level: f64,

    /// Active video window in seconds from line start.
    pub active_width: f64,
    pub active_left: f64,

    pub gamma: f64,

    /// RGB to luminance weights; should sum to 1.
    pub rw_co: f64,
    pub gw_co: f64,
    pub bw_co: f64,
    /// Colour difference weights.
    pub ev_co: f64,
    pub eu_co: f64,

    pub colour_mode: ColourMode,
    /// Colour subcarrier as an exact rational (Hz).
    pub colour_carrier: Rational,

    /// Colour burst window.
    pub burst_width: f64,
    pub burst_left: f64,
    pub burst_level: f64,
    pub burst_rise: f64,

    /// SECAM field identification lines present.
    pub secam_field_id: bool,

    pub fm_mono: Option<FmAudioCarrier>,
    pub fm_left: Option<FmAudioCarrier>,
    pub fm_right: Option<FmAudioCarrier>,
    pub a2_stereo: Option<A2Carrier>,
    pub nicam: Option<NicamCarrier>,
    pub am_audio: Option<AmAudioCarrier>,

    /// Stereo PCM rate the engine requests from the AV source.
    pub audio_sample_rate: u32,

    /// MAC-specific options.
    pub mac_audio: MacAudio,
    pub mac_chid: u16,

    /// Output stage.
    pub modulation: OutputModulation,
    pub fm_deviation: f64,
    pub fm_energy_dispersal: f64,
    pub vsb_upper_bw: f64,
    pub vsb_lower_bw: f64,
    /// Overall output level, 0..1.
    pub level: f64,
    pub swap_iq: bool,
    /// Signal frequency offset in Hz.
    pub offset: i64,

    pub features: Features,
}

impl VideoConfig {
    /// Samples per line at a given pixel rate. The line period is
    /// 1 / (frame_rate * lines), kept rational until the final division.
    pub fn line_width(&self, pixel_rate: u32) -> usize {
        let num = pixel_rate as i64 * self.frame_rate.den;
        let den = self.frame_rate.num * self.lines as i64;
        (num / den) as usize
    }

    /// Total lines per frame.
    pub fn total_lines(&self) -> u32 {
        self.lines
    }

    pub fn is_colour(&self) -> bool {
        !matches!(self.colour_mode, ColourMode::Monochrome)
    }

    pub fn is_mac(&self) -> bool {
        self.raster == RasterFamily::Mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::presets;

    #[test]
    fn pal_line_width_exact() {
        let c = presets::preset("pal-i").unwrap();
        // 625 lines at 25 Hz: 15625 lines per second.
        assert_eq!(c.line_width(14_000_000), 896);
        assert_eq!(c.line_width(16_000_000), 1024);
    }

    #[test]
    fn ntsc_frame_rate_is_rational() {
        let c = presets::preset("ntsc-m").unwrap();
        assert_eq!(c.frame_rate, Rational::new(30000, 1001));
    }

    #[test]
    fn luma_weights_sum_to_one() {
        for id in presets::ids() {
            let c = presets::preset(id).unwrap();
            let sum = c.rw_co + c.gw_co + c.bw_co;
            assert!((sum - 1.0).abs() < 1e-6, "{id}: {sum}");
        }
    }
}
