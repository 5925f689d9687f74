//! Built-in broadcast standard presets.
//!
//! Each preset captures the timing, level and colour parameters of one
//! transmission standard. Values follow the published standards; the
//! more obscure mechanical-era rasters use the timings commonly quoted
//! for them.

use crate::config::*;
use crate::dsp::Rational;
use crate::errors::{ConfigError, Result, TxError};

fn base_625() -> VideoConfig {
    VideoConfig {
        id: "",
        description: "",
        raster: RasterFamily::R625,
        lines: 625,
        hline: 313,
        active_lines: 576,
        interlace: true,
        frame_rate: Rational::new(25, 1),
        frame_aspect: Rational::new(4, 3),

        hsync_width: 4.7e-6,
        vsync_short_width: 2.35e-6,
        vsync_long_width: 27.3e-6,
        sync_rise: 300e-9,

        white_level: 0.70,
        black_level: 0.00,
        blanking_level: 0.00,
        sync_level: -0.30,

        active_width: 52e-6,
        active_left: 9.7e-6,

        gamma: 1.0,

        rw_co: 0.299,
        gw_co: 0.587,
        bw_co: 0.114,
        ev_co: 0.877,
        eu_co: 0.493,

        colour_mode: ColourMode::Pal,
        colour_carrier: Rational::new(17_734_475, 4),

        burst_width: 2.25e-6,
        burst_left: 5.6e-6,
        burst_level: 3.0 / 7.0,
        burst_rise: 300e-9,

        secam_field_id: false,

        fm_mono: None,
        fm_left: None,
        fm_right: None,
        a2_stereo: None,
        nicam: None,
        am_audio: None,
        audio_sample_rate: 32000,

        mac_audio: MacAudio {
            stereo: true,
            high_quality: true,
            companded: false,
            protected: false,
        },
        mac_chid: 0xE8B5,

        modulation: OutputModulation::Vsb,
        fm_deviation: 16e6,
        fm_energy_dispersal: 0.0,
        vsb_upper_bw: 5.5e6,
        vsb_lower_bw: 1.25e6,
        level: 1.0,
        swap_iq: false,
        offset: 0,

        features: Features::default(),
    }
}

fn pal_i() -> VideoConfig {
    VideoConfig {
        id: "pal-i",
        description: "PAL colour, 25 fps, 625 lines, AM (complex), 6.0 MHz FM audio",
        fm_mono: Some(FmAudioCarrier {
            carrier: 6.0e6,
            deviation: 50e3,
            pre_emphasis: PreEmphasis::Us50,
            level: 0.22,
        }),
        nicam: Some(NicamCarrier {
            carrier: 6.552e6,
            beta: 1.0,
            level: 0.07,
        }),
        vsb_upper_bw: 5.5e6,
        vsb_lower_bw: 1.25e6,
        ..base_625()
    }
}

fn pal_bg() -> VideoConfig {
    VideoConfig {
        id: "pal-bg",
        description: "PAL colour, 25 fps, 625 lines, AM (complex), 5.5 MHz FM audio",
        fm_mono: Some(FmAudioCarrier {
            carrier: 5.5e6,
            deviation: 50e3,
            pre_emphasis: PreEmphasis::Us50,
            level: 0.22,
        }),
        a2_stereo: Some(A2Carrier {
            signal_carrier: 5.7421875e6,
            pilot_carrier: 54.6875e3,
            level: 0.049,
        }),
        vsb_upper_bw: 5.0e6,
        vsb_lower_bw: 0.75e6,
        ..base_625()
    }
}

fn pal_fm() -> VideoConfig {
    VideoConfig {
        id: "pal-fm",
        description: "PAL colour, 25 fps, 625 lines, FM (complex), 6.5 MHz FM audio",
        modulation: OutputModulation::Fm,
        fm_deviation: 16e6,
        fm_energy_dispersal: 2.0,
        fm_mono: Some(FmAudioCarrier {
            carrier: 6.5e6,
            deviation: 85e3,
            pre_emphasis: PreEmphasis::Us50,
            level: 0.19,
        }),
        ..base_625()
    }
}

fn pal_composite() -> VideoConfig {
    VideoConfig {
        id: "pal",
        description: "PAL colour, 25 fps, 625 lines, unmodulated (real)",
        modulation: OutputModulation::None,
        ..base_625()
    }
}

fn ntsc_m() -> VideoConfig {
    VideoConfig {
        id: "ntsc-m",
        description: "NTSC colour, 30/1.001 fps, 525 lines, AM (complex), 4.5 MHz FM audio",
        raster: RasterFamily::R525,
        lines: 525,
        hline: 263,
        active_lines: 480,
        frame_rate: Rational::new(30000, 1001),

        hsync_width: 4.7e-6,
        vsync_short_width: 2.3e-6,
        vsync_long_width: 27.1e-6,

        white_level: 100.0 / 140.0,
        black_level: 7.5 / 140.0,
        blanking_level: 0.0,
        sync_level: -40.0 / 140.0,

        active_width: 52.66e-6,
        active_left: 9.2e-6,

        ev_co: 0.877,
        eu_co: 0.493,

        colour_mode: ColourMode::Ntsc,
        colour_carrier: Rational::new(315_000_000, 88),

        burst_width: 2.5e-6,
        burst_left: 5.3e-6,
        burst_level: 4.0 / 10.0,

        fm_mono: Some(FmAudioCarrier {
            carrier: 4.5e6,
            deviation: 25e3,
            pre_emphasis: PreEmphasis::Us75,
            level: 0.15,
        }),
        vsb_upper_bw: 4.2e6,
        vsb_lower_bw: 0.75e6,
        ..base_625()
    }
}

fn secam_l() -> VideoConfig {
    VideoConfig {
        id: "secam-l",
        description: "SECAM colour, 25 fps, 625 lines, AM (complex), 6.5 MHz AM audio",
        colour_mode: ColourMode::Secam,
        // Db rest carrier; the Dr carrier is derived in the engine.
        colour_carrier: Rational::new(4_250_000, 1),
        secam_field_id: true,
        am_audio: Some(AmAudioCarrier {
            carrier: 6.5e6,
            bandwidth: 15e3,
            level: 0.10,
        }),
        vsb_upper_bw: 6.0e6,
        vsb_lower_bw: 1.25e6,
        ..base_625()
    }
}

fn a405() -> VideoConfig {
    VideoConfig {
        id: "405",
        description: "System A (Baird), 25 fps, 405 lines, AM (complex), 3.5 MHz AM audio",
        raster: RasterFamily::R405,
        lines: 405,
        hline: 203,
        active_lines: 376,
        frame_rate: Rational::new(25, 1),

        hsync_width: 9.0e-6,
        vsync_short_width: 4.5e-6,
        vsync_long_width: 40.0e-6,
        sync_rise: 250e-9,

        active_width: 80.3e-6,
        active_left: 16.5e-6,

        colour_mode: ColourMode::Monochrome,
        colour_carrier: Rational::new(0, 1),
        burst_level: 0.0,

        am_audio: Some(AmAudioCarrier {
            carrier: -3.5e6,
            bandwidth: 10e3,
            level: 0.10,
        }),
        vsb_upper_bw: 3.0e6,
        vsb_lower_bw: 0.75e6,
        ..base_625()
    }
}

fn e819() -> VideoConfig {
    VideoConfig {
        id: "819",
        description: "System E (France), 25 fps, 819 lines, AM (complex)",
        raster: RasterFamily::R819,
        lines: 819,
        hline: 410,
        active_lines: 738,
        frame_rate: Rational::new(25, 1),

        hsync_width: 2.5e-6,
        vsync_short_width: 1.25e-6,
        vsync_long_width: 20.0e-6,
        sync_rise: 100e-9,

        active_width: 40.6e-6,
        active_left: 5.9e-6,

        colour_mode: ColourMode::Monochrome,
        colour_carrier: Rational::new(0, 1),
        burst_level: 0.0,

        am_audio: Some(AmAudioCarrier {
            carrier: -11.15e6,
            bandwidth: 10e3,
            level: 0.10,
        }),
        vsb_upper_bw: 10.4e6,
        vsb_lower_bw: 2.0e6,
        ..base_625()
    }
}

fn baird_240() -> VideoConfig {
    VideoConfig {
        id: "240",
        description: "Baird mechanical, 25 fps, 240 lines, AM (complex)",
        raster: RasterFamily::Baird240,
        lines: 240,
        hline: 240,
        active_lines: 220,
        interlace: false,
        frame_rate: Rational::new(25, 1),

        hsync_width: 20.0e-6,
        vsync_short_width: 0.0,
        vsync_long_width: 166.0e-6,
        sync_rise: 400e-9,

        white_level: 1.00,
        black_level: 0.40,
        blanking_level: 0.40,
        sync_level: 0.0,

        active_width: 140.0e-6,
        active_left: 25.0e-6,

        colour_mode: ColourMode::Monochrome,
        colour_carrier: Rational::new(0, 1),
        burst_level: 0.0,

        modulation: OutputModulation::Am,
        vsb_upper_bw: 1.0e6,
        vsb_lower_bw: 1.0e6,
        ..base_625()
    }
}

fn baird_30() -> VideoConfig {
    VideoConfig {
        id: "30",
        description: "Baird mechanical, 12.5 fps, 30 lines, AM (complex)",
        raster: RasterFamily::Baird30,
        lines: 30,
        hline: 30,
        active_lines: 30,
        interlace: false,
        frame_rate: Rational::new(25, 2),

        hsync_width: 0.0,
        vsync_short_width: 0.0,
        vsync_long_width: 0.0,
        sync_rise: 1000e-9,

        white_level: 1.00,
        black_level: 0.30,
        blanking_level: 0.30,
        sync_level: 0.30,

        active_width: 2.666e-3,
        active_left: 0.0,

        colour_mode: ColourMode::Monochrome,
        colour_carrier: Rational::new(0, 1),
        burst_level: 0.0,

        modulation: OutputModulation::Am,
        ..base_625()
    }
}

fn nbtv_32() -> VideoConfig {
    VideoConfig {
        id: "nbtv",
        description: "NBTV club standard, 12.5 fps, 32 lines, unmodulated (real)",
        raster: RasterFamily::Nbtv32,
        lines: 32,
        hline: 32,
        active_lines: 32,
        interlace: false,
        frame_rate: Rational::new(25, 2),

        hsync_width: 166.7e-6,
        vsync_short_width: 0.0,
        vsync_long_width: 0.0,
        sync_rise: 1000e-9,

        white_level: 1.00,
        black_level: 0.20,
        blanking_level: 0.20,
        sync_level: 0.0,

        active_width: 2.2e-3,
        active_left: 0.3e-3,

        colour_mode: ColourMode::Monochrome,
        colour_carrier: Rational::new(0, 1),
        burst_level: 0.0,

        modulation: OutputModulation::None,
        ..base_625()
    }
}

fn apollo_320() -> VideoConfig {
    VideoConfig {
        id: "apollo",
        description: "Apollo slow-scan, 10 fps, 320 lines, FM (complex)",
        raster: RasterFamily::Apollo320,
        lines: 320,
        hline: 320,
        active_lines: 312,
        interlace: false,
        frame_rate: Rational::new(10, 1),

        hsync_width: 20e-6,
        vsync_short_width: 0.0,
        vsync_long_width: 312.5e-6,
        sync_rise: 400e-9,

        active_width: 282.2e-6,
        active_left: 25.0e-6,

        colour_mode: ColourMode::Monochrome,
        colour_carrier: Rational::new(0, 1),
        burst_level: 0.0,

        modulation: OutputModulation::Fm,
        fm_deviation: 2e6,
        fm_mono: Some(FmAudioCarrier {
            carrier: 1.25e6,
            deviation: 25e3,
            pre_emphasis: PreEmphasis::None,
            level: 0.15,
        }),
        ..base_625()
    }
}

fn mac_common() -> VideoConfig {
    VideoConfig {
        id: "",
        description: "",
        raster: RasterFamily::Mac,
        lines: 625,
        hline: 313,
        active_lines: 576,
        interlace: true,
        frame_rate: Rational::new(25, 1),

        // MAC has no composite syncs; timing is packet driven. The
        // sync fields describe the clamp and run-in periods.
        hsync_width: 0.0,
        vsync_short_width: 0.0,
        vsync_long_width: 0.0,
        sync_rise: 140e-9,

        white_level: 0.5,
        black_level: -0.5,
        blanking_level: 0.0,
        sync_level: -0.5,

        active_width: 52e-6,
        active_left: 10.5e-6,

        colour_mode: ColourMode::Monochrome,
        colour_carrier: Rational::new(0, 1),
        burst_level: 0.0,

        modulation: OutputModulation::Fm,
        fm_deviation: 13.5e6,
        ..base_625()
    }
}

fn d_mac() -> VideoConfig {
    VideoConfig {
        id: "dmac",
        description: "D-MAC, 25 fps, 625 lines, FM (complex), 20.25 Mbit/s duobinary",
        ..mac_common()
    }
}

fn d2_mac() -> VideoConfig {
    VideoConfig {
        id: "d2mac",
        description: "D2-MAC, 25 fps, 625 lines, FM (complex), 10.125 Mbit/s duobinary",
        ..mac_common()
    }
}

fn cbs_405() -> VideoConfig {
    VideoConfig {
        id: "cbs405",
        description: "CBS field-sequential colour, 405 lines, AM (complex)",
        raster: RasterFamily::Cbs405,
        lines: 405,
        hline: 203,
        active_lines: 376,
        frame_rate: Rational::new(72, 1),

        hsync_width: 3.4e-6,
        vsync_short_width: 1.7e-6,
        vsync_long_width: 15.0e-6,
        sync_rise: 200e-9,

        active_width: 25.0e-6,
        active_left: 5.3e-6,

        colour_mode: ColourMode::CbsFsc,
        colour_carrier: Rational::new(0, 1),
        burst_level: 0.0,

        vsb_upper_bw: 4.2e6,
        vsb_lower_bw: 0.75e6,
        ..base_625()
    }
}

/// Preset ids in presentation order.
pub fn ids() -> &'static [&'static str] {
    &[
        "pal-i", "pal-bg", "pal-fm", "pal", "ntsc-m", "secam-l", "405", "819", "240", "30",
        "nbtv", "apollo", "dmac", "d2mac", "cbs405",
    ]
}

/// Look up a preset by id.
pub fn preset(id: &str) -> Result<VideoConfig> {
    let c = match id {
        "pal-i" => pal_i(),
        "pal-bg" | "pal-g" | "pal-b" => pal_bg(),
        "pal-fm" => pal_fm(),
        "pal" => pal_composite(),
        "ntsc-m" | "ntsc" => ntsc_m(),
        "secam-l" | "secam" => secam_l(),
        "405" | "a405" => a405(),
        "819" | "e819" => e819(),
        "240" => baird_240(),
        "30" => baird_30(),
        "nbtv" => nbtv_32(),
        "apollo" => apollo_320(),
        "dmac" => d_mac(),
        "d2mac" => d2_mac(),
        "cbs405" => cbs_405(),
        _ => {
            return Err(TxError::Config(ConfigError::UnknownMode {
                id: id.to_string(),
            }))
        }
    };
    Ok(c)
}
