//! TOML channel preset loading.

use color_eyre::eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::path::Path;

/// One channel entry in a multi-channel preset file.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Standard preset id (e.g. `pal-i`).
    pub mode: String,
    /// Frequency offset within the wideband output, Hz.
    #[serde(default)]
    pub offset: i64,
    /// Overall level for this channel.
    pub level: Option<f64>,
    #[serde(default)]
    pub teletext: Option<String>,
    #[serde(default)]
    pub wss: Option<String>,
    #[serde(default)]
    pub videocrypt: Option<String>,
    #[serde(default)]
    pub videocrypt2: Option<String>,
    #[serde(default)]
    pub videocrypts: Option<String>,
    #[serde(default)]
    pub syster: Option<String>,
    #[serde(default)]
    pub systercnr: Option<String>,
    #[serde(default)]
    pub systeraudio: bool,
    #[serde(default)]
    pub d11: Option<String>,
    #[serde(default)]
    pub eurocrypt: Option<String>,
    #[serde(default)]
    pub acp: bool,
    #[serde(default)]
    pub vits: bool,
    #[serde(default)]
    pub vitc: bool,
    #[serde(default)]
    pub cc608: bool,
    #[serde(default)]
    pub sis: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresetFile {
    pub sample_rate: Option<u32>,
    pub output: Option<String>,
    #[serde(rename = "channel")]
    pub channels: Vec<ChannelConfig>,
}

impl PresetFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        let preset: PresetFile =
            toml::from_str(&text).wrap_err_with(|| format!("parsing {}", path.display()))?;
        if preset.channels.is_empty() {
            return Err(eyre!("{}: no channels defined", path.display()));
        }
        Ok(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_channel_preset() {
        let text = r#"
            sample_rate = 16000000

            [[channel]]
            mode = "pal-i"
            offset = -4000000
            teletext = "pages/"

            [[channel]]
            mode = "pal-i"
            offset = 4000000
            videocrypt = "free"
        "#;
        let p: PresetFile = toml::from_str(text).unwrap();
        assert_eq!(p.channels.len(), 2);
        assert_eq!(p.channels[0].offset, -4_000_000);
        assert_eq!(p.channels[1].videocrypt.as_deref(), Some("free"));
    }
}
