use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const FFMPEG_PATH_ENV: &str = "CLIPNOTE_FFMPEG";
pub const FFMPEG_MODE_ENV: &str = "CLIPNOTE_FFMPEG_MODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FfmpegMode {
    /// Use the system binary.
    #[default]
    System,
    /// Use a downloaded binary (requires the `sidecar_ffmpeg` feature).
    Sidecar,
}

impl FfmpegMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Sidecar => "sidecar",
        }
    }
}

impl FromStr for FfmpegMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "sidecar" => Ok(Self::Sidecar),
            other => bail!("unknown ffmpeg mode '{other}' (expected 'system' or 'sidecar')"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EncoderSettings {
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub pix_fmt: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_owned(),
            preset: "ultrafast".to_owned(),
            crf: 28,
            pix_fmt: "yuv420p".to_owned(),
            audio_codec: "aac".to_owned(),
            audio_bitrate: "128k".to_owned(),
        }
    }
}

impl EncoderSettings {
    fn validate(&self) -> Result<()> {
        if self.crf > 51 {
            bail!("encoder.crf must be in 0..=51, got {}", self.crf);
        }
        for (field, value) in [
            ("video_codec", &self.video_codec),
            ("preset", &self.preset),
            ("pix_fmt", &self.pix_fmt),
            ("audio_codec", &self.audio_codec),
            ("audio_bitrate", &self.audio_bitrate),
        ] {
            if value.trim().is_empty() {
                bail!("encoder.{field} must not be empty");
            }
        }
        Ok(())
    }
}

/// Sizes and fonts of burned-in overlays, in output pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OverlayStyle {
    pub caption_strip_height: u32,
    pub strip_color: String,
    pub caption_font_size: u32,
    pub caption_box_border: u32,
    pub caption_margin: u32,
    pub detail_font_size: u32,
    pub detail_box_opacity: f64,
    pub default_font: String,
    /// Font family name to font file. Families listed here are drawn with `fontfile=`.
    pub font_files: BTreeMap<String, PathBuf>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            caption_strip_height: 150,
            strip_color: "white".to_owned(),
            caption_font_size: 70,
            caption_box_border: 20,
            caption_margin: 20,
            detail_font_size: 16,
            detail_box_opacity: 0.7,
            default_font: "Noto Sans JP".to_owned(),
            font_files: BTreeMap::new(),
        }
    }
}

impl OverlayStyle {
    fn validate(&self) -> Result<()> {
        if self.caption_strip_height == 0 {
            bail!("overlay.caption_strip_height must be > 0");
        }
        if self.caption_font_size == 0 || self.detail_font_size == 0 {
            bail!("overlay font sizes must be > 0");
        }
        if !(0.0..=1.0).contains(&self.detail_box_opacity) {
            bail!(
                "overlay.detail_box_opacity must be in [0, 1], got {}",
                self.detail_box_opacity
            );
        }
        Ok(())
    }

    pub fn font_file(&self, family: &str) -> Option<&Path> {
        self.font_files.get(family).map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FfmpegSettings {
    pub mode: FfmpegMode,
    /// Explicit binary for system mode. Looked up on `PATH` when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RenderConfig {
    pub encoder: EncoderSettings,
    pub overlay: OverlayStyle,
    pub ffmpeg: FfmpegSettings,
}

impl RenderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(
                "failed to parse config {} at {}: {}",
                path.display(),
                location,
                error
            )
        })?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()?;
        self.overlay.validate()
    }

    /// Applies ffmpeg overrides. CLI wins over env, env wins over the file.
    pub fn apply_overrides(
        &mut self,
        cli_mode: Option<FfmpegMode>,
        env_mode: Option<String>,
        env_path: Option<String>,
    ) -> Result<()> {
        if let Some(mode) = resolve_mode_override(cli_mode, env_mode)? {
            self.ffmpeg.mode = mode;
        }
        if let Some(path) = env_path.filter(|path| !path.trim().is_empty()) {
            self.ffmpeg.path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn apply_env_overrides(&mut self, cli_mode: Option<FfmpegMode>) -> Result<()> {
        self.apply_overrides(
            cli_mode,
            std::env::var(FFMPEG_MODE_ENV).ok(),
            std::env::var(FFMPEG_PATH_ENV).ok(),
        )
    }
}

/// CLI wins over env. Returns None when neither is set.
pub fn resolve_mode_override(
    cli_arg: Option<FfmpegMode>,
    env_var: Option<String>,
) -> Result<Option<FfmpegMode>> {
    if cli_arg.is_some() {
        return Ok(cli_arg);
    }
    match env_var.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {FFMPEG_MODE_ENV}")),
    }
}
