use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::RecognitionSettings;

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = option_env!("FACECAM_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    ProjectDirs::from("", "", "facecam")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("facecam.toml"))
});

pub static MODEL_DIR: Lazy<PathBuf> = Lazy::new(|| {
    PathBuf::from(option_env!("FACECAM_MODEL_DIR").unwrap_or("/usr/local/share/facecam/models"))
});

/// How recognized faces are colored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// Green for every known face.
    Fixed,
    /// A stable color per identity.
    PerIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    /// Requested capture mode, `[width, height]`
    pub resolution: Option<[u32; 2]>,
    pub faces_dir: PathBuf,
    /// Largest face distance still accepted as a match
    pub tolerance: f32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    /// Recognize every Nth frame; unset means 2 with `background`, else 1
    pub process_every: Option<u32>,
    /// Downscale factor applied before detection
    pub detect_scale: f32,
    /// Run recognition on a worker thread
    pub background: bool,
    pub font: Option<PathBuf>,
    pub window_title: String,
    pub color_mode: ColorMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            resolution: None,
            faces_dir: PathBuf::from("image_recognition"),
            tolerance: crate::matcher::DEFAULT_TOLERANCE,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            detector_model: MODEL_DIR.join(facecam_vision::model::DETECTOR_MODEL_FILE),
            recognizer_model: MODEL_DIR.join(facecam_vision::model::RECOGNIZER_MODEL_FILE),
            process_every: None,
            detect_scale: 1.0,
            background: false,
            font: None,
            window_title: "Video".to_string(),
            color_mode: ColorMode::Fixed,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.process_every == Some(0) {
            anyhow::bail!("process_every must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            anyhow::bail!(
                "nms_threshold must be in [0, 1], got {}",
                self.nms_threshold
            );
        }
        if !(self.detect_scale > 0.0 && self.detect_scale <= 1.0) {
            anyhow::bail!("detect_scale must be in (0, 1], got {}", self.detect_scale);
        }
        if !(self.tolerance >= 0.0) {
            anyhow::bail!("tolerance must be non-negative, got {}", self.tolerance);
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            anyhow::bail!(
                "score_threshold must be in [0, 1], got {}",
                self.score_threshold
            );
        }
        Ok(())
    }

    /// Effective recognition interval: background recognition alternates
    /// processed and passthrough frames unless told otherwise.
    pub fn frame_interval(&self) -> u32 {
        self.process_every.unwrap_or(if self.background { 2 } else { 1 })
    }

    pub fn recognition(&self) -> RecognitionSettings {
        RecognitionSettings {
            detection: self.detection(),
            tolerance: self.tolerance,
        }
    }

    pub fn detection(&self) -> DetectionSettings {
        DetectionSettings {
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
            scale: self.detect_scale,
        }
    }
}

/// Detector knobs shared by the gallery loader and the live loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSettings {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub scale: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Config::default().detection()
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
