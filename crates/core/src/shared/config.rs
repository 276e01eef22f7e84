use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Every recognized tunable of the service.
///
/// Missing fields in a config file fall back to the defaults below, so a file
/// only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// V4L2 device path or any URL ffmpeg can open.
    pub camera: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// JPEG quality of published frames, 1-100.
    pub jpeg_quality: u8,
    /// Factor applied to the grayscale frame before detection; 1.0 disables.
    pub detect_downscale: f64,
    /// Image pyramid step between detection scales (> 1.0).
    pub detector_scale_factor: f64,
    /// Minimum classifier score for a window to count as a face.
    pub detector_score_threshold: f64,
    /// Smallest face side searched for, in detection-image pixels.
    pub detector_min_size: u32,
    pub detector_model_path: Option<PathBuf>,
    pub enable_recognition: bool,
    /// Training-data root: one directory per label.
    pub data_dir: PathBuf,
    /// Maximum accepted recognition distance (lower is a closer match).
    pub recog_threshold: f64,
    /// Side length faces are normalized to before training and prediction.
    pub recog_input_size: u32,
    pub detect_every_n: u32,
    pub recog_every_n: u32,
    pub recog_min_side: u32,
    pub vote_window: usize,
    pub vote_require: usize,
    pub current_expire_secs: f64,
    pub stats_interval_secs: f64,
    pub print_stats: bool,
    pub capture_interval_ms: u64,
    pub capture_target_count: usize,
    pub stop_wait_secs: f64,
    /// TrueType font used for label overlays; labels are skipped without it.
    pub overlay_font_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            jpeg_quality: 80,
            detect_downscale: 0.4,
            detector_scale_factor: 1.2,
            detector_score_threshold: 2.0,
            detector_min_size: 36,
            detector_model_path: None,
            enable_recognition: true,
            data_dir: PathBuf::from("faces"),
            recog_threshold: 11.0,
            recog_input_size: 96,
            detect_every_n: 1,
            recog_every_n: 2,
            recog_min_side: 48,
            vote_window: 5,
            vote_require: 3,
            current_expire_secs: 1.5,
            stats_interval_secs: 5.0,
            print_stats: true,
            capture_interval_ms: 200,
            capture_target_count: 20,
            stop_wait_secs: 2.0,
            overlay_font_path: None,
        }
    }
}

impl AppConfig {
    /// Platform config location, e.g. `~/.config/facewatch/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("facewatch").join("config.json"))
    }

    /// Loads `path` if given, else the default location when it exists,
    /// else the built-in defaults. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };
        let config = match candidate {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.camera.is_empty() {
            return invalid("camera must not be empty".into());
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return invalid(format!(
                "jpeg_quality must be between 1 and 100, got {}",
                self.jpeg_quality
            ));
        }
        if !(self.detect_downscale > 0.0 && self.detect_downscale <= 1.0) {
            return invalid(format!(
                "detect_downscale must be in (0, 1], got {}",
                self.detect_downscale
            ));
        }
        if self.detector_scale_factor <= 1.0 {
            return invalid(format!(
                "detector_scale_factor must be > 1.0, got {}",
                self.detector_scale_factor
            ));
        }
        if self.detect_every_n == 0 || self.recog_every_n == 0 {
            return invalid("detect_every_n and recog_every_n must be >= 1".into());
        }
        if self.vote_window == 0 {
            return invalid("vote_window must be >= 1".into());
        }
        if self.vote_require == 0 || self.vote_require > self.vote_window {
            return invalid(format!(
                "vote_require must be between 1 and vote_window ({}), got {}",
                self.vote_window, self.vote_require
            ));
        }
        if self.recog_input_size == 0 {
            return invalid("recog_input_size must be > 0".into());
        }
        if !self.recog_threshold.is_finite() || self.recog_threshold < 0.0 {
            return invalid(format!(
                "recog_threshold must be >= 0, got {}",
                self.recog_threshold
            ));
        }
        for (name, secs) in [
            ("current_expire_secs", self.current_expire_secs),
            ("stats_interval_secs", self.stats_interval_secs),
            ("stop_wait_secs", self.stop_wait_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return invalid(format!("{name} must be a non-negative number, got {secs}"));
            }
        }
        Ok(())
    }

    pub fn current_expire(&self) -> Duration {
        Duration::from_secs_f64(self.current_expire_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs_f64(self.stats_interval_secs)
    }

    pub fn stop_wait(&self) -> Duration {
        Duration::from_secs_f64(self.stop_wait_secs)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }
}
