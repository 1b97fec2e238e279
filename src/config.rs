use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub recording: RecordingConfig,
    pub output: OutputConfig,
    pub location: LocationConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub pre_roll_frames: usize,
    pub post_roll_frames: u64,
    /// Used when the source cannot report its own rate.
    pub fallback_fps: f64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            pre_roll_frames: 75,
            post_roll_frames: 75,
            fallback_fps: 25.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub journal_file: String,
    pub dashboard_file: String,
    pub reset_on_start: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("fire_clips"),
            journal_file: "detection_log.txt".to_string(),
            dashboard_file: "dashboard.json".to_string(),
            reset_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: u8,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 22.7909362,
            longitude: 87.4380579,
            zoom: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Detector calls allowed in flight ahead of the state machine.
    pub detect_depth: usize,
    pub preview_capacity: usize,
    pub preview_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detect_depth: 8,
            preview_capacity: 16,
            preview_quality: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| Error::storage(path, e))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        // an empty document deserialises to unit, not to a map
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let threshold = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        if self.recording.post_roll_frames == 0 {
            return Err(Error::Config("post_roll_frames must be positive".into()));
        }

        let fps = self.recording.fallback_fps;
        if fps.is_nan() || fps <= 0.0 {
            return Err(Error::Config("fallback_fps must be positive".into()));
        }

        if self.pipeline.detect_depth == 0 {
            return Err(Error::Config("detect_depth must be positive".into()));
        }

        if self.pipeline.preview_capacity == 0 {
            return Err(Error::Config("preview_capacity must be positive".into()));
        }

        Ok(())
    }
}
