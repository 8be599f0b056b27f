use crate::camera::default_topic;
use crate::capture::{CaptureDescriptor, CaptureSettings};
use crate::encode::DEFAULT_JPEG_QUALITY;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Configuration for a single published camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Unique name for the camera (used in topic names and logs)
    pub name: String,
    /// TCP port the publisher listens on
    pub port: u16,
    /// Requested frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,
    /// Requested frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,
    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub quality: u8,
    /// Key expression; defaults to `camera/<name>/compressed`
    #[serde(default)]
    pub topic: Option<String>,
    /// Capture source; when omitted the next device index is used
    #[serde(default)]
    pub source: Option<CaptureDescriptor>,
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1920
}

fn default_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

impl CameraConfig {
    pub fn topic(&self) -> String {
        self.topic
            .clone()
            .unwrap_or_else(|| default_topic(&self.name))
    }

    pub fn settings(&self) -> CaptureSettings {
        CaptureSettings::new(self.width, self.height)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// List of cameras to publish
    pub cameras: Vec<CameraConfig>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cameras.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one camera is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for camera in &self.cameras {
            if !names.insert(camera.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate camera name '{}'",
                    camera.name
                )));
            }
            if !ports.insert(camera.port) {
                return Err(ConfigError::ValidationError(format!(
                    "port {} used by more than one camera",
                    camera.port
                )));
            }
            if camera.width == 0 || camera.height == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "camera '{}' has an empty frame size",
                    camera.name
                )));
            }
            if !(1..=100).contains(&camera.quality) {
                return Err(ConfigError::ValidationError(format!(
                    "camera '{}' quality must be within 1..=100",
                    camera.name
                )));
            }
            match &camera.source {
                Some(CaptureDescriptor::TestPattern { fps })
                | Some(CaptureDescriptor::Directory { fps, .. })
                    if !(fps.is_finite() && *fps > 0.0) =>
                {
                    return Err(ConfigError::ValidationError(format!(
                        "camera '{}' fps must be positive",
                        camera.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
