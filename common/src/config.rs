use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Accepted display refresh rates. Outside this range the refresh period
/// is either zero or too large to represent.
const REFRESH_HZ_RANGE: std::ops::RangeInclusive<f64> = 0.1..=1000.0;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// MJPEG stream endpoint (`multipart/x-mixed-replace`).
    pub url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Endpoint that accepts a JPEG body and answers with a JSON prediction list.
    pub url: String,
    /// Endpoint that answers with a success status once the model is loaded.
    pub health_url: String,
    #[serde(default = "default_detect_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_load_attempts")]
    pub load_attempts: u32,
    #[serde(default = "default_load_retry")]
    pub load_retry_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    /// Detections must score strictly above this to be drawn.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Pixels the caption is inset from its highlight box.
    #[serde(default = "default_caption_offset")]
    pub caption_offset: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            caption_offset: default_caption_offset(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: f64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_hz: default_refresh_hz(),
            listen_addr: default_listen_addr(),
        }
    }
}

impl DisplayConfig {
    /// Time between two display refresh opportunities.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_hz)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !REFRESH_HZ_RANGE.contains(&self.display.refresh_hz) {
            return Err(ConfigError::Invalid(format!(
                "display.refresh_hz must be within [{}, {}], got {}",
                REFRESH_HZ_RANGE.start(),
                REFRESH_HZ_RANGE.end(),
                self.display.refresh_hz
            )));
        }
        if !(0.0..=1.0).contains(&self.overlay.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "overlay.min_confidence must be within [0, 1], got {}",
                self.overlay.min_confidence
            )));
        }
        if self.detector.load_attempts == 0 {
            return Err(ConfigError::Invalid(
                "detector.load_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_connect_timeout() -> u64 {
    10
}
fn default_detect_timeout() -> u64 {
    2000
}
fn default_load_attempts() -> u32 {
    30
}
fn default_load_retry() -> u64 {
    1
}
fn default_min_confidence() -> f64 {
    0.66
}
fn default_caption_offset() -> f64 {
    10.0
}
fn default_refresh_hz() -> f64 {
    60.0
}
fn default_listen_addr() -> String {
    "0.0.0.0:8080".into()
}
fn default_log_level() -> String {
    "info".into()
}
