use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Camera endpoint: an MJPEG stream or a still-image URL depending on `mode`.
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Set for sources that deliver rows bottom-up.
    #[serde(default)]
    pub bottom_up: bool,
    /// Pacing between fetches in `poll` mode.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Frames of pre-roll kept in the rolling buffer.
    #[serde(default = "default_buffer_frames")]
    pub buffer_frames: usize,
    /// Frames collected after a trigger. Defaults to twice `buffer_frames`.
    pub post_frames: Option<u32>,
    /// Artifact format: "video" or "images".
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Persist a capture still running at shutdown instead of dropping it.
    #[serde(default = "default_flush_on_shutdown")]
    pub flush_on_shutdown: bool,
}

impl CaptureConfig {
    pub fn post_frames(&self) -> u32 {
        self.post_frames
            .unwrap_or_else(|| (self.buffer_frames as u32).saturating_mul(2))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Mean luminance delta a hotspot must exceed to trigger.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: u8,
    #[serde(default = "default_hotspots_file")]
    pub hotspots_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_quality")]
    pub quality: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_frames: default_buffer_frames(),
            post_frames: None,
            output: default_output(),
            data_dir: default_data_dir(),
            flush_on_shutdown: default_flush_on_shutdown(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            hotspots_file: default_hotspots_file(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            quality: default_quality(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            port: default_api_port(),
        }
    }
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
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values serde accepts but the pipeline cannot run with.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.buffer_frames == 0 {
            return Err(ConfigError::Invalid(
                "capture.buffer_frames must be at least 1".into(),
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
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_poll_interval_ms() -> u64 {
    200
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_buffer_frames() -> usize {
    30
}
fn default_output() -> String {
    "video".into()
}
fn default_data_dir() -> String {
    "data".into()
}
fn default_flush_on_shutdown() -> bool {
    true
}
fn default_sensitivity() -> u8 {
    20
}
fn default_hotspots_file() -> String {
    "hotspots.txt".into()
}
fn default_codec() -> String {
    "mpeg4".into()
}
fn default_quality() -> u32 {
    5
}
fn default_api_enabled() -> bool {
    true
}
fn default_api_port() -> u16 {
    3000
}
fn default_log_level() -> String {
    "info".into()
}
