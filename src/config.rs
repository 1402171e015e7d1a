//! Configuration constants and the stream list for the viewer.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::acquisition::{LoopSettings, PoolSettings};
use crate::video::ResizeMode;

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Banner shown while fullscreen
pub const DEFAULT_FULLSCREEN_TEXT: &str = "rtsp-viewer";

/// Frames per second delivered to each slot
pub const TARGET_FPS: u32 = 30;

/// Acquisition loop pause after an idle cycle
pub const IDLE_SLEEP_MS: u64 = 10;

/// Delay before reopening a stream that failed mid-read (0 = immediately)
pub const RECONNECT_DELAY_MS: u64 = 0;

/// Delay before retrying a stream that failed to open
pub const OPEN_RETRY_MS: u64 = 1000;

/// A stream that yields no frame for this long is reconnected
pub const READ_TIMEOUT_MS: u64 = 10_000;

/// RTSP jitterbuffer latency
pub const RTSP_LATENCY_MS: u32 = 200;

/// How often the GTK main loop drains acquisition messages
pub const UI_POLL_MS: u64 = 16;

/// Status message display duration in milliseconds
pub const STATUS_DISPLAY_DURATION_MS: u64 = 5000;

pub const WINDOW_WIDTH: i32 = 1200;
pub const WINDOW_HEIGHT: i32 = 800;
pub const SIDEBAR_WIDTH: i32 = 230;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One configured camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub name: String,
    pub uri: String,
    pub hotkey: Option<String>,
    pub comment: Option<String>,
}

/// Loop timing as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub target_fps: u32,
    pub idle_sleep_ms: u64,
    pub reconnect_delay_ms: u64,
    pub open_retry_ms: u64,
    pub read_timeout_ms: u64,
    pub latency_ms: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            target_fps: TARGET_FPS,
            idle_sleep_ms: IDLE_SLEEP_MS,
            reconnect_delay_ms: RECONNECT_DELAY_MS,
            open_retry_ms: OPEN_RETRY_MS,
            read_timeout_ms: READ_TIMEOUT_MS,
            latency_ms: RTSP_LATENCY_MS,
        }
    }
}

impl AcquisitionConfig {
    pub fn loop_settings(&self, grid_size: usize, resize_mode: ResizeMode) -> LoopSettings {
        LoopSettings {
            target_interval: Duration::from_secs(1) / self.target_fps.max(1),
            idle_sleep: Duration::from_millis(self.idle_sleep_ms),
            grid_size,
            resize_mode,
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            open_retry: Duration::from_millis(self.open_retry_ms),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Hotkeys show up both as `"1"` and as `1`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawHotkey {
    Text(String),
    Number(i64),
}

#[derive(Debug, Deserialize)]
struct RawStream {
    name: Option<String>,
    #[serde(alias = "uri")]
    url: Option<String>,
    hotkey: Option<RawHotkey>,
    comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    fullscreen_text: Option<String>,
    #[serde(alias = "streams")]
    feeds: Vec<serde_json::Value>,
    acquisition: AcquisitionConfig,
    letterbox: bool,
    grid: Option<usize>,
}

/// Everything loaded from the config file
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    pub fullscreen_text: String,
    pub streams: Vec<StreamDescriptor>,
    pub acquisition: AcquisitionConfig,
    pub letterbox: bool,
    /// Grid cell count at startup
    pub grid: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            fullscreen_text: DEFAULT_FULLSCREEN_TEXT.to_string(),
            streams: Vec::new(),
            acquisition: AcquisitionConfig::default(),
            letterbox: false,
            grid: 1,
        }
    }
}

impl ViewerConfig {
    /// Load from `path`, falling back to defaults if the file is missing or broken
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(config) => {
                log::info!(
                    "Loaded {} stream(s) from {}",
                    config.streams.len(),
                    path.display()
                );
                config
            }
            Err(e) => {
                log::error!("{}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text)?;

        let streams = raw
            .feeds
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| parse_stream(index, value))
            .collect();

        Ok(Self {
            fullscreen_text: raw
                .fullscreen_text
                .unwrap_or_else(|| DEFAULT_FULLSCREEN_TEXT.to_string()),
            streams,
            acquisition: raw.acquisition,
            letterbox: raw.letterbox,
            grid: raw.grid.unwrap_or(1),
        })
    }

    pub fn resize_mode(&self) -> ResizeMode {
        if self.letterbox {
            ResizeMode::Letterbox
        } else {
            ResizeMode::Stretch
        }
    }
}

fn parse_stream(index: usize, value: serde_json::Value) -> Option<StreamDescriptor> {
    let raw: RawStream = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("Skipping stream #{}: {}", index, e);
            return None;
        }
    };

    let Some(uri) = raw.url.filter(|u| !u.trim().is_empty()) else {
        log::warn!("Skipping stream #{}: no url", index);
        return None;
    };

    Some(StreamDescriptor {
        name: raw.name.unwrap_or_else(|| "Unknown".to_string()),
        uri,
        hotkey: raw.hotkey.map(|h| match h {
            RawHotkey::Text(s) => s,
            RawHotkey::Number(n) => n.to_string(),
        }),
        comment: raw.comment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feeds_variant() {
        let config = ViewerConfig::from_json(
            r#"{
                "fullscreen_text": "Lobby",
                "feeds": [
                    {"name": "Door", "url": "rtsp://cam1/stream", "hotkey": "1", "comment": "front"},
                    {"name": "Yard", "url": "rtsp://cam2/stream", "hotkey": 2}
                ],
                "letterbox": true,
                "grid": 4
            }"#,
        )
        .unwrap();

        assert_eq!(config.fullscreen_text, "Lobby");
        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.streams[0].hotkey.as_deref(), Some("1"));
        assert_eq!(config.streams[0].comment.as_deref(), Some("front"));
        assert_eq!(config.streams[1].hotkey.as_deref(), Some("2"));
        assert_eq!(config.resize_mode(), ResizeMode::Letterbox);
        assert_eq!(config.grid, 4);
    }

    #[test]
    fn test_streams_variant_with_uri_key() {
        let config = ViewerConfig::from_json(
            r#"{"streams": [{"name": "Cam", "uri": "rtsp://cam/1"}]}"#,
        )
        .unwrap();

        assert_eq!(config.fullscreen_text, DEFAULT_FULLSCREEN_TEXT);
        assert_eq!(config.streams[0].uri, "rtsp://cam/1");
        assert_eq!(config.streams[0].hotkey, None);
        assert_eq!(config.resize_mode(), ResizeMode::Stretch);
    }

    #[test]
    fn test_tolerant_entries() {
        let config = ViewerConfig::from_json(
            r#"{"feeds": [
                {"name": "No url"},
                {"url": "rtsp://anon"},
                "garbage",
                {"name": "Blank", "url": "  "}
            ]}"#,
        )
        .unwrap();

        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].name, "Unknown");
        assert_eq!(config.streams[0].uri, "rtsp://anon");
    }

    #[test]
    fn test_acquisition_section() {
        let config = ViewerConfig::from_json(
            r#"{"acquisition": {"target_fps": 10, "open_retry_ms": 250}}"#,
        )
        .unwrap();

        let settings = config.acquisition.loop_settings(4, ResizeMode::Stretch);
        assert_eq!(settings.target_interval, Duration::from_millis(100));
        assert_eq!(settings.idle_sleep, Duration::from_millis(IDLE_SLEEP_MS));
        assert_eq!(settings.grid_size, 4);

        let pool = config.acquisition.pool_settings();
        assert_eq!(pool.open_retry, Duration::from_millis(250));
        assert_eq!(pool.reconnect_delay, Duration::ZERO);
    }

    #[test]
    fn test_zero_fps_does_not_divide_by_zero() {
        let acq = AcquisitionConfig {
            target_fps: 0,
            ..Default::default()
        };
        assert_eq!(
            acq.loop_settings(1, ResizeMode::Stretch).target_interval,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(
            ViewerConfig::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = ViewerConfig::load("/nonexistent/rtsp-viewer/config.json");
        assert_eq!(config, ViewerConfig::default());
        assert!(config.streams.is_empty());
    }
}
