//! Client configuration.

use crate::stroke::Brush;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default interval between point flushes while drawing.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 60;
/// Moves closer than this to the last recorded point are dropped.
pub const DEFAULT_MIN_POINT_DISTANCE: f64 = 1.0;
/// Roughly one display refresh at 60 Hz.
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;
/// Relay endpoint used when none is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:3030/ws";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Timing and filtering knobs of the sync protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub flush_interval_ms: u64,
    pub min_point_distance: f64,
    pub frame_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            min_point_distance: DEFAULT_MIN_POINT_DISTANCE,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
        }
    }
}

impl SyncConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Settings for a client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub relay_url: String,
    pub brush: Brush,
    /// Logical canvas width.
    pub canvas_width: f64,
    /// Logical canvas height.
    pub canvas_height: f64,
    /// Device pixels per logical pixel.
    pub scale_factor: f64,
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            brush: Brush::default(),
            canvas_width: 1280.0,
            canvas_height: 800.0,
            scale_factor: 1.0,
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}
