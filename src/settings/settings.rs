// Settings management
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::SettingsError;

/// Tick periods for the two timer strategies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    pub free_running_tick_ms: u64,
    pub media_sync_tick_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            free_running_tick_ms: 1000,
            media_sync_tick_ms: 500,
        }
    }
}

impl TimerSettings {
    pub fn free_running_period(&self) -> Duration {
        Duration::from_millis(self.free_running_tick_ms)
    }

    pub fn media_sync_period(&self) -> Duration {
        Duration::from_millis(self.media_sync_tick_ms)
    }
}

/// Playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub volume: f32,          // 0.0-1.0, applied while unmuted
    pub ring_buffer_ms: u32,  // how far the feeder may run ahead of the device
    pub resampler_chunk_frames: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            ring_buffer_ms: 250,
            resampler_chunk_frames: 1024,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String, // tracing EnvFilter directive, RUST_LOG wins if set
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub timer: TimerSettings,
    pub playback: PlaybackSettings,
    pub logging: LoggingSettings,
}

impl AppSettings {
    /// Load settings from file, or return defaults if file doesn't exist
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::info!(?path, "no settings file found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let settings = Self::from_json(&content)?;

        tracing::info!(?path, "loaded settings");
        Ok(settings)
    }

    pub fn from_json(content: &str) -> Result<Self, SettingsError> {
        let settings: AppSettings = serde_json::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.timer.free_running_tick_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "timer.free_running_tick_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.timer.media_sync_tick_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "timer.media_sync_tick_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.playback.volume) {
            return Err(SettingsError::Invalid {
                field: "playback.volume",
                reason: format!("{} is outside 0.0-1.0", self.playback.volume),
            });
        }
        if self.playback.ring_buffer_ms == 0 || self.playback.resampler_chunk_frames == 0 {
            return Err(SettingsError::Invalid {
                field: "playback",
                reason: "buffer sizes must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
