// Call timer
// Elapsed seconds shown on the call screen, either counted or read from playback

use serde::Serialize;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::settings::TimerSettings;

/// How the elapsed value is produced. Derived from the media state, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    /// +1 per tick, no media playing
    FreeRunning,
    /// Mirrors the playback position
    MediaSynced,
}

impl TimerMode {
    pub fn for_media(attached_and_playing: bool) -> Self {
        if attached_and_playing {
            TimerMode::MediaSynced
        } else {
            TimerMode::FreeRunning
        }
    }
}

pub struct CallTimer {
    elapsed: u64,
    running: bool,
    settings: TimerSettings,
}

impl CallTimer {
    pub fn new(settings: TimerSettings) -> Self {
        Self {
            elapsed: 0,
            running: false,
            settings,
        }
    }

    /// Start counting from zero
    pub fn start(&mut self) {
        self.elapsed = 0;
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.elapsed = 0;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    pub fn period(&self, mode: TimerMode) -> Duration {
        match mode {
            TimerMode::FreeRunning => self.settings.free_running_period(),
            TimerMode::MediaSynced => self.settings.media_sync_period(),
        }
    }

    /// Re-evaluate on a tick. `position` is only read in media-synced mode,
    /// and a position that went backwards is passed through as is.
    pub fn tick(&mut self, mode: TimerMode, position: f64) -> u64 {
        if !self.running {
            return self.elapsed;
        }
        self.elapsed = match mode {
            TimerMode::FreeRunning => self.elapsed.saturating_add(1),
            TimerMode::MediaSynced => position.max(0.0).floor() as u64,
        };
        self.elapsed
    }
}

/// An armed periodic tick source for one timer mode.
/// Dropping it disarms it.
pub struct Ticker {
    mode: TimerMode,
    interval: Interval,
}

impl Ticker {
    /// First tick fires one full period from now
    pub fn arm(mode: TimerMode, period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(?mode, ?period, "ticker armed");
        Self { mode, interval }
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Format elapsed seconds as `MM:SS`; minutes grow past two digits
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
