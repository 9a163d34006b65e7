// Settings module
// Read-only JSON configuration, defaults when no file is present

#[allow(clippy::module_inception)]
mod settings;

pub use settings::{AppSettings, LoggingSettings, PlaybackSettings, TimerSettings};
