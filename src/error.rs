// Error types
use thiserror::Error;

/// Raised when the playback subsystem rejects a media resource.
///
/// Always non-fatal: the call keeps going with whatever resource state it had.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported or unrecognised media format: {0}")]
    UnsupportedFormat(String),

    #[error("no playable audio track found")]
    NoAudioTrack,

    #[error("failed to decode media: {0}")]
    Decode(String),

    #[error("audio output unavailable: {0}")]
    OutputDevice(String),

    #[error("failed to set up resampler: {0}")]
    Resample(String),

    #[error("load worker failed: {0}")]
    Worker(String),
}

/// Settings file could not be read or is not usable.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
