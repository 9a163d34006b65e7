// Decoycall - music playback disguised as a phone call
// Module declarations
pub mod audio;
pub mod error;
pub mod media;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod timer;

#[cfg(test)]
mod testing;

pub use error::{LoadError, SettingsError};
pub use runtime::{CallEvent, CallHandle, CallRuntime, Intent};
pub use session::{CallPhase, CallSession, CallSessionController, CallSnapshot, UNKNOWN_NAME};
pub use timer::{format_elapsed, TimerMode};
