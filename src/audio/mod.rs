// Audio playback module
// Uses Symphonia for decoding and cpal for output

pub mod backend;
pub mod decoder;
pub mod output;
pub mod player;
pub mod resample;

pub use backend::{PlaybackBackend, PlaybackOutput};
pub use player::{CpalBackend, CpalPlayback, PreparedTrack};
