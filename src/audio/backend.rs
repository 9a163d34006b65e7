// Playback subsystem seam
use crate::error::LoadError;

/// The playback subsystem the media manager drives.
///
/// Loading is split in two so the expensive half can run off the event loop:
/// `probe` validates and prepares the bytes on any thread, `start` claims the
/// playback hardware and begins autoplay on the event-loop thread.
pub trait PlaybackBackend {
    /// Prepared, not yet playing media
    type Source: Send + 'static;
    /// Live playback handle
    type Output: PlaybackOutput;

    fn probe(bytes: Vec<u8>, name: &str) -> Result<Self::Source, LoadError>;

    fn start(&mut self, source: Self::Source, muted: bool) -> Result<Self::Output, LoadError>;
}

/// A started playback
pub trait PlaybackOutput {
    fn set_muted(&mut self, muted: bool);

    /// Seconds of media played so far
    fn position_seconds(&self) -> f64;

    /// Stop playback and free the hardware. Must be idempotent.
    fn stop(&mut self);
}
