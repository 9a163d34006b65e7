// Media resource lifecycle
// Owns at most one live playback at a time

use regex::Regex;
use std::sync::OnceLock;

use crate::audio::{PlaybackBackend, PlaybackOutput};
use crate::error::LoadError;

/// Get the regex matching a trailing file extension
fn get_extension_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\.[^/.]+$").expect("extension pattern is valid"))
}

/// Derive the caller name shown on the call screen from a file name.
///
/// Strips the extension after the last `.`; a name that would end up empty
/// (such as `.mp3`) is shown as is.
pub fn display_title(name: &str) -> String {
    let stripped = get_extension_regex().replace(name, "");
    if stripped.is_empty() {
        name.to_string()
    } else {
        stripped.into_owned()
    }
}

/// The single attached playback
pub struct MediaResource<O> {
    output: O,
    title: String,
    is_playing: bool,
    is_muted: bool,
}

impl<O: PlaybackOutput> MediaResource<O> {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn position_seconds(&self) -> f64 {
        if self.is_playing {
            self.output.position_seconds().max(0.0)
        } else {
            0.0
        }
    }

    fn stop(&mut self) {
        self.output.stop();
        self.is_playing = false;
    }
}

pub struct MediaResourceManager<B: PlaybackBackend> {
    backend: B,
    current: Option<MediaResource<B::Output>>,
}

impl<B: PlaybackBackend> MediaResourceManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            current: None,
        }
    }

    /// Probe and attach in one go. Autoplays on success.
    ///
    /// Bytes the backend rejects leave the current resource untouched.
    pub fn load(&mut self, bytes: Vec<u8>, name: &str, muted: bool) -> Result<&MediaResource<B::Output>, LoadError> {
        let source = B::probe(bytes, name)?;
        self.attach(source, name, muted)
    }

    /// Release whatever is attached, then start `source` as the new resource.
    ///
    /// If starting fails the old resource is already gone and nothing is attached.
    pub fn attach(&mut self, source: B::Source, name: &str, muted: bool) -> Result<&MediaResource<B::Output>, LoadError> {
        self.release();

        let output = self.backend.start(source, muted)?;
        let resource = MediaResource {
            output,
            title: display_title(name),
            is_playing: true,
            is_muted: muted,
        };
        tracing::info!(title = %resource.title, "media resource attached");
        let resource = self.current.insert(resource);
        Ok(&*resource)
    }

    /// No-op without an attached resource
    pub fn set_muted(&mut self, muted: bool) {
        if let Some(resource) = self.current.as_mut() {
            resource.output.set_muted(muted);
            resource.is_muted = muted;
        }
    }

    pub fn current_position_seconds(&self) -> f64 {
        self.current
            .as_ref()
            .map(|r| r.position_seconds())
            .unwrap_or(0.0)
    }

    /// Stop playback and free the handle. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut resource) = self.current.take() {
            resource.stop();
            tracing::info!(title = %resource.title, "media resource released");
        }
    }

    pub fn current(&self) -> Option<&MediaResource<B::Output>> {
        self.current.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.current.as_ref().is_some_and(|r| r.is_playing())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: PlaybackBackend> Drop for MediaResourceManager<B> {
    fn drop(&mut self) {
        self.release();
    }
}
