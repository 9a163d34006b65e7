// Call session state machine
// The only component the presentation layer talks to

use serde::Serialize;
use std::time::Duration;

use crate::audio::PlaybackBackend;
use crate::error::LoadError;
use crate::media::MediaResourceManager;
use crate::settings::TimerSettings;
use crate::timer::{format_elapsed, CallTimer, TimerMode};

/// Caller name shown while no media has been loaded
pub const UNKNOWN_NAME: &str = "Unknown Name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Idle,
    Active,
}

/// Session-level state. Mutated only by [`CallSessionController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub title: String,
    pub elapsed_seconds: u64,
    pub is_muted: bool,
    pub is_speaker_on: bool,
    pub phase: CallPhase,
}

impl Default for CallSession {
    fn default() -> Self {
        Self {
            title: UNKNOWN_NAME.to_string(),
            elapsed_seconds: 0,
            is_muted: false,
            is_speaker_on: false,
            phase: CallPhase::Idle,
        }
    }
}

impl CallSession {
    pub fn formatted_elapsed(&self) -> String {
        format_elapsed(self.elapsed_seconds)
    }
}

/// What the presentation layer renders
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub title: String,
    pub elapsed: String,
    pub elapsed_seconds: u64,
    pub is_muted: bool,
    pub is_speaker_on: bool,
    pub phase: CallPhase,
    pub timer_mode: Option<TimerMode>,
}

/// Identifies one load attempt. Goes stale when the call ends or another load begins.
#[derive(Debug)]
pub struct LoadTicket {
    generation: u64,
    name: String,
}

impl LoadTicket {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Attached { title: String },
    /// The load was superseded; its result was dropped
    Stale,
}

pub struct CallSessionController<B: PlaybackBackend> {
    session: CallSession,
    media: MediaResourceManager<B>,
    timer: CallTimer,
    generation: u64,
}

impl<B: PlaybackBackend> CallSessionController<B> {
    pub fn new(backend: B, timer: TimerSettings) -> Self {
        Self {
            session: CallSession::default(),
            media: MediaResourceManager::new(backend),
            timer: CallTimer::new(timer),
            generation: 0,
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn media(&self) -> &MediaResourceManager<B> {
        &self.media
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            title: self.session.title.clone(),
            elapsed: self.session.formatted_elapsed(),
            elapsed_seconds: self.session.elapsed_seconds,
            is_muted: self.session.is_muted,
            is_speaker_on: self.session.is_speaker_on,
            phase: self.session.phase,
            timer_mode: self.schedule().map(|(mode, _)| mode),
        }
    }

    pub fn timer_mode(&self) -> TimerMode {
        TimerMode::for_media(self.media.is_playing())
    }

    /// Which tick source should be armed, if any
    pub fn schedule(&self) -> Option<(TimerMode, Duration)> {
        match self.session.phase {
            CallPhase::Idle => None,
            CallPhase::Active => {
                let mode = self.timer_mode();
                Some((mode, self.timer.period(mode)))
            }
        }
    }

    /// Idle -> Active. No-op while a call is already running.
    pub fn start_call(&mut self) {
        if self.session.phase == CallPhase::Active {
            return;
        }
        // Mute and speaker toggled while idle carry into the call
        self.session.title = UNKNOWN_NAME.to_string();
        self.session.elapsed_seconds = 0;
        self.session.phase = CallPhase::Active;
        self.timer.start();
        tracing::info!("call started");
    }

    /// Load and autoplay a file, blocking the caller for the probe.
    pub fn select_file(&mut self, bytes: Vec<u8>, name: &str) -> Result<(), LoadError> {
        let ticket = self.begin_load(name);
        let probed = B::probe(bytes, name);
        self.finish_load(ticket, probed).map(|_| ())
    }

    /// First half of an asynchronous load. Starts the call if needed and
    /// invalidates any load still in flight.
    pub fn begin_load(&mut self, name: &str) -> LoadTicket {
        self.start_call();
        self.generation += 1;
        tracing::debug!(name, generation = self.generation, "load started");
        LoadTicket {
            generation: self.generation,
            name: name.to_string(),
        }
    }

    /// Second half of an asynchronous load: attach the probed media unless the
    /// ticket went stale in the meantime.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        probed: Result<B::Source, LoadError>,
    ) -> Result<LoadOutcome, LoadError> {
        if ticket.generation != self.generation || self.session.phase == CallPhase::Idle {
            tracing::debug!(name = %ticket.name, "discarding stale load");
            return Ok(LoadOutcome::Stale);
        }

        let source = probed.map_err(|e| {
            tracing::warn!(name = %ticket.name, error = %e, "media rejected, call continues");
            e
        })?;

        match self.media.attach(source, &ticket.name, self.session.is_muted) {
            Ok(resource) => {
                let title = resource.title().to_string();
                self.session.title = title.clone();
                Ok(LoadOutcome::Attached { title })
            }
            Err(e) => {
                tracing::warn!(name = %ticket.name, error = %e, "playback failed to start, continuing without media");
                Err(e)
            }
        }
    }

    pub fn toggle_mute(&mut self) {
        self.session.is_muted = !self.session.is_muted;
        self.media.set_muted(self.session.is_muted);
    }

    pub fn toggle_speaker(&mut self) {
        self.session.is_speaker_on = !self.session.is_speaker_on;
    }

    /// Re-evaluate the elapsed time for one tick of the current mode
    pub fn tick(&mut self) -> u64 {
        if self.session.phase == CallPhase::Idle {
            return self.session.elapsed_seconds;
        }
        let mode = self.timer_mode();
        let position = self.media.current_position_seconds();
        self.session.elapsed_seconds = self.timer.tick(mode, position);
        self.session.elapsed_seconds
    }

    /// Release media, stop the timer and reset the session in one step
    pub fn end_call(&mut self) {
        let was_active = self.session.phase == CallPhase::Active;
        self.generation += 1;
        self.media.release();
        self.timer.stop();
        self.session = CallSession::default();
        if was_active {
            tracing::info!("call ended");
        }
    }

    /// Final cleanup before the controller goes away. Safe to repeat.
    pub fn teardown(&mut self) {
        self.end_call();
        tracing::debug!("session torn down");
    }
}
