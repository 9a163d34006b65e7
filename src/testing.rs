// Scripted playback backend for tests
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{PlaybackBackend, PlaybackOutput};
use crate::error::LoadError;

const CORRUPT: &[u8] = b"CORRUPT";
const SLOW: &[u8] = b"SLOW";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started(u32),
    Stopped(u32),
}

#[derive(Default)]
struct FakeState {
    events: Vec<PlaybackEvent>,
    next_id: u32,
    live: usize,
    position: f64,
    muted: bool,
    fail_next_start: bool,
}

/// Records every start and stop; position and failures are set by the test
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes the probe rejects
    pub fn corrupt_bytes() -> Vec<u8> {
        CORRUPT.to_vec()
    }

    /// Bytes whose probe takes a while on the blocking pool
    pub fn slow_bytes() -> Vec<u8> {
        SLOW.to_vec()
    }

    pub fn events(&self) -> Vec<PlaybackEvent> {
        self.state.lock().events.clone()
    }

    pub fn live_outputs(&self) -> usize {
        self.state.lock().live
    }

    pub fn output_muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn set_position(&self, seconds: f64) {
        self.state.lock().position = seconds;
    }

    pub fn fail_next_start(&self) {
        self.state.lock().fail_next_start = true;
    }
}

pub struct FakeSource;

impl PlaybackBackend for FakeBackend {
    type Source = FakeSource;
    type Output = FakeOutput;

    fn probe(bytes: Vec<u8>, _name: &str) -> Result<FakeSource, LoadError> {
        if bytes.is_empty() || bytes == CORRUPT {
            return Err(LoadError::UnsupportedFormat("fake probe rejected bytes".to_string()));
        }
        if bytes == SLOW {
            std::thread::sleep(Duration::from_millis(200));
        }
        Ok(FakeSource)
    }

    fn start(&mut self, _source: FakeSource, muted: bool) -> Result<FakeOutput, LoadError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_start) {
            return Err(LoadError::OutputDevice("fake device busy".to_string()));
        }
        assert_eq!(state.live, 0, "started a second output while one is live");

        state.next_id += 1;
        let id = state.next_id;
        state.events.push(PlaybackEvent::Started(id));
        state.live += 1;
        state.position = 0.0;
        state.muted = muted;

        Ok(FakeOutput {
            id,
            state: self.state.clone(),
            stopped: false,
        })
    }
}

pub struct FakeOutput {
    id: u32,
    state: Arc<Mutex<FakeState>>,
    stopped: bool,
}

impl PlaybackOutput for FakeOutput {
    fn set_muted(&mut self, muted: bool) {
        self.state.lock().muted = muted;
    }

    fn position_seconds(&self) -> f64 {
        self.state.lock().position
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let mut state = self.state.lock();
        state.events.push(PlaybackEvent::Stopped(self.id));
        state.live -= 1;
    }
}

impl Drop for FakeOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
