// Call runtime
// Single event loop serialising intents, load completions and timer ticks

use std::collections::VecDeque;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::audio::PlaybackBackend;
use crate::error::LoadError;
use crate::session::{CallSessionController, CallSnapshot, LoadOutcome, LoadTicket};
use crate::timer::Ticker;

const EVENT_CAPACITY: usize = 32;

/// User intents accepted by the runtime
#[derive(Debug)]
pub enum Intent {
    StartCall,
    SelectFile { bytes: Vec<u8>, name: String },
    ToggleMute,
    ToggleSpeaker,
    EndCall,
    Shutdown,
}

/// Notices for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    LoadStarted { name: String },
    MediaAttached { title: String },
    LoadFailed { name: String, reason: String },
    LoadDiscarded { name: String },
    CallEnded,
}

/// Cloneable front door to a running [`CallRuntime`]
#[derive(Clone)]
pub struct CallHandle {
    intents: mpsc::UnboundedSender<Intent>,
    state: watch::Receiver<CallSnapshot>,
    events: broadcast::Sender<CallEvent>,
}

impl CallHandle {
    pub fn start_call(&self) {
        self.send(Intent::StartCall);
    }

    pub fn select_file(&self, bytes: Vec<u8>, name: impl Into<String>) {
        self.send(Intent::SelectFile {
            bytes,
            name: name.into(),
        });
    }

    pub fn toggle_mute(&self) {
        self.send(Intent::ToggleMute);
    }

    pub fn toggle_speaker(&self) {
        self.send(Intent::ToggleSpeaker);
    }

    pub fn end_call(&self) {
        self.send(Intent::EndCall);
    }

    pub fn shutdown(&self) {
        self.send(Intent::Shutdown);
    }

    /// Latest published state
    pub fn snapshot(&self) -> CallSnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    fn send(&self, intent: Intent) {
        if self.intents.send(intent).is_err() {
            tracing::debug!("call runtime has stopped, intent dropped");
        }
    }
}

struct PendingLoad<S> {
    ticket: LoadTicket,
    task: JoinHandle<Result<S, LoadError>>,
}

enum Step<S> {
    Intent(Option<Intent>),
    Loaded(Result<Result<S, LoadError>, JoinError>),
    Tick,
}

pub struct CallRuntime<B: PlaybackBackend + 'static> {
    controller: CallSessionController<B>,
    intents: mpsc::UnboundedReceiver<Intent>,
    state: watch::Sender<CallSnapshot>,
    events: broadcast::Sender<CallEvent>,
    pending: Option<PendingLoad<B::Source>>,
    queued: VecDeque<Intent>,
    ticker: Option<Ticker>,
}

impl<B: PlaybackBackend + 'static> CallRuntime<B> {
    pub fn new(controller: CallSessionController<B>) -> (Self, CallHandle) {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(controller.snapshot());
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let handle = CallHandle {
            intents: intent_tx,
            state: state_rx,
            events: event_tx.clone(),
        };
        let runtime = Self {
            controller,
            intents: intent_rx,
            state: state_tx,
            events: event_tx,
            pending: None,
            queued: VecDeque::new(),
            ticker: None,
        };
        (runtime, handle)
    }

    /// Run until `Shutdown` arrives or every handle is dropped
    pub async fn run(mut self) {
        loop {
            self.rearm_ticker();
            self.publish();

            let step = tokio::select! {
                biased;
                intent = self.intents.recv() => Step::Intent(intent),
                joined = wait_pending(&mut self.pending) => Step::Loaded(joined),
                _ = wait_tick(&mut self.ticker) => Step::Tick,
            };

            match step {
                Step::Intent(Some(intent)) => {
                    if !self.on_intent(intent) {
                        break;
                    }
                }
                Step::Intent(None) => {
                    tracing::debug!("all call handles dropped");
                    self.supersede_pending();
                    self.controller.teardown();
                    break;
                }
                Step::Loaded(joined) => {
                    if let Some(pending) = self.pending.take() {
                        self.on_loaded(pending.ticket, joined);
                    }
                }
                Step::Tick => {
                    let elapsed = self.controller.tick();
                    tracing::trace!(elapsed, "tick");
                }
            }
        }

        self.ticker = None;
        self.publish();
        tracing::info!("call runtime stopped");
    }

    /// Returns false when the runtime should stop
    fn on_intent(&mut self, intent: Intent) -> bool {
        if self.pending.is_some() {
            match intent {
                Intent::SelectFile { .. } | Intent::EndCall | Intent::Shutdown => {
                    self.supersede_pending();
                }
                other => {
                    tracing::debug!(intent = ?other, "load pending, intent queued");
                    self.queued.push_back(other);
                    return true;
                }
            }
        }
        self.apply(intent)
    }

    fn apply(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::StartCall => self.controller.start_call(),
            Intent::SelectFile { bytes, name } => self.spawn_load(bytes, name),
            Intent::ToggleMute => self.controller.toggle_mute(),
            Intent::ToggleSpeaker => self.controller.toggle_speaker(),
            Intent::EndCall => {
                self.controller.end_call();
                self.emit(CallEvent::CallEnded);
            }
            Intent::Shutdown => {
                self.controller.teardown();
                return false;
            }
        }
        true
    }

    fn spawn_load(&mut self, bytes: Vec<u8>, name: String) {
        let ticket = self.controller.begin_load(&name);
        self.emit(CallEvent::LoadStarted { name: name.clone() });

        let task = tokio::task::spawn_blocking(move || B::probe(bytes, &name));
        self.pending = Some(PendingLoad { ticket, task });
    }

    fn on_loaded(&mut self, ticket: LoadTicket, joined: Result<Result<B::Source, LoadError>, JoinError>) {
        let name = ticket.name().to_string();
        let probed = joined.unwrap_or_else(|e| Err(LoadError::Worker(e.to_string())));

        match self.controller.finish_load(ticket, probed) {
            Ok(LoadOutcome::Attached { title }) => self.emit(CallEvent::MediaAttached { title }),
            Ok(LoadOutcome::Stale) => self.emit(CallEvent::LoadDiscarded { name }),
            Err(e) => self.emit(CallEvent::LoadFailed {
                name,
                reason: e.to_string(),
            }),
        }
        self.drain_queue();
    }

    /// Drop the in-flight load, then apply what queued up behind it
    fn supersede_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            // The probe runs on the blocking pool and finishes on its own; its result is dropped
            pending.task.abort();
            self.emit(CallEvent::LoadDiscarded {
                name: pending.ticket.name().to_string(),
            });
        }
        self.drain_queue();
    }

    fn drain_queue(&mut self) {
        while self.pending.is_none() {
            let Some(intent) = self.queued.pop_front() else {
                break;
            };
            // Only toggles and StartCall are ever queued
            self.apply(intent);
        }
    }

    /// Keep exactly one tick source armed for the current timer mode
    fn rearm_ticker(&mut self) {
        let armed = self.ticker.as_ref().map(Ticker::mode);
        match (armed, self.controller.schedule()) {
            (Some(current), Some((mode, _))) if current == mode => {}
            (_, Some((mode, period))) => {
                self.ticker = None;
                self.ticker = Some(Ticker::arm(mode, period));
            }
            (Some(_), None) => {
                self.ticker = None;
                tracing::debug!("ticker disarmed");
            }
            (None, None) => {}
        }
    }

    fn publish(&self) {
        let snapshot = self.controller.snapshot();
        self.state.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn emit(&self, event: CallEvent) {
        tracing::debug!(?event, "call event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn wait_pending<S>(pending: &mut Option<PendingLoad<S>>) -> Result<Result<S, LoadError>, JoinError> {
    match pending {
        Some(pending) => (&mut pending.task).await,
        None => std::future::pending().await,
    }
}

async fn wait_tick(ticker: &mut Option<Ticker>) {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CallPhase, UNKNOWN_NAME};
    use crate::settings::TimerSettings;
    use crate::testing::{FakeBackend, PlaybackEvent};
    use crate::timer::TimerMode;
    use std::time::Duration;
    use tokio::time::sleep;

    fn spawn_runtime() -> (CallHandle, FakeBackend, JoinHandle<()>) {
        let backend = FakeBackend::new();
        let controller = CallSessionController::new(backend.clone(), TimerSettings::default());
        let (runtime, handle) = CallRuntime::new(controller);
        let task = tokio::spawn(runtime.run());
        (handle, backend, task)
    }

    async fn wait_until(handle: &CallHandle, pred: impl Fn(&CallSnapshot) -> bool) -> CallSnapshot {
        let mut rx = handle.watch();
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            rx.changed().await.unwrap();
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<CallEvent>) -> CallEvent {
        rx.recv().await.unwrap()
    }

    /// Let a blocking probe finish in real time, then give the loop a chance to run
    async fn settle_blocking() {
        tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_millis(300)))
            .await
            .unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_running_ticks_every_second() {
        let (handle, _, _task) = spawn_runtime();
        handle.start_call();

        sleep(Duration::from_millis(3500)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.phase, CallPhase::Active);
        assert_eq!(snapshot.elapsed_seconds, 3);
        assert_eq!(snapshot.elapsed, "00:03");
        assert_eq!(snapshot.timer_mode, Some(TimerMode::FreeRunning));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attached_media_drives_the_clock() {
        let (handle, backend, _task) = spawn_runtime();
        handle.start_call();
        sleep(Duration::from_millis(2500)).await;

        handle.select_file(b"audio".to_vec(), "song.mp3");
        let snapshot = wait_until(&handle, |s| s.title == "song").await;
        assert_eq!(snapshot.timer_mode, Some(TimerMode::MediaSynced));

        backend.set_position(42.3);
        sleep(Duration::from_millis(600)).await;
        assert_eq!(handle.snapshot().elapsed_seconds, 42);

        backend.set_position(43.9);
        sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.snapshot().elapsed_seconds, 43);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_file_is_a_notice() {
        let (handle, backend, _task) = spawn_runtime();
        let mut events = handle.subscribe();
        handle.start_call();
        sleep(Duration::from_millis(2500)).await;

        handle.select_file(FakeBackend::corrupt_bytes(), "bad.mp3");
        assert_eq!(
            next_event(&mut events).await,
            CallEvent::LoadStarted { name: "bad.mp3".to_string() }
        );
        assert!(matches!(
            next_event(&mut events).await,
            CallEvent::LoadFailed { name, .. } if name == "bad.mp3"
        ));

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.title, UNKNOWN_NAME);
        assert_eq!(snapshot.phase, CallPhase::Active);
        assert_eq!(snapshot.timer_mode, Some(TimerMode::FreeRunning));
        assert!(backend.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_call_discards_pending_load() {
        let (handle, backend, _task) = spawn_runtime();
        let mut events = handle.subscribe();
        handle.start_call();
        handle.select_file(FakeBackend::slow_bytes(), "song.mp3");
        handle.end_call();

        assert_eq!(
            next_event(&mut events).await,
            CallEvent::LoadStarted { name: "song.mp3".to_string() }
        );
        assert_eq!(
            next_event(&mut events).await,
            CallEvent::LoadDiscarded { name: "song.mp3".to_string() }
        );
        assert_eq!(next_event(&mut events).await, CallEvent::CallEnded);

        settle_blocking().await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.phase, CallPhase::Idle);
        assert_eq!(snapshot.title, UNKNOWN_NAME);
        assert_eq!(snapshot.timer_mode, None);
        assert!(backend.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_intents_queue_behind_pending_load() {
        let (handle, backend, _task) = spawn_runtime();
        handle.start_call();
        handle.select_file(FakeBackend::slow_bytes(), "song.mp3");
        handle.toggle_mute();
        handle.toggle_speaker();

        let snapshot = wait_until(&handle, |s| s.title == "song" && s.is_muted).await;
        assert!(snapshot.is_speaker_on);
        // The mute was applied after the resource attached, so it reached the output
        assert!(backend.output_muted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_selection_supersedes_pending_one() {
        let (handle, backend, _task) = spawn_runtime();
        handle.start_call();
        handle.select_file(FakeBackend::slow_bytes(), "song.mp3");
        handle.select_file(b"audio".to_vec(), "track.wav");

        wait_until(&handle, |s| s.title == "track").await;
        settle_blocking().await;
        assert_eq!(handle.snapshot().title, "track");
        assert_eq!(backend.events(), vec![PlaybackEvent::Started(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_call_stops_ticking_until_next_call() {
        let (handle, _, _task) = spawn_runtime();
        handle.start_call();
        sleep(Duration::from_millis(2500)).await;
        handle.end_call();

        sleep(Duration::from_secs(5)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.elapsed_seconds, 0);
        assert_eq!(snapshot.phase, CallPhase::Idle);

        handle.start_call();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(handle.snapshot().elapsed_seconds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_media() {
        let (handle, backend, task) = spawn_runtime();
        handle.select_file(b"audio".to_vec(), "song.mp3");
        wait_until(&handle, |s| s.title == "song").await;
        assert_eq!(backend.live_outputs(), 1);

        handle.shutdown();
        task.await.unwrap();
        assert_eq!(backend.live_outputs(), 0);
        assert_eq!(handle.snapshot().phase, CallPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending_load() {
        let (handle, backend, task) = spawn_runtime();
        let mut events = handle.subscribe();
        handle.start_call();
        handle.select_file(FakeBackend::slow_bytes(), "song.mp3");
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            CallEvent::LoadStarted { name: "song.mp3".to_string() }
        );
        assert_eq!(
            next_event(&mut events).await,
            CallEvent::LoadDiscarded { name: "song.mp3".to_string() }
        );

        settle_blocking().await;
        assert!(backend.events().is_empty());
        assert_eq!(backend.live_outputs(), 0);
        assert_eq!(handle.snapshot().phase, CallPhase::Idle);
        assert_eq!(handle.snapshot().title, UNKNOWN_NAME);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_discards_pending_load() {
        let (handle, backend, task) = spawn_runtime();
        let state = handle.watch();
        let mut events = handle.subscribe();
        handle.start_call();
        handle.select_file(FakeBackend::slow_bytes(), "song.mp3");

        drop(handle);
        task.await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            CallEvent::LoadStarted { name: "song.mp3".to_string() }
        );
        assert_eq!(
            next_event(&mut events).await,
            CallEvent::LoadDiscarded { name: "song.mp3".to_string() }
        );

        settle_blocking().await;
        assert!(backend.events().is_empty());
        assert_eq!(backend.live_outputs(), 0);
        assert_eq!(state.borrow().phase, CallPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_tears_down() {
        let (handle, backend, task) = spawn_runtime();
        handle.select_file(b"audio".to_vec(), "song.mp3");
        wait_until(&handle, |s| s.title == "song").await;

        drop(handle);
        task.await.unwrap();
        assert_eq!(backend.live_outputs(), 0);
    }
}
