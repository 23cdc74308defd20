//! Threaded playback engine.
//!
//! [`AudioEngine`] spawns the `chroma-engine` worker that owns the
//! [`PlaybackMachine`]. Every producer (UI, sink threads, focus callbacks)
//! talks to it through a clonable [`EngineHandle`].

use std::sync::Arc;
use std::thread::JoinHandle;

use chroma_core::{Error, Millis, RepeatMode, Result, Track};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::focus::{FocusArbiter, FocusChange};
use crate::machine::PlaybackMachine;
use crate::message::{Command, DeviceEvent, Message};
use crate::session::{ObserverId, SessionPublisher, SessionSnapshot};
use crate::sink::OutputSink;

/// Clonable sender into the playback worker.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: Sender<Message>,
}

impl EngineHandle {
    /// Send a raw message.
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.tx.send(message.into()).map_err(|_| Error::EngineClosed)
    }

    /// Send a command.
    pub fn command(&self, command: Command) -> Result<()> {
        self.send(command)
    }

    /// Replace the queue.
    pub fn set_queue(&self, tracks: Vec<Arc<Track>>, start_index: usize, autoplay: bool) -> Result<()> {
        self.command(Command::SetQueue {
            tracks,
            start_index,
            autoplay,
        })
    }

    pub fn play(&self) -> Result<()> {
        self.command(Command::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.command(Command::Pause)
    }

    pub fn toggle(&self) -> Result<()> {
        self.command(Command::TogglePlayPause)
    }

    pub fn stop(&self) -> Result<()> {
        self.command(Command::Stop)
    }

    pub fn seek(&self, position: Millis) -> Result<()> {
        self.command(Command::Seek(position))
    }

    pub fn next(&self) -> Result<()> {
        self.command(Command::Next)
    }

    pub fn previous(&self) -> Result<()> {
        self.command(Command::Previous)
    }

    pub fn move_to(&self, index: usize) -> Result<()> {
        self.command(Command::MoveTo(index))
    }

    pub fn insert(&self, track: Arc<Track>, index: usize) -> Result<()> {
        self.command(Command::Insert { track, index })
    }

    pub fn remove_at(&self, index: usize) -> Result<()> {
        self.command(Command::RemoveAt(index))
    }

    pub fn reorder(&self, from: usize, to: usize) -> Result<()> {
        self.command(Command::Reorder { from, to })
    }

    pub fn toggle_shuffle(&self) -> Result<()> {
        self.command(Command::ToggleShuffle)
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        self.command(Command::SetRepeatMode(mode))
    }

    pub fn cycle_repeat(&self) -> Result<()> {
        self.command(Command::CycleRepeat)
    }

    pub fn release(&self) -> Result<()> {
        self.command(Command::Release)
    }

    /// Forward a focus notification from the platform.
    pub fn focus_changed(&self, change: FocusChange) -> Result<()> {
        self.send(change)
    }

    /// Forward a "becoming noisy" notification.
    pub fn output_disconnected(&self) -> Result<()> {
        self.send(DeviceEvent::OutputDisconnected)
    }
}

/// Playback engine running on its own thread.
pub struct AudioEngine {
    handle: EngineHandle,
    publisher: SessionPublisher,
    worker: Option<JoinHandle<()>>,
}

impl AudioEngine {
    /// Start the engine worker.
    pub fn new(
        config: EngineConfig,
        mut sink: impl OutputSink + 'static,
        focus: impl FocusArbiter + 'static,
    ) -> Result<Self> {
        config.validate()?;
        sink.set_volume(config.volume)?;

        let (tx, rx) = unbounded();
        let publisher = SessionPublisher::new(config.observer_buffer);
        let machine = PlaybackMachine::new(
            config,
            Box::new(sink),
            Box::new(focus),
            publisher.clone(),
            tx.clone(),
        );

        let worker = std::thread::Builder::new()
            .name("chroma-engine".to_string())
            .spawn(move || run(machine, &rx))
            .map_err(|e| Error::Internal(format!("Failed to spawn engine thread: {e}")))?;

        Ok(Self {
            handle: EngineHandle { tx },
            publisher,
            worker: Some(worker),
        })
    }

    /// Get a handle for sending commands.
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Get the most recently published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.publisher.latest()
    }

    /// Register a snapshot observer.
    pub fn subscribe<F>(&self, callback: F) -> Result<ObserverId>
    where
        F: Fn(&SessionSnapshot) + Send + 'static,
    {
        self.publisher.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.publisher.unsubscribe(id)
    }

    /// Release the session and wait for the worker to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_worker()
    }

    fn stop_worker(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let _ = self.handle.tx.send(Message::Shutdown);
        let joined = worker
            .join()
            .map_err(|_| Error::Internal("Engine worker panicked".into()));
        self.publisher.close_all();
        joined
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop_worker() {
            error!("Failed to stop engine: {e}");
        }
    }
}

fn run(mut machine: PlaybackMachine, rx: &Receiver<Message>) {
    info!("Playback engine started");
    for message in rx {
        if machine.handle(message).is_break() {
            break;
        }
    }
    debug!("Playback engine stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use crate::session::TransportState;
    use crate::testing::{FocusRecorder, SinkCall, SinkRecorder};
    use std::time::Duration;

    fn engine() -> (AudioEngine, SinkRecorder, FocusRecorder) {
        let sink = SinkRecorder::default();
        let focus = FocusRecorder::default();
        let engine = AudioEngine::new(EngineConfig::default(), sink.sink(), focus.arbiter()).unwrap();
        (engine, sink, focus)
    }

    fn tracks() -> Vec<Arc<Track>> {
        ["a", "b"]
            .into_iter()
            .map(|id| {
                Arc::new(
                    Track::new(id, format!("/music/{id}.flac")).with_duration(Millis(180_000)),
                )
            })
            .collect()
    }

    #[test]
    fn test_round_trip_from_another_thread() {
        let (engine, sink, _focus) = engine();
        let (tx, rx) = unbounded();
        engine
            .subscribe(move |snapshot| {
                let _ = tx.send(snapshot.transport_state);
            })
            .unwrap();

        let handle = engine.handle();
        std::thread::spawn(move || {
            handle.set_queue(tracks(), 0, true).unwrap();
        })
        .join()
        .unwrap();

        let timeout = Duration::from_secs(5);
        while rx.recv_timeout(timeout).unwrap() != TransportState::Loading {}

        // The sink thread reports readiness through the load's event handle.
        sink.last_events().ready(None);
        while rx.recv_timeout(timeout).unwrap() != TransportState::Playing {}
        assert_eq!(engine.snapshot().transport_state, TransportState::Playing);

        engine.handle().pause().unwrap();
        while rx.recv_timeout(timeout).unwrap() != TransportState::Paused {}

        engine.shutdown().unwrap();
        assert_eq!(sink.calls().last(), Some(&SinkCall::Stop));
    }

    #[test]
    fn test_handle_after_shutdown() {
        let (engine, _sink, focus) = engine();
        let handle = engine.handle();
        handle.set_queue(tracks(), 0, true).unwrap();
        engine.shutdown().unwrap();

        assert!(matches!(handle.play(), Err(Error::EngineClosed)));
        assert_eq!(focus.releases(), 1);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig {
            duck_volume: 2.0,
            ..EngineConfig::default()
        };
        let result = AudioEngine::new(config, SinkRecorder::default().sink(), FocusRecorder::default().arbiter());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_configured_volume_applied_at_start() {
        let sink = SinkRecorder::default();
        let config = EngineConfig {
            volume: 0.5,
            ..EngineConfig::default()
        };
        let engine = AudioEngine::new(config, sink.sink(), FocusRecorder::default().arbiter()).unwrap();
        assert_eq!(sink.last_volume(), Some(0.5));
        engine.shutdown().unwrap();
    }
}
