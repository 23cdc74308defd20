//! Recording mocks for machine and engine tests.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chroma_core::{Error, Millis, Result, Track, TrackId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::focus::{FocusArbiter, FocusChange, FocusGrant, FocusRequest};
use crate::machine::PlaybackMachine;
use crate::message::{Command, DeviceEvent, Message};
use crate::session::{SessionPublisher, SessionSnapshot, TransportState};
use crate::sink::{LoadRequest, OutputSink, SeekEpoch, SinkEvents};

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Load(TrackId),
    Start,
    Pause,
    Seek(Millis),
    SetVolume(f32),
    Stop,
}

#[derive(Default)]
struct SinkLog {
    calls: Vec<SinkCall>,
    events: Option<SinkEvents>,
    epoch: SeekEpoch,
    fail_loads: bool,
    fail_start: bool,
}

/// Shared view of a [`MockSink`].
#[derive(Clone, Default)]
pub struct SinkRecorder {
    log: Arc<Mutex<SinkLog>>,
}

impl SinkRecorder {
    pub fn sink(&self) -> MockSink {
        MockSink { recorder: self.clone() }
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.log.lock().calls.clone()
    }

    pub fn count(&self, call: &SinkCall) -> usize {
        self.log.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn loads(&self) -> usize {
        self.log
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, SinkCall::Load(_)))
            .count()
    }

    pub fn last_volume(&self) -> Option<f32> {
        self.log.lock().calls.iter().rev().find_map(|c| match c {
            SinkCall::SetVolume(v) => Some(*v),
            _ => None,
        })
    }

    /// Event handle of the most recent load.
    pub fn last_events(&self) -> SinkEvents {
        self.log.lock().events.clone().unwrap()
    }

    /// Seek epoch the sink would stamp on its next tick.
    pub fn epoch(&self) -> SeekEpoch {
        self.log.lock().epoch
    }

    pub fn fail_all_loads(&self) {
        self.log.lock().fail_loads = true;
    }

    pub fn fail_start(&self) {
        self.log.lock().fail_start = true;
    }

    fn record(&self, call: SinkCall) {
        self.log.lock().calls.push(call);
    }
}

pub struct MockSink {
    recorder: SinkRecorder,
}

impl OutputSink for MockSink {
    fn load(&mut self, request: LoadRequest) -> Result<()> {
        self.recorder.record(SinkCall::Load(request.track.id.clone()));
        let mut log = self.recorder.log.lock();
        log.events = Some(request.events);
        log.epoch = SeekEpoch::default();
        if log.fail_loads {
            return Err(Error::decode(&request.track.id, "unreadable"));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.recorder.record(SinkCall::Start);
        if self.recorder.log.lock().fail_start {
            return Err(Error::AudioOutput("device busy".into()));
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.recorder.record(SinkCall::Pause);
        Ok(())
    }

    fn seek(&mut self, offset: Millis, epoch: SeekEpoch) -> Result<()> {
        self.recorder.record(SinkCall::Seek(offset));
        self.recorder.log.lock().epoch = epoch;
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.recorder.record(SinkCall::SetVolume(volume));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.recorder.record(SinkCall::Stop);
        Ok(())
    }
}

#[derive(Default)]
struct FocusLog {
    requests: usize,
    releases: usize,
    deny: bool,
}

/// Shared view of a [`MockFocus`].
#[derive(Clone, Default)]
pub struct FocusRecorder {
    log: Arc<Mutex<FocusLog>>,
}

impl FocusRecorder {
    pub fn arbiter(&self) -> MockFocus {
        MockFocus { recorder: self.clone() }
    }

    pub fn requests(&self) -> usize {
        self.log.lock().requests
    }

    pub fn releases(&self) -> usize {
        self.log.lock().releases
    }

    pub fn deny(&self) {
        self.log.lock().deny = true;
    }
}

pub struct MockFocus {
    recorder: FocusRecorder,
}

impl FocusArbiter for MockFocus {
    fn request(&mut self, _kind: FocusRequest) -> FocusGrant {
        let mut log = self.recorder.log.lock();
        log.requests += 1;
        if log.deny {
            FocusGrant::Denied
        } else {
            FocusGrant::Granted
        }
    }

    fn release(&mut self) {
        self.recorder.log.lock().releases += 1;
    }
}

/// Snapshots collected by an observer.
pub struct Observed {
    rx: Receiver<SessionSnapshot>,
}

impl Observed {
    /// Wait for the first snapshot matching `predicate`.
    pub fn wait_for(&self, predicate: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
        loop {
            let snapshot = self.rx.recv_timeout(Duration::from_secs(5)).unwrap();
            if predicate(&snapshot) {
                return snapshot;
            }
        }
    }
}

/// A machine wired to recording mocks, driven synchronously.
pub struct Harness {
    pub machine: PlaybackMachine,
    pub sink: SinkRecorder,
    pub focus: FocusRecorder,
    pub publisher: SessionPublisher,
    rx: Receiver<Message>,
}

impl Harness {
    /// Tracks `t0..tN` with the given durations in milliseconds.
    pub fn tracks(durations: &[u64]) -> Vec<Arc<Track>> {
        durations
            .iter()
            .enumerate()
            .map(|(i, &ms)| {
                Arc::new(
                    Track::new(format!("t{i}"), format!("/music/t{i}.flac"))
                        .with_duration(Millis(ms)),
                )
            })
            .collect()
    }

    /// Idle machine with a queue of tracks.
    pub fn new(durations: &[u64]) -> Self {
        let (tx, rx): (Sender<Message>, Receiver<Message>) = unbounded();
        let sink = SinkRecorder::default();
        let focus = FocusRecorder::default();
        let publisher = SessionPublisher::new(64);
        let machine = PlaybackMachine::new(
            EngineConfig::default(),
            Box::new(sink.sink()),
            Box::new(focus.arbiter()),
            publisher.clone(),
            tx,
        );

        let mut harness = Self {
            machine,
            sink,
            focus,
            publisher,
            rx,
        };
        harness.command(Command::SetQueue {
            tracks: Self::tracks(durations),
            start_index: 0,
            autoplay: false,
        });
        harness
    }

    pub fn state(&self) -> TransportState {
        self.machine.transport_state()
    }

    pub fn observe(&self) -> Observed {
        let (tx, rx) = unbounded();
        self.publisher
            .subscribe(move |snapshot| {
                let _ = tx.send(snapshot.clone());
            })
            .unwrap();
        Observed { rx }
    }

    /// Feed every queued sink event to the machine.
    pub fn pump(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            let _ = self.machine.handle(message);
        }
    }

    pub fn command(&mut self, command: Command) {
        let _ = self.machine.handle(Message::Command(command));
        self.pump();
    }

    pub fn focus_change(&mut self, change: FocusChange) {
        let _ = self.machine.handle(Message::Focus(change));
        self.pump();
    }

    pub fn device(&mut self, event: DeviceEvent) {
        let _ = self.machine.handle(Message::Device(event));
        self.pump();
    }

    pub fn ready(&mut self, duration: Option<Millis>) {
        self.sink.last_events().ready(duration);
        self.pump();
    }

    pub fn tick(&mut self, position: Millis) {
        let epoch = self.sink.epoch();
        self.tick_at(position, epoch);
    }

    /// Tick stamped with an explicit seek epoch.
    pub fn tick_at(&mut self, position: Millis, epoch: SeekEpoch) {
        self.sink.last_events().position(position, epoch);
        self.pump();
    }

    pub fn ended(&mut self) {
        self.sink.last_events().ended();
        self.pump();
    }

    pub fn fail(&mut self, reason: &str) {
        self.sink.last_events().failed(reason);
        self.pump();
    }
}
