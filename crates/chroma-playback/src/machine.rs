//! Playback state machine.
//!
//! [`PlaybackMachine`] is the single owner of the queue, the session state,
//! the output sink and the focus arbiter. It is driven one [`Message`] at a
//! time and never blocks: sink loads complete later as generation-tagged
//! [`SinkEvent`]s.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use chroma_core::{Millis, Queue, QueueItem, Step, Track};
use crossbeam_channel::Sender;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::focus::{FocusArbiter, FocusChange, FocusGrant, FocusRequest, FocusState};
use crate::message::{Command, DeviceEvent, Generation, Message};
use crate::session::{Notice, PauseReason, SessionPublisher, SessionSnapshot, TransportState};
use crate::sink::{LoadRequest, OutputSink, SeekEpoch, SinkEvent, SinkEvents};

/// The authoritative "now playing" state.
#[derive(Debug, Default)]
struct SessionState {
    transport: TransportState,
    track: Option<Arc<Track>>,
    position: Millis,
    duration: Option<Millis>,
}

/// Playback state machine.
pub struct PlaybackMachine {
    config: EngineConfig,
    queue: Queue,
    state: SessionState,
    sink: Box<dyn OutputSink>,
    focus: Box<dyn FocusArbiter>,
    focus_state: FocusState,
    publisher: SessionPublisher,
    /// Feeds [`SinkEvents`] handles back into the worker's channel.
    events_tx: Sender<Message>,
    generation: Generation,
    /// Whether the sink holds a track.
    sink_loaded: bool,
    sink_ducked: bool,
    /// Start output as soon as the pending load is ready.
    play_when_ready: bool,
    pause_reason: Option<PauseReason>,
    pending_seek: Option<Millis>,
    /// Epoch of the last seek the sink accepted for the loaded track.
    seek_epoch: SeekEpoch,
    /// The next tick of `seek_epoch` replaces the position outright.
    tick_rebase: bool,
    consecutive_failures: usize,
    notice: Option<Notice>,
    last_published: Option<SessionSnapshot>,
    last_position_publish: Option<Instant>,
}

impl PlaybackMachine {
    pub fn new(
        config: EngineConfig,
        sink: Box<dyn OutputSink>,
        focus: Box<dyn FocusArbiter>,
        publisher: SessionPublisher,
        events_tx: Sender<Message>,
    ) -> Self {
        Self {
            config,
            queue: Queue::new(),
            state: SessionState::default(),
            sink,
            focus,
            focus_state: FocusState::None,
            publisher,
            events_tx,
            generation: Generation::default(),
            sink_loaded: false,
            sink_ducked: false,
            play_when_ready: false,
            pause_reason: None,
            pending_seek: None,
            seek_epoch: SeekEpoch::default(),
            tick_rebase: false,
            consecutive_failures: 0,
            notice: None,
            last_published: None,
            last_position_publish: None,
        }
    }

    /// Process one message. Breaks once the session has shut down.
    pub fn handle(&mut self, message: Message) -> ControlFlow<()> {
        let flow = match message {
            Message::Command(command) => {
                self.on_command(command);
                ControlFlow::Continue(())
            }
            Message::Sink { generation, event } => {
                self.on_sink_event(generation, event);
                ControlFlow::Continue(())
            }
            Message::Focus(change) => {
                self.on_focus_change(change);
                ControlFlow::Continue(())
            }
            Message::Device(event) => {
                self.on_device_event(event);
                ControlFlow::Continue(())
            }
            Message::Shutdown => {
                info!("Shutting down playback session");
                self.release();
                ControlFlow::Break(())
            }
        };
        self.commit();
        flow
    }

    /// Current session snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            transport_state: self.state.transport,
            track: self.state.track.clone(),
            position: self.state.position,
            duration: self.state.duration,
            focus: self.focus_state,
            pause_reason: self.pause_reason,
            queue_index: self.queue.current_index(),
            queue_len: self.queue.len(),
            has_next: self.queue.has_next(),
            shuffle: self.queue.is_shuffle(),
            repeat_mode: self.queue.repeat_mode(),
            generation: self.generation,
            notice: self.notice.clone(),
        }
    }

    /// Get the queue.
    pub const fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Get the transport state.
    pub const fn transport_state(&self) -> TransportState {
        self.state.transport
    }

    /// Get the live generation.
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    fn on_command(&mut self, command: Command) {
        debug!("Command: {command:?}");
        match command {
            Command::SetQueue {
                tracks,
                start_index,
                autoplay,
            } => self.set_queue(tracks, start_index, autoplay),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::TogglePlayPause => {
                if self.wants_playback() {
                    self.pause();
                } else {
                    self.play();
                }
            }
            Command::Stop => self.halt(TransportState::Idle),
            Command::Seek(offset) => self.seek(offset),
            Command::Next => {
                self.consecutive_failures = 0;
                let step = self.queue.advance();
                self.follow(step);
            }
            Command::Previous => {
                self.consecutive_failures = 0;
                let step = self
                    .queue
                    .previous(self.state.position, self.config.previous_restart_threshold());
                self.follow(step);
            }
            Command::MoveTo(index) => {
                self.consecutive_failures = 0;
                if self.queue.jump_to(index).is_some() {
                    self.follow(Step::Moved(index));
                } else {
                    warn!("No queue entry at index {index}");
                }
            }
            Command::Insert { track, index } => {
                let was_empty = self.queue.is_empty();
                self.queue.insert(index, QueueItem::new(track));
                if was_empty {
                    self.show_current();
                }
            }
            Command::RemoveAt(index) => self.remove_at(index),
            Command::Reorder { from, to } => {
                if !self.queue.move_item(from, to) {
                    warn!("Cannot move queue entry {from} to {to}");
                }
            }
            Command::ToggleShuffle => {
                let shuffle = self.queue.toggle_shuffle();
                info!("Shuffle {}", if shuffle { "on" } else { "off" });
            }
            Command::SetRepeatMode(mode) => self.queue.set_repeat_mode(mode),
            Command::CycleRepeat => {
                let mode = self.queue.cycle_repeat();
                info!("Repeat mode: {mode:?}");
            }
            Command::Release => self.release(),
        }
    }

    fn on_sink_event(&mut self, generation: Generation, event: SinkEvent) {
        if generation != self.generation {
            trace!(
                "Dropping stale {event:?} from generation {generation} (live {})",
                self.generation
            );
            return;
        }

        match event {
            SinkEvent::Ready { duration } => self.on_ready(duration),
            SinkEvent::PositionTick { position, epoch } => self.on_tick(position, epoch),
            SinkEvent::TrackEnded => self.on_track_ended(),
            SinkEvent::DecodeError(reason) => {
                if self.state.transport.is_active() {
                    let autoplay = self.wants_playback();
                    self.fail_current(reason, autoplay);
                } else {
                    debug!("Ignoring decode error while {:?}", self.state.transport);
                }
            }
        }
    }

    fn on_focus_change(&mut self, change: FocusChange) {
        debug!("Focus change: {change:?}");
        if !self.focus_state.is_held() {
            debug!("Ignoring {change:?}, focus is not held");
            return;
        }

        match change {
            FocusChange::PermanentLoss => {
                if self.state.transport.is_active() {
                    info!("Audio focus lost permanently, stopping");
                    self.halt(TransportState::Stopped);
                } else {
                    self.release_focus();
                }
            }
            FocusChange::TransientLoss => {
                self.focus_state = FocusState::LostTransient;
                self.interrupt(PauseReason::FocusLoss);
            }
            FocusChange::TransientLossCanDuck => {
                self.focus_state = FocusState::LostTransientCanDuck;
                if self.state.transport == TransportState::Playing {
                    self.apply_volume(true);
                    self.set_transport(TransportState::Ducked);
                }
            }
            FocusChange::Regained => {
                self.focus_state = FocusState::Granted;
                let resumable = self.pause_reason.is_some_and(PauseReason::resumes_on_regain);
                match self.state.transport {
                    TransportState::Ducked => {
                        self.apply_volume(false);
                        self.set_transport(TransportState::Playing);
                    }
                    TransportState::Paused if resumable => self.resume(),
                    TransportState::Loading if resumable => {
                        self.play_when_ready = true;
                        self.pause_reason = None;
                    }
                    _ => {}
                }
            }
        }
    }

    fn on_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::OutputDisconnected => {
                info!("Output disconnected");
                self.interrupt(PauseReason::OutputDisconnected);
            }
        }
    }

    fn set_queue(&mut self, tracks: Vec<Arc<Track>>, start_index: usize, autoplay: bool) {
        let items = tracks.into_iter().map(QueueItem::new).collect();
        self.queue.set(items, start_index);
        self.consecutive_failures = 0;
        info!("Queue set with {} tracks", self.queue.len());

        let Some(index) = self.queue.current_index() else {
            self.halt(TransportState::Idle);
            self.state.track = None;
            self.state.duration = None;
            return;
        };

        if !autoplay {
            self.halt(TransportState::Idle);
            return;
        }

        if self.acquire_focus() {
            self.load(index, Millis::ZERO, true);
        } else {
            self.load(index, Millis::ZERO, false);
            self.pause_reason = Some(PauseReason::AwaitingFocus);
        }
    }

    fn play(&mut self) {
        match self.state.transport {
            TransportState::Playing | TransportState::Ducked => {}
            TransportState::Loading => {
                if !self.play_when_ready && self.acquire_focus() {
                    self.play_when_ready = true;
                    self.pause_reason = None;
                }
            }
            TransportState::Paused => {
                if self.acquire_focus() {
                    self.resume();
                }
            }
            TransportState::Idle | TransportState::Stopped | TransportState::Error => {
                let Some(index) = self.queue.current_index() else {
                    debug!("Nothing to play");
                    return;
                };
                if self.acquire_focus() {
                    self.consecutive_failures = 0;
                    self.load(index, Millis::ZERO, true);
                }
            }
        }
    }

    fn pause(&mut self) {
        match self.state.transport {
            TransportState::Playing | TransportState::Ducked => {
                check("pause", self.sink.pause());
                self.pause_reason = Some(PauseReason::User);
                self.set_transport(TransportState::Paused);
            }
            TransportState::Loading => {
                self.play_when_ready = false;
                self.pause_reason = Some(PauseReason::User);
            }
            TransportState::Paused => {
                self.pause_reason = Some(PauseReason::User);
            }
            _ => {}
        }
    }

    /// Pause without user intent; `reason` decides whether focus regain resumes.
    fn interrupt(&mut self, reason: PauseReason) {
        match self.state.transport {
            TransportState::Playing | TransportState::Ducked => {
                check("pause", self.sink.pause());
                self.pause_reason = Some(reason);
                self.set_transport(TransportState::Paused);
            }
            TransportState::Loading if self.play_when_ready => {
                self.play_when_ready = false;
                self.pause_reason = Some(reason);
            }
            _ => {}
        }
    }

    /// Start output of the loaded track.
    fn resume(&mut self) {
        let ducked = self.focus_state == FocusState::LostTransientCanDuck;
        self.apply_volume(ducked);
        if let Err(e) = self.sink.start() {
            warn!("Sink failed to start: {e}");
            self.fail_current(e.to_string(), true);
            return;
        }
        self.pause_reason = None;
        self.play_when_ready = false;
        self.set_transport(if ducked {
            TransportState::Ducked
        } else {
            TransportState::Playing
        });
    }

    fn seek(&mut self, offset: Millis) {
        match self.state.transport {
            TransportState::Playing | TransportState::Paused | TransportState::Ducked => {
                let target = offset.clamp_to(self.state.duration);
                if target != offset {
                    debug!("Seek to {offset:?} clamped to {target:?}");
                }
                self.seek_sink(target);
            }
            TransportState::Loading => {
                debug!("Deferring seek to {offset:?} until ready");
                self.pending_seek = Some(offset);
            }
            state => debug!("Ignoring seek while {state:?}"),
        }
    }

    fn remove_at(&mut self, index: usize) {
        let Some(removed) = self.queue.remove_at(index) else {
            warn!("No queue entry at index {index}");
            return;
        };
        debug!("Removed {} from queue", removed.item.track.id);
        if !removed.was_current {
            return;
        }

        match self.queue.current_index() {
            Some(current) => self.follow(Step::Moved(current)),
            None => {
                self.halt(TransportState::Idle);
                self.state.track = None;
                self.state.duration = None;
            }
        }
    }

    /// Apply a queue step, keeping the current play intent.
    fn follow(&mut self, step: Step) {
        let active = self.state.transport.is_active();
        match step {
            Step::Moved(index) if active => {
                let autoplay = self.wants_playback();
                self.load(index, Millis::ZERO, autoplay);
            }
            Step::Restart(index) if active => {
                if self.state.transport == TransportState::Loading {
                    let autoplay = self.play_when_ready;
                    self.load(index, Millis::ZERO, autoplay);
                } else {
                    self.seek_sink(Millis::ZERO);
                }
            }
            Step::Moved(_) | Step::Restart(_) => self.show_current(),
            Step::End if active => {
                info!("Queue exhausted");
                self.halt(TransportState::Stopped);
            }
            Step::End => debug!("No further queue entry"),
        }
    }

    fn on_ready(&mut self, duration: Option<Millis>) {
        if self.state.transport != TransportState::Loading {
            debug!("Ignoring ready while {:?}", self.state.transport);
            return;
        }
        if duration.is_some() {
            self.state.duration = duration;
        }
        if let Some(offset) = self.pending_seek.take() {
            self.seek_sink(offset.clamp_to(self.state.duration));
        }

        if self.play_when_ready && self.focus_state.allows_playback() {
            self.resume();
            return;
        }
        if self.play_when_ready {
            self.pause_reason = Some(PauseReason::AwaitingFocus);
        }
        self.play_when_ready = false;
        self.pause_reason.get_or_insert(PauseReason::User);
        self.set_transport(TransportState::Paused);
    }

    /// Move the sink to `target` under a fresh seek epoch.
    fn seek_sink(&mut self, target: Millis) {
        let epoch = self.seek_epoch.next();
        match self.sink.seek(target, epoch) {
            Ok(()) => {
                self.seek_epoch = epoch;
                self.tick_rebase = true;
                self.state.position = target;
            }
            Err(e) => warn!("Sink failed to seek to {target:?}: {e}"),
        }
    }

    fn on_tick(&mut self, position: Millis, epoch: SeekEpoch) {
        if epoch != self.seek_epoch {
            trace!("Dropping tick {position:?} from {epoch} (live {})", self.seek_epoch);
            return;
        }
        if !self.state.transport.is_audible() {
            trace!("Ignoring tick while {:?}", self.state.transport);
            return;
        }
        let position = position.clamp_to(self.state.duration);
        if std::mem::take(&mut self.tick_rebase) {
            self.state.position = position;
            return;
        }
        if position < self.state.position {
            trace!(
                "Dropping backwards tick {position:?} (at {:?})",
                self.state.position
            );
            return;
        }
        self.state.position = position;
    }

    fn on_track_ended(&mut self) {
        let autoplay = match self.state.transport {
            TransportState::Playing | TransportState::Ducked => true,
            TransportState::Paused => false,
            state => {
                debug!("Ignoring track end while {state:?}");
                return;
            }
        };
        self.consecutive_failures = 0;
        if let Some(duration) = self.state.duration {
            self.state.position = duration;
        }

        match self.queue.advance() {
            Step::Moved(index) | Step::Restart(index) => self.load(index, Millis::ZERO, autoplay),
            Step::End => {
                info!("Queue exhausted");
                self.halt(TransportState::Stopped);
            }
        }
    }

    /// Load a queue entry, skipping entries the sink rejects outright.
    fn load(&mut self, index: usize, offset: Millis, autoplay: bool) {
        let mut next = Some((index, offset));
        while let Some((index, offset)) = next.take() {
            let Some(item) = self.queue.get(index) else {
                warn!("No queue entry at index {index}");
                return;
            };
            let track = Arc::clone(&item.track);

            self.generation = self.generation.next();
            self.state.track = Some(Arc::clone(&track));
            self.state.position = offset;
            self.state.duration = track.duration;
            self.pending_seek = None;
            self.seek_epoch = SeekEpoch::default();
            self.tick_rebase = false;
            self.play_when_ready = autoplay;
            if autoplay {
                self.pause_reason = None;
            }
            self.sink_loaded = true;
            self.set_transport(TransportState::Loading);
            debug!("Loading {} (generation {})", track.id, self.generation);

            let request = LoadRequest {
                generation: self.generation,
                track,
                offset,
                events: SinkEvents::new(self.generation, self.events_tx.clone()),
            };
            if let Err(e) = self.sink.load(request) {
                next = self
                    .recover(e.to_string())
                    .map(|index| (index, Millis::ZERO));
            }
        }
    }

    /// Surface a failure of the current track and move on.
    fn fail_current(&mut self, reason: String, autoplay: bool) {
        if let Some(index) = self.recover(reason) {
            self.load(index, Millis::ZERO, autoplay);
        }
    }

    /// Publish an error for the current track and pick the entry to try next.
    ///
    /// Returns `None` once every entry has failed in a row or the queue ran
    /// out, leaving the session `Stopped`.
    fn recover(&mut self, reason: String) -> Option<usize> {
        let track_id = self
            .state
            .track
            .as_ref()
            .map(|track| track.id.clone())
            .unwrap_or_default();
        warn!("Failed to play {track_id}: {reason}");

        self.generation = self.generation.next();
        self.release_sink();
        self.consecutive_failures += 1;
        self.notice = Some(Notice::DecodeFailed { track_id, reason });
        self.set_transport(TransportState::Error);
        let snapshot = self.snapshot();
        self.publish(snapshot);

        if self.consecutive_failures >= self.queue.len() {
            warn!(
                "{} consecutive tracks failed, stopping",
                self.consecutive_failures
            );
            self.halt(TransportState::Stopped);
            return None;
        }

        match self.queue.skip() {
            Step::Moved(index) | Step::Restart(index) => Some(index),
            Step::End => {
                info!("Queue exhausted");
                self.halt(TransportState::Stopped);
                None
            }
        }
    }

    /// Stop output, release focus, and settle in `target`.
    fn halt(&mut self, target: TransportState) {
        self.generation = self.generation.next();
        self.release_sink();
        self.release_focus();
        self.play_when_ready = false;
        self.pause_reason = None;
        self.pending_seek = None;
        self.show_current();
        self.set_transport(target);
    }

    /// End the session and clear the queue.
    fn release(&mut self) {
        self.halt(TransportState::Idle);
        self.queue.clear();
        self.state.track = None;
        self.state.duration = None;
    }

    /// Point the session at the queue's current entry without loading it.
    fn show_current(&mut self) {
        let track = self.queue.current().map(|item| Arc::clone(&item.track));
        let same = match (&track, &self.state.track) {
            (Some(a), Some(b)) => a.id == b.id,
            _ => false,
        };
        if !same {
            self.state.duration = track.as_ref().and_then(|track| track.duration);
        }
        self.state.track = track;
        self.state.position = Millis::ZERO;
    }

    fn release_sink(&mut self) {
        self.apply_volume(false);
        if self.sink_loaded {
            check("stop", self.sink.stop());
            self.sink_loaded = false;
        }
    }

    fn acquire_focus(&mut self) -> bool {
        if self.focus_state.allows_playback() {
            return true;
        }
        match self.focus.request(FocusRequest::Gain) {
            FocusGrant::Granted => {
                debug!("Audio focus granted");
                self.focus_state = FocusState::Granted;
                true
            }
            FocusGrant::Denied => {
                warn!("Audio focus denied");
                self.notice = Some(Notice::FocusDenied);
                false
            }
        }
    }

    fn release_focus(&mut self) {
        if self.focus_state.is_held() {
            self.focus.release();
            self.focus_state = FocusState::None;
            debug!("Audio focus released");
        }
    }

    fn apply_volume(&mut self, ducked: bool) {
        if self.sink_ducked == ducked {
            return;
        }
        let volume = if ducked {
            self.config.duck_volume
        } else {
            self.config.volume
        };
        check("set volume", self.sink.set_volume(volume));
        self.sink_ducked = ducked;
    }

    /// Whether the user currently expects audible output.
    const fn wants_playback(&self) -> bool {
        match self.state.transport {
            TransportState::Playing | TransportState::Ducked => true,
            TransportState::Loading => self.play_when_ready,
            _ => false,
        }
    }

    fn set_transport(&mut self, state: TransportState) {
        if self.state.transport != state {
            debug!("State changed: {:?} -> {:?}", self.state.transport, state);
            self.state.transport = state;
        }
    }

    /// Publish if anything changed; position-only changes are throttled.
    fn commit(&mut self) {
        let snapshot = self.snapshot();
        let changed = self
            .last_published
            .as_ref()
            .map_or(true, |last| snapshot.differs_beyond_position(last));

        if changed {
            self.publish(snapshot);
            return;
        }

        let moved = self
            .last_published
            .as_ref()
            .is_some_and(|last| last.position != snapshot.position);
        let due = self
            .last_position_publish
            .map_or(true, |at| at.elapsed() >= self.config.position_publish_interval());
        if moved && due {
            self.publish(snapshot);
        }
    }

    fn publish(&mut self, snapshot: SessionSnapshot) {
        self.notice = None;
        self.last_position_publish = Some(Instant::now());
        self.last_published = Some(SessionSnapshot {
            notice: None,
            ..snapshot.clone()
        });
        self.publisher.publish(snapshot);
    }
}

fn check(what: &str, result: chroma_core::Result<()>) {
    if let Err(e) = result {
        warn!("Sink failed to {what}: {e}");
    }
}
