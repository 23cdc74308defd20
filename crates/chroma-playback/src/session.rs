//! Session snapshots and their fan-out to observers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chroma_core::{Millis, RepeatMode, Result, Track, TrackId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::focus::FocusState;
use crate::message::Generation;

/// Transport state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    /// Nothing loaded.
    #[default]
    Idle,
    /// A track is being prepared.
    Loading,
    /// Audible at normal volume.
    Playing,
    /// Loaded but silent.
    Paused,
    /// Audible at reduced volume while another app speaks.
    Ducked,
    /// Output released after the queue ran out or focus was lost for good.
    Stopped,
    /// The current track failed to decode.
    Error,
}

impl TransportState {
    /// Whether output is audible.
    pub const fn is_audible(self) -> bool {
        matches!(self, Self::Playing | Self::Ducked)
    }

    /// Whether a track is held by the sink.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Loading | Self::Playing | Self::Paused | Self::Ducked
        )
    }
}

/// Why the session is paused. Decides whether focus regain resumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    /// Paused by the user; only the user resumes.
    User,
    /// Paused by a transient focus loss.
    FocusLoss,
    /// Loaded while focus was not yet granted.
    AwaitingFocus,
    /// The output route went away.
    OutputDisconnected,
}

impl PauseReason {
    /// Whether a focus regain should resume playback.
    pub const fn resumes_on_regain(self) -> bool {
        matches!(self, Self::FocusLoss | Self::AwaitingFocus)
    }
}

/// One-shot signal attached to a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    /// Play was refused by the focus arbiter.
    FocusDenied,
    /// A track failed and is being skipped.
    DecodeFailed { track_id: TrackId, reason: String },
}

/// Controls an observer should enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Actions {
    pub play: bool,
    pub pause: bool,
    pub next: bool,
    pub previous: bool,
    pub seek: bool,
}

/// Immutable view of the playback session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub transport_state: TransportState,
    pub track: Option<Arc<Track>>,
    pub position: Millis,
    pub duration: Option<Millis>,
    pub focus: FocusState,
    pub pause_reason: Option<PauseReason>,
    pub queue_index: Option<usize>,
    pub queue_len: usize,
    pub has_next: bool,
    pub shuffle: bool,
    pub repeat_mode: RepeatMode,
    pub generation: Generation,
    pub notice: Option<Notice>,
}

impl SessionSnapshot {
    /// Controls valid in this state.
    pub fn actions(&self) -> Actions {
        let has_track = self.track.is_some();
        let state = self.transport_state;
        Actions {
            play: has_track && !state.is_audible(),
            pause: state.is_audible() || state == TransportState::Loading,
            next: has_track && self.has_next,
            previous: has_track,
            seek: matches!(
                state,
                TransportState::Playing | TransportState::Paused | TransportState::Ducked
            ),
        }
    }

    /// Whether anything besides `position` differs from `other`.
    pub fn differs_beyond_position(&self, other: &Self) -> bool {
        self.transport_state != other.transport_state
            || self.track_id() != other.track_id()
            || self.duration != other.duration
            || self.focus != other.focus
            || self.pause_reason != other.pause_reason
            || self.queue_index != other.queue_index
            || self.queue_len != other.queue_len
            || self.has_next != other.has_next
            || self.shuffle != other.shuffle
            || self.repeat_mode != other.repeat_mode
            || self.generation != other.generation
            || self.notice.is_some()
    }

    pub fn track_id(&self) -> Option<&TrackId> {
        self.track.as_ref().map(|track| &track.id)
    }
}

impl fmt::Display for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}]", self.transport_state)?;
        if let Some(track) = &self.track {
            write!(
                f,
                " {} - {}",
                track.display_artist(),
                track.display_title()
            )?;
            match self.duration {
                Some(duration) => write!(f, " ({} / {})", self.position.format(), duration.format())?,
                None => write!(f, " ({})", self.position.format())?,
            }
        }
        if let (Some(index), len) = (self.queue_index, self.queue_len) {
            write!(f, " #{}/{len}", index + 1)?;
        }
        if let Some(reason) = self.pause_reason {
            write!(f, " paused:{reason:?}")?;
        }
        Ok(())
    }
}

/// Identifies a subscribed observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ObserverSlot {
    tx: Sender<Arc<SessionSnapshot>>,
    /// Publisher-side handle for evicting the oldest queued snapshot.
    rx: Receiver<Arc<SessionSnapshot>>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

struct Inner {
    observers: Mutex<HashMap<ObserverId, ObserverSlot>>,
    latest: RwLock<SessionSnapshot>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Fans snapshots out to observers.
///
/// Each observer gets a bounded channel drained by its own thread, so
/// [`publish`](Self::publish) never waits on observer code. An observer that
/// falls behind loses its oldest queued snapshots, never the newest.
#[derive(Clone)]
pub struct SessionPublisher {
    inner: Arc<Inner>,
}

impl SessionPublisher {
    /// Create a publisher buffering `buffer` snapshots per observer.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                observers: Mutex::new(HashMap::new()),
                latest: RwLock::new(SessionSnapshot::default()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register an observer. It immediately receives the latest snapshot.
    pub fn subscribe<F>(&self, callback: F) -> Result<ObserverId>
    where
        F: Fn(&SessionSnapshot) + Send + 'static,
    {
        let id = ObserverId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = bounded::<Arc<SessionSnapshot>>(self.inner.buffer);
        let queue = rx.clone();

        let worker = std::thread::Builder::new()
            .name(format!("chroma-observer-{id}"))
            .spawn(move || {
                for snapshot in rx {
                    callback(&snapshot);
                }
                trace!("Observer {id} finished");
            })?;

        // Publishers store `latest` before taking this lock.
        let mut observers = self.inner.observers.lock();
        let latest = Arc::new(self.inner.latest.read().clone());
        let _ = tx.try_send(latest);
        observers.insert(
            id,
            ObserverSlot {
                tx,
                rx: queue,
                dropped: Arc::new(AtomicU64::new(0)),
                worker: Some(worker),
            },
        );
        drop(observers);
        debug!("Observer {id} subscribed");
        Ok(id)
    }

    /// Remove an observer. Returns `false` if it was not subscribed.
    ///
    /// Snapshots already queued for it are still delivered before its thread
    /// exits.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let slot = self.inner.observers.lock().remove(&id);
        match slot {
            Some(slot) => {
                Self::close(id, slot);
                true
            }
            None => false,
        }
    }

    /// Deliver a snapshot to every observer without blocking.
    pub fn publish(&self, snapshot: SessionSnapshot) {
        *self.inner.latest.write() = snapshot.clone();

        let snapshot = Arc::new(snapshot);
        let mut disconnected = Vec::new();
        {
            let observers = self.inner.observers.lock();
            for (id, slot) in observers.iter() {
                if slot.worker.as_ref().map_or(true, JoinHandle::is_finished) {
                    disconnected.push(*id);
                    continue;
                }
                match slot.tx.try_send(Arc::clone(&snapshot)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(snapshot)) => {
                        let _ = slot.rx.try_recv();
                        let total = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        trace!("Observer {id} is behind, dropped {total} snapshots");
                        let _ = slot.tx.try_send(snapshot);
                    }
                    Err(TrySendError::Disconnected(_)) => disconnected.push(*id),
                }
            }
        }

        for id in disconnected {
            warn!("Observer {id} went away");
            self.unsubscribe(id);
        }
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> SessionSnapshot {
        self.inner.latest.read().clone()
    }

    /// Snapshots dropped for an observer because it fell behind.
    pub fn dropped(&self, id: ObserverId) -> Option<u64> {
        self.inner
            .observers
            .lock()
            .get(&id)
            .map(|slot| slot.dropped.load(Ordering::Relaxed))
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    /// Unsubscribe everyone and wait for their threads.
    pub fn close_all(&self) {
        let slots: Vec<_> = self.inner.observers.lock().drain().collect();
        for (id, slot) in slots {
            Self::close(id, slot);
        }
    }

    fn close(id: ObserverId, mut slot: ObserverSlot) {
        drop(slot.tx);
        let dropped = slot.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            debug!("Observer {id} unsubscribed after dropping {dropped} snapshots");
        } else {
            debug!("Observer {id} unsubscribed");
        }
        if let Some(worker) = slot.worker.take() {
            // An observer unsubscribing itself would otherwise join its own thread.
            if worker.thread().id() != std::thread::current().id() && worker.join().is_err() {
                warn!("Observer {id} panicked");
            }
        }
    }
}

impl fmt::Debug for SessionPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPublisher")
            .field("observers", &self.observer_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    fn snapshot(state: TransportState, position: u64) -> SessionSnapshot {
        SessionSnapshot {
            transport_state: state,
            track: Some(Arc::new(Track::new("a", "/music/a.flac"))),
            position: Millis(position),
            duration: Some(Millis(180_000)),
            queue_index: Some(0),
            queue_len: 2,
            has_next: true,
            ..SessionSnapshot::default()
        }
    }

    #[test]
    fn test_actions() {
        let playing = snapshot(TransportState::Playing, 0).actions();
        assert!(!playing.play);
        assert!(playing.pause);
        assert!(playing.next);
        assert!(playing.seek);

        let paused = snapshot(TransportState::Paused, 0).actions();
        assert!(paused.play);
        assert!(!paused.pause);

        let idle = SessionSnapshot::default().actions();
        assert_eq!(idle, Actions::default());
    }

    #[test]
    fn test_differs_beyond_position() {
        let a = snapshot(TransportState::Playing, 1000);
        let b = snapshot(TransportState::Playing, 2000);
        assert!(!a.differs_beyond_position(&b));

        let c = snapshot(TransportState::Paused, 1000);
        assert!(a.differs_beyond_position(&c));
    }

    #[test]
    fn test_display() {
        let text = snapshot(TransportState::Playing, 61_000).to_string();
        assert_eq!(text, "[Playing] Unknown Artist - a (1:01 / 3:00) #1/2");
    }

    #[test]
    fn test_subscribe_receives_latest_and_published() {
        let publisher = SessionPublisher::new(8);
        publisher.publish(snapshot(TransportState::Paused, 0));

        let (tx, rx) = unbounded();
        let id = publisher
            .subscribe(move |s| {
                let _ = tx.send(s.transport_state);
            })
            .unwrap();

        publisher.publish(snapshot(TransportState::Playing, 0));

        let timeout = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), TransportState::Paused);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), TransportState::Playing);
        assert_eq!(publisher.latest().transport_state, TransportState::Playing);

        assert!(publisher.unsubscribe(id));
        assert!(!publisher.unsubscribe(id));
        assert_eq!(publisher.observer_count(), 0);
    }

    #[test]
    fn test_slow_observer_does_not_block() {
        let publisher = SessionPublisher::new(1);
        let (release_tx, release_rx) = unbounded::<()>();
        let (seen_tx, seen_rx) = unbounded();
        let id = publisher
            .subscribe(move |s| {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                let _ = seen_tx.send(s.transport_state);
            })
            .unwrap();

        let started = std::time::Instant::now();
        for position in 0..100 {
            publisher.publish(snapshot(TransportState::Playing, position));
        }
        publisher.publish(snapshot(TransportState::Stopped, 0));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(publisher.dropped(id).unwrap() > 0);
        assert_eq!(publisher.latest().transport_state, TransportState::Stopped);

        drop(release_tx);
        publisher.close_all();
        let seen: Vec<_> = seen_rx.try_iter().collect();
        assert_eq!(seen.last(), Some(&TransportState::Stopped));
    }

    #[test]
    fn test_late_subscriber_sees_final_snapshot() {
        let publisher = SessionPublisher::new(1);
        let feeder = {
            let publisher = publisher.clone();
            std::thread::spawn(move || {
                for position in 0..500 {
                    publisher.publish(snapshot(TransportState::Playing, position));
                }
            })
        };

        let (seen_tx, seen_rx) = unbounded();
        publisher
            .subscribe(move |s| {
                let _ = seen_tx.send(s.position);
            })
            .unwrap();
        feeder.join().unwrap();
        publisher.close_all();

        let seen: Vec<_> = seen_rx.try_iter().collect();
        assert_eq!(seen.last(), Some(&Millis(499)));
    }

    #[test]
    fn test_panicking_observer_is_removed() {
        let publisher = SessionPublisher::new(4);
        let id = publisher.subscribe(|_| panic!("observer failure")).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while publisher.observer_count() > 0 && std::time::Instant::now() < deadline {
            publisher.publish(snapshot(TransportState::Playing, 0));
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(publisher.observer_count(), 0);
        assert_eq!(publisher.dropped(id), None);
    }
}
