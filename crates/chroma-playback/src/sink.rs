//! Decoder/output sink abstraction.
//!
//! The sink is the only component that touches audio. It is owned
//! exclusively by the playback machine and every call returns quickly:
//! `load` only *requests* a load, and the outcome arrives later through the
//! [`SinkEvents`] handle carried by the request.

use std::fmt;
use std::sync::Arc;

use chroma_core::{Millis, Result, Track};
use crossbeam_channel::Sender;

use crate::message::{Generation, Message};

/// Tag identifying the latest seek within one load.
///
/// Every load starts at the default epoch. The machine hands a fresh epoch to
/// each [`OutputSink::seek`], and the sink stamps its position ticks with the
/// epoch of the last seek it has applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SeekEpoch(u64);

impl SeekEpoch {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SeekEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seek#{}", self.0)
    }
}

/// Events a sink reports back to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// The requested track is decoded far enough to start.
    Ready { duration: Option<Millis> },
    /// Current audible position, as of the seek `epoch`.
    PositionTick { position: Millis, epoch: SeekEpoch },
    /// The track played to the end.
    TrackEnded,
    /// The track cannot be decoded.
    DecodeError(String),
}

/// Handle a sink uses to report events for one load.
///
/// Every event is tagged with the generation of the load that created the
/// handle, so the sink never has to know whether it has been superseded.
#[derive(Debug, Clone)]
pub struct SinkEvents {
    generation: Generation,
    tx: Sender<Message>,
}

impl SinkEvents {
    pub const fn new(generation: Generation, tx: Sender<Message>) -> Self {
        Self { generation, tx }
    }

    /// Generation these events belong to.
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Send an event. Returns `false` once the engine has shut down.
    pub fn send(&self, event: SinkEvent) -> bool {
        self.tx
            .send(Message::Sink {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn ready(&self, duration: Option<Millis>) -> bool {
        self.send(SinkEvent::Ready { duration })
    }

    pub fn position(&self, position: Millis, epoch: SeekEpoch) -> bool {
        self.send(SinkEvent::PositionTick { position, epoch })
    }

    pub fn ended(&self) -> bool {
        self.send(SinkEvent::TrackEnded)
    }

    pub fn failed(&self, reason: impl Into<String>) -> bool {
        self.send(SinkEvent::DecodeError(reason.into()))
    }
}

/// A request to load a track into the sink.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Generation of this load.
    pub generation: Generation,
    /// Track to decode.
    pub track: Arc<Track>,
    /// Where to start.
    pub offset: Millis,
    /// Where to report progress.
    pub events: SinkEvents,
}

/// Decoder plus audio output, driven by the playback machine.
///
/// A failed `load` is treated like a [`SinkEvent::DecodeError`] for the
/// requested track. `load` replaces whatever was loaded before.
pub trait OutputSink: Send {
    /// Begin loading a track. Must not block on decoding.
    fn load(&mut self, request: LoadRequest) -> Result<()>;

    /// Start or resume audible output.
    fn start(&mut self) -> Result<()>;

    /// Pause audible output, keeping the track loaded.
    fn pause(&mut self) -> Result<()>;

    /// Seek within the loaded track. Ticks sent after the seek is applied
    /// carry `epoch`, whether or not the decoder managed to move.
    fn seek(&mut self, offset: Millis, epoch: SeekEpoch) -> Result<()>;

    /// Set output volume (0.0 to 1.0).
    fn set_volume(&mut self, volume: f32) -> Result<()>;

    /// Stop output and release the loaded track.
    fn stop(&mut self) -> Result<()>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn load(&mut self, request: LoadRequest) -> Result<()> {
        (**self).load(request)
    }

    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn pause(&mut self) -> Result<()> {
        (**self).pause()
    }

    fn seek(&mut self, offset: Millis, epoch: SeekEpoch) -> Result<()> {
        (**self).seek(offset, epoch)
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        (**self).set_volume(volume)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_events_carry_generation() {
        let (tx, rx) = unbounded();
        let events = SinkEvents::new(Generation::default().next(), tx);

        assert!(events.ready(Some(Millis(1000))));
        assert!(events.position(Millis(10), SeekEpoch::default().next()));

        match rx.try_recv().unwrap() {
            Message::Sink { generation, event } => {
                assert_eq!(generation.value(), 1);
                assert_eq!(event, SinkEvent::Ready { duration: Some(Millis(1000)) });
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            Message::Sink {
                event: SinkEvent::PositionTick { position: Millis(10), epoch },
                ..
            } if epoch == SeekEpoch::default().next()
        ));
    }

    #[test]
    fn test_send_after_shutdown() {
        let (tx, rx) = unbounded();
        let events = SinkEvents::new(Generation::default(), tx);
        drop(rx);
        assert!(!events.ended());
    }
}
