//! Messages funnelled into the playback worker.

use std::fmt;
use std::sync::Arc;

use chroma_core::{Millis, RepeatMode, Track};

use crate::focus::FocusChange;
use crate::sink::SinkEvent;

/// Tag identifying one `load` of the output sink.
///
/// Incremented on every load and every stop; sink events carrying an older
/// generation are stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Commands issued by the user or UI.
#[derive(Debug, Clone)]
pub enum Command {
    /// Replace the queue and optionally start playing.
    SetQueue {
        tracks: Vec<Arc<Track>>,
        start_index: usize,
        autoplay: bool,
    },
    /// Start or resume playback.
    Play,
    /// Pause playback.
    Pause,
    /// Media-button style play/pause.
    TogglePlayPause,
    /// Stop playback and release the output.
    Stop,
    /// Seek within the current track.
    Seek(Millis),
    /// Skip to the next queue entry.
    Next,
    /// Go back (or restart the current track).
    Previous,
    /// Jump to a natural queue index.
    MoveTo(usize),
    /// Insert a track at a natural queue index.
    Insert { track: Arc<Track>, index: usize },
    /// Remove the entry at a natural queue index.
    RemoveAt(usize),
    /// Move an entry to another natural index.
    Reorder { from: usize, to: usize },
    /// Toggle shuffle.
    ToggleShuffle,
    /// Set the repeat mode.
    SetRepeatMode(RepeatMode),
    /// Advance to the next repeat mode.
    CycleRepeat,
    /// End the session: stop, release, and clear the queue.
    Release,
}

/// Hardware route events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Headphones unplugged or a Bluetooth sink went away.
    OutputDisconnected,
}

/// Everything the playback worker reacts to.
#[derive(Debug, Clone)]
pub enum Message {
    Command(Command),
    Sink {
        generation: Generation,
        event: SinkEvent,
    },
    Focus(FocusChange),
    Device(DeviceEvent),
    /// Release everything and stop the worker.
    Shutdown,
}

impl From<Command> for Message {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<FocusChange> for Message {
    fn from(change: FocusChange) -> Self {
        Self::Focus(change)
    }
}

impl From<DeviceEvent> for Message {
    fn from(event: DeviceEvent) -> Self {
        Self::Device(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_ordering() {
        let first = Generation::default();
        let second = first.next();
        assert!(second > first);
        assert_eq!(second.value(), 1);
        assert_eq!(second.to_string(), "#1");
    }
}
