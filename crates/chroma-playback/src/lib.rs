//! # chroma-playback
//!
//! Playback engine for Chroma.
//!
//! - One worker thread owns the [`PlaybackMachine`]; every command, sink
//!   event and focus change reaches it as a [`Message`] on a single channel
//! - Sink completions are tagged with a [`Generation`] so late results from a
//!   cancelled load are dropped
//! - Observers receive immutable [`SessionSnapshot`]s without being able to
//!   stall playback

pub mod config;
pub mod engine;
pub mod focus;
pub mod machine;
pub mod message;
pub mod session;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use engine::{AudioEngine, EngineHandle};
pub use focus::{FocusArbiter, FocusChange, FocusGrant, FocusRequest, FocusState, UnmanagedFocus};
pub use machine::PlaybackMachine;
pub use message::{Command, DeviceEvent, Generation, Message};
pub use session::{
    Actions, Notice, ObserverId, PauseReason, SessionPublisher, SessionSnapshot, TransportState,
};
pub use sink::{LoadRequest, OutputSink, SeekEpoch, SinkEvent, SinkEvents};
