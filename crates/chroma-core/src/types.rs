//! Core domain types for Chroma.

pub mod common;
pub mod queue;
pub mod track;

pub use common::Millis;
pub use queue::{Queue, QueueItem, Removed, RepeatMode, Step};
pub use track::{Track, TrackId};
