//! Error types for Chroma.

use thiserror::Error;

use crate::types::TrackId;

/// Result type alias using Chroma's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Chroma.
#[derive(Error, Debug)]
pub enum Error {
    // Audio errors
    #[error("Failed to decode track {track_id}: {reason}")]
    Decode { track_id: TrackId, reason: String },

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    // Platform errors
    #[error("Audio focus request was denied")]
    FocusDenied,

    #[error("Playback engine is no longer running")]
    EngineClosed,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a decode error for a track.
    pub fn decode(track_id: &TrackId, reason: impl Into<String>) -> Self {
        Self::Decode {
            track_id: track_id.clone(),
            reason: reason.into(),
        }
    }

    /// Returns true if playback can continue with another track.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::UnsupportedFormat(_))
    }

    /// Returns true if this error came from the focus arbiter.
    pub const fn is_focus_denied(&self) -> bool {
        matches!(self, Self::FocusDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recoverable() {
        let id = TrackId::new("a");
        assert!(Error::decode(&id, "bad header").is_recoverable());
        assert!(Error::UnsupportedFormat("wma".into()).is_recoverable());
        assert!(!Error::FocusDenied.is_recoverable());
        assert!(!Error::EngineClosed.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::decode(&TrackId::new("song-1"), "truncated frame");
        assert_eq!(
            err.to_string(),
            "Failed to decode track song-1: truncated frame"
        );
        assert!(Error::FocusDenied.is_focus_denied());
    }
}
