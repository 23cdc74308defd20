//! Track descriptor as produced by the catalog.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::Millis;

/// Stable, unique track identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A single locally stored track.
///
/// Tracks are immutable once created. The catalog hands them out as
/// `Arc<Track>` and the queue only holds references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    /// Stable identifier.
    pub id: TrackId,
    /// Location of the audio file.
    pub source: PathBuf,
    /// Track duration, unknown until first decode.
    #[serde(default)]
    pub duration: Option<Millis>,
    /// Title tag.
    #[serde(default)]
    pub title: Option<String>,
    /// Artist tag.
    #[serde(default)]
    pub artist: Option<String>,
    /// Album tag.
    #[serde(default)]
    pub album: Option<String>,
}

impl Track {
    pub fn new(id: impl Into<TrackId>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            duration: None,
            title: None,
            artist: None,
            album: None,
        }
    }

    /// Build a track whose id is its path.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self::new(TrackId::new(path.to_string_lossy()), path)
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Millis) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    #[must_use]
    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    /// Title for display, falling back to the file name.
    pub fn display_title(&self) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            return title.to_string();
        }
        self.source.file_stem().map_or_else(
            || self.source.to_string_lossy().into_owned(),
            |stem| stem.to_string_lossy().into_owned(),
        )
    }

    /// Artist for display.
    pub fn display_artist(&self) -> &str {
        self.artist
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or("Unknown Artist")
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
