//! Track catalog abstraction.
//!
//! Scanning the file system and extracting tags happens elsewhere; the
//! playback side only needs an ordered list of immutable descriptors.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::Track;

/// Source of track descriptors.
pub trait Catalog: Send + Sync {
    /// List all known tracks in display order.
    fn list_tracks(&self) -> Result<Vec<Arc<Track>>>;
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tracks: Vec<Arc<Track>>,
}

impl StaticCatalog {
    pub fn new(tracks: impl IntoIterator<Item = Track>) -> Self {
        Self {
            tracks: tracks.into_iter().map(Arc::new).collect(),
        }
    }

    /// Build a catalog from file paths, using each path as the track id.
    pub fn from_paths<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self::new(paths.into_iter().map(Track::from_path))
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl Catalog for StaticCatalog {
    fn list_tracks(&self) -> Result<Vec<Arc<Track>>> {
        Ok(self.tracks.clone())
    }
}

/// Catalog backed by a JSON file holding an array of tracks.
///
/// Relative `source` paths are resolved against the file's directory.
#[derive(Debug, Clone)]
pub struct JsonCatalog {
    path: PathBuf,
}

impl JsonCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, contents: &str) -> Result<Vec<Arc<Track>>> {
        let tracks: Vec<Track> = serde_json::from_str(contents)?;
        let base = self.path.parent().unwrap_or_else(|| Path::new(""));

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(tracks.len());
        for mut track in tracks {
            if !seen.insert(track.id.clone()) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate track id in catalog: {}",
                    track.id
                )));
            }
            if track.source.is_relative() {
                track.source = base.join(&track.source);
            }
            if !track.source.exists() {
                warn!("Catalog entry {} points at missing file {}", track.id, track.source.display());
            }
            out.push(Arc::new(track));
        }
        Ok(out)
    }
}

impl Catalog for JsonCatalog {
    fn list_tracks(&self) -> Result<Vec<Arc<Track>>> {
        let contents = std::fs::read_to_string(&self.path)?;
        let tracks = self.parse(&contents)?;
        info!("Loaded {} tracks from {}", tracks.len(), self.path.display());
        Ok(tracks)
    }
}
