//! Resolving command-line inputs into a track list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chroma_core::{Catalog, JsonCatalog, StaticCatalog, Track};
use tracing::{debug, warn};

/// File extensions picked up when scanning a directory.
const AUDIO_EXTENSIONS: &[&str] = &["flac", "mp3", "ogg", "oga", "wav", "m4a", "aac", "mp4"];

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn is_catalog_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Build the catalog for the given inputs.
///
/// A single `.json` input is read as a catalog file. Otherwise every input is
/// an audio file or a directory whose audio files are added in name order.
pub fn open_catalog(inputs: &[PathBuf]) -> Result<Box<dyn Catalog>> {
    match inputs {
        [] => bail!("No input given; pass audio files, a directory, or a catalog .json"),
        [single] if is_catalog_file(single) => Ok(Box::new(JsonCatalog::new(single.clone()))),
        _ => {
            let mut paths = Vec::new();
            for input in inputs {
                collect(input, &mut paths)?;
            }
            debug!("Collected {} audio files", paths.len());
            Ok(Box::new(StaticCatalog::from_paths(paths)))
        }
    }
}

fn collect(input: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
    if input.is_dir() {
        let mut found: Vec<PathBuf> = std::fs::read_dir(input)
            .with_context(|| format!("Failed to read directory {}", input.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_audio_file(path))
            .collect();
        found.sort();
        if found.is_empty() {
            warn!("No audio files in {}", input.display());
        }
        paths.extend(found);
    } else {
        // Missing files are kept; the engine reports and skips them.
        if !input.exists() {
            warn!("{} does not exist", input.display());
        }
        paths.push(input.to_path_buf());
    }
    Ok(())
}

/// Load the track list, failing if it is empty.
pub fn load_tracks(catalog: &dyn Catalog) -> Result<Vec<Arc<Track>>> {
    let tracks = catalog.list_tracks().context("Failed to load catalog")?;
    if tracks.is_empty() {
        bail!("Catalog is empty");
    }
    Ok(tracks)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;

    #[test]
    fn test_directory_scan_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.flac", "a.MP3", "cover.jpg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let catalog = open_catalog(&[dir.path().to_path_buf()]).unwrap();
        let tracks = load_tracks(catalog.as_ref()).unwrap();
        let titles: Vec<_> = tracks.iter().map(|t| t.display_title()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[test]
    fn test_json_input_uses_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        std::fs::write(
            &path,
            r#"[{ "id": "one", "source": "one.flac", "title": "First" }]"#,
        )
        .unwrap();

        let catalog = open_catalog(&[path]).unwrap();
        let tracks = load_tracks(catalog.as_ref()).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].display_title(), "First");
        assert_eq!(tracks[0].source, dir.path().join("one.flac"));
    }

    #[test]
    fn test_missing_files_are_kept() {
        let catalog = open_catalog(&[PathBuf::from("/nowhere/x.ogg")]).unwrap();
        assert_eq!(load_tracks(catalog.as_ref()).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_inputs_rejected() {
        assert!(open_catalog(&[]).is_err());

        let dir = tempfile::tempdir().unwrap();
        let catalog = open_catalog(&[dir.path().to_path_buf()]).unwrap();
        assert!(load_tracks(catalog.as_ref()).is_err());
    }
}
