//! Application configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chroma_audio::AudioConfig;
use chroma_playback::EngineConfig;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";

/// Everything read from `config.json`. Missing sections use defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Default location, e.g. `~/.config/chroma/config.json` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "chroma", "Chroma").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file is not an error; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => {
                    debug!("No config directory available, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !explicit && !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_json_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.audio.validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;

    #[test]
    fn test_sections_default_independently() {
        let config = AppConfig::from_json_str(
            r#"{ "engine": { "duck_volume": 0.5 }, "audio": { "tick_interval_ms": 100 } }"#,
        )
        .unwrap();
        assert!((config.engine.duck_volume - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.engine, EngineConfig { duck_volume: 0.5, ..EngineConfig::default() });
        assert_eq!(config.audio.tick_interval_ms, 100);
        assert_eq!(config.audio.prefill_samples, AudioConfig::default().prefill_samples);
    }

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(AppConfig::from_json_str("{}").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_json_str(r#"{ "audio": { "tick_interval_ms": 0 } }"#).is_err());
        assert!(AppConfig::from_json_str(r#"{ "engine": { "duck_volume": 3.0 } }"#).is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "engine": { "observer_buffer": 4 } }"#).unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.engine.observer_buffer, 4);
    }

    #[test]
    fn test_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.json"))).is_err());
    }
}
