//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use chroma_core::{Error, Millis, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tunables for the playback engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `previous` restarts the current track when the position is past this.
    pub previous_restart_threshold_ms: u64,
    /// Volume used while ducked (0.0 to 1.0).
    pub duck_volume: f32,
    /// Normal output volume (0.0 to 1.0).
    pub volume: f32,
    /// Minimum spacing between position-only snapshots.
    pub position_publish_interval_ms: u64,
    /// Snapshots buffered per observer before new ones are dropped.
    pub observer_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            previous_restart_threshold_ms: 3000,
            duck_volume: 0.2,
            volume: 1.0,
            position_publish_interval_ms: 500,
            observer_buffer: 32,
        }
    }
}

impl EngineConfig {
    pub const fn previous_restart_threshold(&self) -> Millis {
        Millis(self.previous_restart_threshold_ms)
    }

    pub const fn position_publish_interval(&self) -> Duration {
        Duration::from_millis(self.position_publish_interval_ms)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(Error::Config(format!(
                "volume must be within 0.0..=1.0, got {}",
                self.volume
            )));
        }
        if !(0.0..=1.0).contains(&self.duck_volume) {
            return Err(Error::Config(format!(
                "duck_volume must be within 0.0..=1.0, got {}",
                self.duck_volume
            )));
        }
        if self.observer_buffer == 0 {
            return Err(Error::Config("observer_buffer must be at least 1".into()));
        }
        Ok(())
    }

    /// Parse and validate a JSON document. Missing fields use defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading engine config from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.previous_restart_threshold(), Millis(3000));
        assert_eq!(config.position_publish_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "duck_volume": 0.5 }"#).unwrap();
        assert!((config.duck_volume - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.previous_restart_threshold_ms, 3000);
        assert_eq!(config.observer_buffer, 32);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = EngineConfig::from_json_str(r#"{ "volume": 1.5 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = EngineConfig::from_json_str(r#"{ "observer_buffer": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = EngineConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "previous_restart_threshold_ms": 5000 }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.previous_restart_threshold(), Millis(5000));

        let missing = EngineConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, Error::Io(_)));
    }
}
