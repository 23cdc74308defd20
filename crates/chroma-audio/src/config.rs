//! Local playback configuration.

use std::time::Duration;

use chroma_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Settings for [`LocalFileSink`](crate::LocalFileSink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Ring buffer capacity in samples (about 2 seconds at 48kHz stereo).
    pub ring_buffer_size: usize,
    /// Samples decoded ahead before a load reports ready.
    pub prefill_samples: usize,
    /// Spacing of position ticks while audible.
    pub tick_interval_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 48000 * 2 * 2,
            prefill_samples: 16384,
            tick_interval_ms: 200,
        }
    }
}

impl AudioConfig {
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring_buffer_size < 4096 {
            return Err(Error::Config(format!(
                "ring_buffer_size must be at least 4096 samples, got {}",
                self.ring_buffer_size
            )));
        }
        if self.prefill_samples > self.ring_buffer_size {
            return Err(Error::Config(
                "prefill_samples cannot exceed ring_buffer_size".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be positive".into()));
        }
        Ok(())
    }
}
