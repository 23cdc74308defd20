//! # chroma-audio
//!
//! Local file playback for Chroma.
//!
//! Features:
//! - symphonia decoding of local files
//! - rubato resampling to the device rate
//! - Lock-free ring buffer between the decoder thread and the cpal callback

pub mod buffer;
pub mod config;
pub mod decode;
pub mod output;
pub mod resample;
pub mod sink;

pub use config::AudioConfig;
pub use decode::AudioDecoder;
pub use output::{default_device_name, AudioOutput, OutputControl};
pub use sink::LocalFileSink;
