//! Audio output using cpal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chroma_core::{Error, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use crate::buffer::SharedRingBuffer;

/// State shared between the sink and the output callback.
#[derive(Debug)]
pub struct OutputControl {
    audible: AtomicBool,
    volume: Mutex<f32>,
}

impl OutputControl {
    pub fn new(volume: f32) -> Self {
        Self {
            audible: AtomicBool::new(false),
            volume: Mutex::new(volume.clamp(0.0, 1.0)),
        }
    }

    pub fn set_audible(&self, audible: bool) {
        self.audible.store(audible, Ordering::Release);
    }

    pub fn is_audible(&self) -> bool {
        self.audible.load(Ordering::Acquire)
    }

    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }
}

/// An open output stream on the default device.
///
/// The stream is not `Send`; it lives on the thread that opened it.
pub struct AudioOutput {
    _stream: Stream,
    sample_rate: u32,
    channels: u16,
    device_name: String,
}

impl AudioOutput {
    /// Open the default output device.
    pub fn open(ring: SharedRingBuffer, control: Arc<OutputControl>) -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))?;
        Self::with_device(&device, ring, control)
    }

    pub fn with_device(
        device: &Device,
        ring: SharedRingBuffer,
        control: Arc<OutputControl>,
    ) -> Result<Self> {
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let supported = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get output config: {e}")))?;
        debug!("Supported output config: {supported:?}");

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(device, &config, ring, control)?,
            SampleFormat::I16 => Self::build_stream::<i16>(device, &config, ring, control)?,
            SampleFormat::U16 => Self::build_stream::<u16>(device, &config, ring, control)?,
            _ => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };
        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

        info!(
            "Audio output on {device_name}: {} Hz, {} channels",
            config.sample_rate.0, config.channels
        );

        Ok(Self {
            _stream: stream,
            sample_rate: config.sample_rate.0,
            channels: config.channels,
            device_name,
        })
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &Device,
        config: &StreamConfig,
        ring: SharedRingBuffer,
        control: Arc<OutputControl>,
    ) -> Result<Stream> {
        let mut scratch: Vec<f32> = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if !control.is_audible() {
                        data.fill(T::from_sample(0.0f32));
                        return;
                    }

                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0.0);
                    }
                    let read = ring.read(&mut scratch[..data.len()]);
                    let volume = control.volume();

                    for (i, sample) in data.iter_mut().enumerate() {
                        let value = if i < read {
                            let s = scratch[i] * volume;
                            // Soft-limit peaks instead of hard clipping.
                            if s.abs() > 0.9 {
                                s.tanh()
                            } else {
                                s
                            }
                        } else {
                            0.0
                        };
                        *sample = T::from_sample(value);
                    }

                    if read > 0 && read < data.len() {
                        trace!("Output underrun: needed {}, got {read}", data.len());
                    }
                },
                |err| error!("Audio stream error: {err}"),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }
}

/// Name of the default output device, if any.
pub fn default_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

/// Convert interleaved samples between channel counts.
///
/// Mono is duplicated to every output channel; anything going to mono is
/// averaged; otherwise channels are copied by position and extra output
/// channels are silent.
pub fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (usize::from(from.max(1)), usize::from(to.max(1)));
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut output = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if from == 1 {
            output.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            output.extend((0..to).map(|ch| frame.get(ch).copied().unwrap_or(0.0)));
        }
    }
    output
}
