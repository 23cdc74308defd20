//! Sample-rate conversion using rubato.

use chroma_core::{Error, Result};
use rubato::{FftFixedIn, Resampler as _};
use tracing::debug;

/// Frames per resampler chunk.
const CHUNK_FRAMES: usize = 1024;

/// Converts interleaved samples from the file rate to the device rate.
///
/// Input is buffered until a whole chunk is available, so `process` may
/// return fewer frames than it was given. Call [`flush`](Self::flush) at end
/// of stream to drain the remainder.
pub struct Resampler {
    /// `None` when the rates already match.
    inner: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    pending: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidArgument("resampler needs at least one channel".into()));
        }

        let inner = if input_rate == output_rate {
            None
        } else {
            debug!("Resampling {input_rate} Hz -> {output_rate} Hz, {channels} channels");
            Some(
                FftFixedIn::new(
                    input_rate as usize,
                    output_rate as usize,
                    CHUNK_FRAMES,
                    2,
                    channels,
                )
                .map_err(|e| Error::AudioOutput(format!("Failed to create resampler: {e}")))?,
            )
        };

        Ok(Self {
            inner,
            input_rate,
            output_rate,
            channels,
            pending: vec![Vec::new(); channels],
        })
    }

    pub const fn needs_resampling(&self) -> bool {
        self.inner.is_some()
    }

    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Resample interleaved input, returning whatever whole chunks are ready.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };

        for frame in input.chunks_exact(self.channels) {
            for (channel, sample) in self.pending.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        let mut output = Vec::new();
        while self.pending[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..CHUNK_FRAMES).collect())
                .collect();
            let resampled = inner
                .process(&chunk, None)
                .map_err(|e| Error::AudioOutput(format!("Resample failed: {e}")))?;
            interleave_into(&resampled, usize::MAX, &mut output);
        }
        Ok(output)
    }

    /// Drain buffered input at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };

        let remaining = self.pending[0].len();
        if remaining == 0 {
            return Ok(Vec::new());
        }

        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|channel| {
                let mut data = std::mem::take(channel);
                data.resize(CHUNK_FRAMES, 0.0);
                data
            })
            .collect();
        let resampled = inner
            .process(&chunk, None)
            .map_err(|e| Error::AudioOutput(format!("Resample failed: {e}")))?;

        // Drop the frames produced from padding.
        let frames = (remaining as f64 * f64::from(self.output_rate) / f64::from(self.input_rate))
            .ceil() as usize;
        let mut output = Vec::new();
        interleave_into(&resampled, frames, &mut output);
        Ok(output)
    }

    /// Forget buffered input, e.g. after a seek.
    pub fn reset(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
        self.pending.iter_mut().for_each(Vec::clear);
    }
}

fn interleave_into(channels: &[Vec<f32>], max_frames: usize, output: &mut Vec<f32>) {
    let Some(first) = channels.first() else {
        return;
    };
    let frames = first.len().min(max_frames);
    output.reserve(frames * channels.len());
    for frame in 0..frames {
        for channel in channels {
            output.push(channel[frame]);
        }
    }
}
