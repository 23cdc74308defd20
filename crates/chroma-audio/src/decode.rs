//! Audio file decoding using symphonia.

use std::fs::File;

use chroma_core::{Error, Millis, Result, Track, TrackId};
use symphonia::core::{
    audio::{AudioBufferRef, AudioPlanes, Signal},
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    sample::Sample,
    units::Time,
};
use tracing::{debug, warn};

/// Decoder for one local audio file.
pub struct AudioDecoder {
    id: TrackId,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    stream_id: u32,
    sample_rate: u32,
    channels: u16,
    duration: Option<Millis>,
}

impl AudioDecoder {
    /// Open and probe the track's source file.
    #[allow(clippy::cast_precision_loss)]
    pub fn open(track: &Track) -> Result<Self> {
        let file = File::open(&track.source)
            .map_err(|e| Error::decode(&track.id, format!("{}: {e}", track.source.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(extension) = track.source.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::UnsupportedFormat(format!("{}: {e}", track.source.display())))?;
        let format = probed.format;

        let stream = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::decode(&track.id, "no audio stream"))?;

        let stream_id = stream.id;
        let params = &stream.codec_params;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::decode(&track.id, "unknown sample rate"))?;
        #[allow(clippy::cast_possible_truncation)]
        let channels = params.channels.map_or(2, |c| c.count() as u16);
        let duration = params.time_base.zip(params.n_frames).map(|(base, frames)| {
            let time = base.calc_time(frames);
            Millis::from_secs_f64(time.seconds as f64 + time.frac)
        });

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::UnsupportedFormat(format!("{}: {e}", track.source.display())))?;

        debug!(
            "Opened {}: {sample_rate} Hz, {channels} channels, duration {duration:?}",
            track.id
        );

        Ok(Self {
            id: track.id.clone(),
            format,
            decoder,
            stream_id,
            sample_rate,
            channels,
            duration,
        })
    }

    /// Get the sample rate.
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of channels.
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Get the total duration, if the container declares it.
    pub const fn duration(&self) -> Option<Millis> {
        self.duration
    }

    /// Decode the next packet into interleaved samples.
    ///
    /// Returns `None` at end of stream. Corrupt frames are skipped.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(Error::decode(&self.id, format!("read failed: {e}"))),
            };

            if packet.track_id() != self.stream_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => return Ok(Some(interleave(&decoded))),
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt frame in {}: {e}", self.id);
                }
                Err(e) => return Err(Error::decode(&self.id, format!("decode failed: {e}"))),
            }
        }
    }

    /// Seek to an offset from the start.
    pub fn seek(&mut self, offset: Millis) -> Result<()> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(offset.as_secs_f64()),
                    track_id: Some(self.stream_id),
                },
            )
            .map_err(|e| Error::decode(&self.id, format!("seek failed: {e}")))?;
        self.decoder.reset();
        Ok(())
    }
}

/// Convert a decoded buffer to interleaved f32 samples.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn interleave(buffer: &AudioBufferRef<'_>) -> Vec<f32> {
    match buffer {
        AudioBufferRef::F32(buf) => interleave_with(&buf.planes(), |s| s),
        AudioBufferRef::F64(buf) => interleave_with(&buf.planes(), |s| s as f32),
        AudioBufferRef::S32(buf) => interleave_with(&buf.planes(), |s| s as f32 / i32::MAX as f32),
        AudioBufferRef::S16(buf) => {
            interleave_with(&buf.planes(), |s| f32::from(s) / f32::from(i16::MAX))
        }
        AudioBufferRef::U8(buf) => interleave_with(&buf.planes(), |s| (f32::from(s) - 128.0) / 128.0),
        _ => Vec::new(),
    }
}

fn interleave_with<S: Sample>(planes: &AudioPlanes<'_, S>, convert: impl Fn(S) -> f32) -> Vec<f32> {
    let planes = planes.planes();
    let Some(first) = planes.first() else {
        return Vec::new();
    };

    let mut output = Vec::with_capacity(first.len() * planes.len());
    for frame in 0..first.len() {
        for plane in planes {
            output.push(convert(plane[frame]));
        }
    }
    output
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
pub(crate) mod tests {
    use super::*;
    use std::path::Path;

    /// Write a 16-bit PCM WAV file with a constant tone level.
    pub(crate) fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: u32) {
        let data_len = frames * u32::from(channels) * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
        bytes.extend_from_slice(&(channels * 2).to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for _ in 0..frames * u32::from(channels) {
            bytes.extend_from_slice(&8192i16.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_decodes_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8000, 2, 8000);

        let mut decoder = AudioDecoder::open(&Track::from_path(&path)).unwrap();
        assert_eq!(decoder.sample_rate(), 8000);
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.duration(), Some(Millis(1000)));

        let mut total = 0;
        while let Some(samples) = decoder.decode_next().unwrap() {
            assert!(samples.iter().all(|s| (s - 0.25).abs() < 0.01));
            total += samples.len();
        }
        assert_eq!(total, 16000);
    }

    #[test]
    fn test_seek_then_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8000, 1, 16000);

        let mut decoder = AudioDecoder::open(&Track::from_path(&path)).unwrap();
        decoder.seek(Millis(1500)).unwrap();

        let mut total = 0;
        while let Some(samples) = decoder.decode_next().unwrap() {
            total += samples.len();
        }
        assert!(total > 0 && total < 8000);
    }

    #[test]
    fn test_missing_file_is_decode_error() {
        let track = Track::new("gone", "/definitely/not/here.flac");
        let err = AudioDecoder::open(&track).err().unwrap();
        assert!(matches!(err, Error::Decode { ref track_id, .. } if track_id.as_str() == "gone"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();

        let err = AudioDecoder::open(&Track::from_path(&path)).err().unwrap();
        assert!(err.is_recoverable());
    }
}
