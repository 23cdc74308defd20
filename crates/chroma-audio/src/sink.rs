//! Output sink playing local audio files.
//!
//! All decoding happens on a `chroma-decoder` thread that also owns the cpal
//! stream. The sink itself only flips shared flags and forwards requests, so
//! every [`OutputSink`] call returns immediately.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chroma_core::{Error, Millis, Result};
use chroma_playback::{LoadRequest, OutputSink, SeekEpoch, SinkEvents};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{shared_ring_buffer, RingBuffer, SharedRingBuffer};
use crate::config::AudioConfig;
use crate::decode::AudioDecoder;
use crate::output::{remix, AudioOutput, OutputControl};
use crate::resample::Resampler;

/// How long the decoder waits for requests while a track is loaded.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

enum Request {
    Load(LoadRequest),
    Seek(Millis, SeekEpoch),
    Stop,
    Shutdown,
}

/// [`OutputSink`] decoding local files with symphonia and playing them
/// through the default cpal device.
pub struct LocalFileSink {
    config: AudioConfig,
    control: Arc<OutputControl>,
    ring: SharedRingBuffer,
    tx: Option<Sender<Request>>,
    worker: Option<JoinHandle<()>>,
}

impl LocalFileSink {
    /// Create a sink. The decoder thread and audio device are opened on the
    /// first load.
    pub fn new(config: AudioConfig) -> Result<Self> {
        config.validate()?;
        let ring = shared_ring_buffer(config.ring_buffer_size);
        Ok(Self {
            config,
            control: Arc::new(OutputControl::new(1.0)),
            ring,
            tx: None,
            worker: None,
        })
    }

    fn send(&mut self, request: Request) -> Result<()> {
        if self.tx.is_none() {
            let (tx, rx) = unbounded();
            let config = self.config.clone();
            let ring = Arc::clone(&self.ring);
            let control = Arc::clone(&self.control);
            let handle = std::thread::Builder::new()
                .name("chroma-decoder".to_string())
                .spawn(move || {
                    let worker = DecodeWorker {
                        config,
                        rx,
                        ring,
                        control,
                        output: None,
                        job: None,
                    };
                    worker.run();
                })
                .map_err(|e| Error::AudioOutput(format!("Failed to spawn decoder thread: {e}")))?;
            self.tx = Some(tx);
            self.worker = Some(handle);
        }

        self.tx
            .as_ref()
            .ok_or_else(|| Error::Internal("decoder thread missing".into()))?
            .send(request)
            .map_err(|_| Error::AudioOutput("Decoder thread has exited".into()))
    }
}

impl OutputSink for LocalFileSink {
    fn load(&mut self, request: LoadRequest) -> Result<()> {
        self.control.set_audible(false);
        debug!(
            "Requesting load of {} at {:?}",
            request.track.id, request.offset
        );
        self.send(Request::Load(request))
    }

    fn start(&mut self) -> Result<()> {
        if self.tx.is_none() {
            return Err(Error::AudioOutput("Nothing loaded".into()));
        }
        self.control.set_audible(true);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.control.set_audible(false);
        Ok(())
    }

    fn seek(&mut self, offset: Millis, epoch: SeekEpoch) -> Result<()> {
        self.send(Request::Seek(offset, epoch))
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.control.set_volume(volume);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.control.set_audible(false);
        if self.tx.is_some() {
            self.send(Request::Stop)?;
        }
        Ok(())
    }
}

impl Drop for LocalFileSink {
    fn drop(&mut self) {
        self.control.set_audible(false);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Request::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Decoder thread panicked");
            }
        }
    }
}

/// The track currently being decoded.
struct Job {
    events: SinkEvents,
    decoder: AudioDecoder,
    resampler: Resampler,
    channels_in: u16,
    channels_out: u16,
    sample_rate_out: u32,
    /// Track offset where `samples_written` started counting.
    base: Millis,
    samples_written: u64,
    /// Decoded samples that did not fit into the ring yet.
    pending: Vec<f32>,
    exhausted: bool,
    /// Stamped on every tick; follows the last seek request even if it failed.
    epoch: SeekEpoch,
    last_tick: Instant,
}

impl Job {
    /// Decode until the ring holds `target` samples, is full, or the track ends.
    fn fill(&mut self, ring: &RingBuffer, target: usize) -> Result<()> {
        loop {
            if !self.pending.is_empty() {
                let written = ring.write(&self.pending);
                self.samples_written += written as u64;
                self.pending.drain(..written);
                if !self.pending.is_empty() {
                    return Ok(());
                }
            }
            if self.exhausted || ring.available() >= target {
                return Ok(());
            }

            let decoded = match self.decoder.decode_next()? {
                Some(samples) => self.resampler.process(&samples)?,
                None => {
                    self.exhausted = true;
                    self.resampler.flush()?
                }
            };
            self.pending = remix(&decoded, self.channels_in, self.channels_out);
        }
    }

    /// Audible position, from the samples the output callback has consumed.
    fn position(&self, ring: &RingBuffer) -> Millis {
        let consumed = self.samples_written.saturating_sub(ring.available() as u64);
        let frames = consumed / u64::from(self.channels_out.max(1));
        let elapsed = frames * 1000 / u64::from(self.sample_rate_out.max(1));
        Millis(self.base.as_millis() + elapsed)
    }

    fn finished(&self, ring: &RingBuffer) -> bool {
        self.exhausted && self.pending.is_empty() && ring.is_empty()
    }
}

struct DecodeWorker {
    config: AudioConfig,
    rx: Receiver<Request>,
    ring: SharedRingBuffer,
    control: Arc<OutputControl>,
    /// Opened on the first load; cpal streams are not `Send`.
    output: Option<AudioOutput>,
    job: Option<Job>,
}

impl DecodeWorker {
    fn run(mut self) {
        debug!("Decoder thread started");
        loop {
            let request = if self.job.is_some() {
                match self.rx.recv_timeout(POLL_INTERVAL) {
                    Ok(request) => Some(request),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match self.rx.recv() {
                    Ok(request) => Some(request),
                    Err(_) => break,
                }
            };

            match request {
                Some(Request::Shutdown) => break,
                Some(Request::Load(request)) => self.load(request),
                Some(Request::Seek(offset, epoch)) => self.seek(offset, epoch),
                Some(Request::Stop) => {
                    self.job = None;
                    self.ring.clear();
                }
                None => {}
            }

            self.pump();
        }
        debug!("Decoder thread stopped");
    }

    fn load(&mut self, request: LoadRequest) {
        self.job = None;
        self.ring.clear();

        let events = request.events.clone();
        match self.prepare(request) {
            Ok(job) => {
                let duration = job.decoder.duration();
                info!("Loaded {} ({duration:?})", job.events.generation());
                self.job = Some(job);
                events.ready(duration);
            }
            Err(e) => {
                warn!("Load failed: {e}");
                self.ring.clear();
                events.failed(e.to_string());
            }
        }
    }

    fn prepare(&mut self, request: LoadRequest) -> Result<Job> {
        let mut decoder = AudioDecoder::open(&request.track)?;
        let (sample_rate_out, channels_out) = self.ensure_output()?;
        let resampler = Resampler::new(
            decoder.sample_rate(),
            sample_rate_out,
            usize::from(decoder.channels()),
        )?;
        if request.offset > Millis::ZERO {
            decoder.seek(request.offset)?;
        }

        let mut job = Job {
            events: request.events,
            channels_in: decoder.channels(),
            decoder,
            resampler,
            channels_out,
            sample_rate_out,
            base: request.offset,
            samples_written: 0,
            pending: Vec::new(),
            exhausted: false,
            epoch: SeekEpoch::default(),
            last_tick: Instant::now(),
        };
        job.fill(&self.ring, self.config.prefill_samples)?;
        Ok(job)
    }

    fn ensure_output(&mut self) -> Result<(u32, u16)> {
        if self.output.is_none() {
            let output = AudioOutput::open(Arc::clone(&self.ring), Arc::clone(&self.control))?;
            self.output = Some(output);
        }
        self.output
            .as_ref()
            .map(|output| (output.sample_rate(), output.channels()))
            .ok_or_else(|| Error::AudioOutput("Output unavailable".into()))
    }

    fn seek(&mut self, offset: Millis, epoch: SeekEpoch) {
        let Some(job) = self.job.as_mut() else {
            debug!("Ignoring seek with nothing loaded");
            return;
        };
        job.epoch = epoch;
        if let Err(e) = job.decoder.seek(offset) {
            warn!("Seek to {offset:?} failed, staying at {:?}: {e}", job.position(&self.ring));
            return;
        }
        self.ring.clear();
        job.resampler.reset();
        job.pending.clear();
        job.base = offset;
        job.samples_written = 0;
        job.exhausted = false;
        trace!("Decoder seeked to {offset:?}");
    }

    fn pump(&mut self) {
        let Some(job) = self.job.as_mut() else {
            return;
        };

        if let Err(e) = job.fill(&self.ring, self.ring.capacity()) {
            warn!("Decoding stopped: {e}");
            job.events.failed(e.to_string());
            self.job = None;
            self.ring.clear();
            return;
        }

        if !self.control.is_audible() {
            return;
        }

        if job.finished(&self.ring) {
            debug!("Track {} finished", job.events.generation());
            job.events.ended();
            self.job = None;
            return;
        }

        if job.last_tick.elapsed() >= self.config.tick_interval() {
            job.events.position(job.position(&self.ring), job.epoch);
            job.last_tick = Instant::now();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use chroma_core::Track;
    use chroma_playback::{Generation, Message, SinkEvent};

    fn request(track: Track) -> (LoadRequest, Receiver<Message>) {
        let (tx, rx) = unbounded();
        let generation = Generation::default().next();
        let request = LoadRequest {
            generation,
            track: Arc::new(track),
            offset: Millis::ZERO,
            events: SinkEvents::new(generation, tx),
        };
        (request, rx)
    }

    fn next_event(rx: &Receiver<Message>) -> (Generation, SinkEvent) {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Message::Sink { generation, event } => (generation, event),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_reports_decode_error() {
        let mut sink = LocalFileSink::new(AudioConfig::default()).unwrap();
        let (request, rx) = request(Track::new("lost", "/no/such/file.ogg"));
        sink.load(request).unwrap();

        let (generation, event) = next_event(&rx);
        assert_eq!(generation.value(), 1);
        assert!(matches!(event, SinkEvent::DecodeError(reason) if reason.contains("lost")));
    }

    #[test]
    fn test_unsupported_file_reports_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.flac");
        std::fs::write(&path, b"not a flac stream").unwrap();

        let mut sink = LocalFileSink::new(AudioConfig::default()).unwrap();
        let (request, rx) = request(Track::from_path(&path));
        sink.load(request).unwrap();

        let (_, event) = next_event(&rx);
        assert!(matches!(event, SinkEvent::DecodeError(_)));
        sink.stop().unwrap();
    }

    #[test]
    fn test_start_without_load_fails() {
        let mut sink = LocalFileSink::new(AudioConfig::default()).unwrap();
        assert!(sink.start().is_err());
        sink.pause().unwrap();
        sink.set_volume(0.5).unwrap();
        sink.stop().unwrap();
    }

    #[test]
    fn test_seek_without_load_is_ignored() {
        let mut sink = LocalFileSink::new(AudioConfig::default()).unwrap();
        sink.seek(Millis(1000), SeekEpoch::default().next()).unwrap();

        let (request, rx) = request(Track::new("lost", "/no/such/file.ogg"));
        sink.load(request).unwrap();
        let (_, event) = next_event(&rx);
        assert!(matches!(event, SinkEvent::DecodeError(_)));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = AudioConfig {
            tick_interval_ms: 0,
            ..AudioConfig::default()
        };
        assert!(matches!(LocalFileSink::new(config), Err(Error::Config(_))));
    }
}
