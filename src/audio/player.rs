// Audio player implementation
// Decodes on a feeder thread and plays through the default cpal device

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::backend::{PlaybackBackend, PlaybackOutput};
use super::decoder::AudioDecoder;
use super::output::{AudioOutput, SampleWriter};
use super::resample::{map_channels, StreamResampler};
use crate::error::LoadError;
use crate::settings::PlaybackSettings;

/// Probed media, ready to be started
pub struct PreparedTrack {
    decoder: AudioDecoder,
    first_chunk: Vec<f32>,
}

impl PreparedTrack {
    pub fn sample_rate(&self) -> u32 {
        self.decoder.sample_rate()
    }

    pub fn channels(&self) -> usize {
        self.decoder.channels()
    }
}

pub struct CpalBackend {
    settings: PlaybackSettings,
}

impl CpalBackend {
    pub fn new(settings: PlaybackSettings) -> Self {
        Self { settings }
    }
}

impl PlaybackBackend for CpalBackend {
    type Source = PreparedTrack;
    type Output = CpalPlayback;

    fn probe(bytes: Vec<u8>, name: &str) -> Result<PreparedTrack, LoadError> {
        let mut decoder = AudioDecoder::from_bytes(bytes, name)?;

        // Decode up front so corrupt payloads are rejected before anything is released
        let first_chunk = loop {
            match decoder.decode_next()? {
                Some(samples) if !samples.is_empty() => break samples,
                Some(_) => continue,
                None => return Err(LoadError::Decode("stream contains no audio".to_string())),
            }
        };

        Ok(PreparedTrack { decoder, first_chunk })
    }

    fn start(&mut self, source: PreparedTrack, muted: bool) -> Result<CpalPlayback, LoadError> {
        let (output, writer) =
            AudioOutput::open(self.settings.ring_buffer_ms, self.settings.volume, muted)?;

        let resampler = StreamResampler::new(
            source.sample_rate(),
            output.sample_rate(),
            source.channels(),
            self.settings.resampler_chunk_frames,
        )?;

        let stop = Arc::new(AtomicBool::new(false));
        let feeder = Feeder {
            decoder: source.decoder,
            resampler,
            writer,
            out_channels: output.channels() as usize,
            stop: stop.clone(),
        };
        let first_chunk = source.first_chunk;

        let handle = std::thread::Builder::new()
            .name("decoycall-feeder".to_string())
            .spawn(move || feeder.run(first_chunk))
            .map_err(|e| LoadError::OutputDevice(format!("failed to spawn feeder thread: {}", e)))?;

        Ok(CpalPlayback {
            output,
            stop,
            feeder: Some(handle),
        })
    }
}

/// Pulls decoded audio into the device ring buffer
struct Feeder {
    decoder: AudioDecoder,
    resampler: StreamResampler,
    writer: SampleWriter,
    out_channels: usize,
    stop: Arc<AtomicBool>,
}

impl Feeder {
    fn run(mut self, first_chunk: Vec<f32>) {
        let in_channels = self.decoder.channels();
        if !self.forward(&first_chunk, in_channels) {
            return;
        }

        loop {
            match self.decoder.decode_next() {
                Ok(Some(samples)) => {
                    if !self.forward(&samples, in_channels) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "playback stopped early");
                    break;
                }
            }
        }

        match self.resampler.flush() {
            Ok(tail) => {
                let tail = map_channels(&tail, in_channels, self.out_channels);
                if !self.writer.write_until(&tail, &self.stop) {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to flush resampler"),
        }

        self.writer.drain(&self.stop);
        tracing::debug!("end of stream reached");
    }

    /// Returns false once playback has been stopped
    fn forward(&mut self, samples: &[f32], in_channels: usize) -> bool {
        let resampled = match self.resampler.push(samples) {
            Ok(resampled) => resampled,
            Err(e) => {
                tracing::warn!(error = %e, "resampling failed");
                return false;
            }
        };
        let mapped = map_channels(&resampled, in_channels, self.out_channels);
        self.writer.write_until(&mapped, &self.stop)
    }
}

/// A live cpal playback. Stops itself when dropped.
pub struct CpalPlayback {
    output: AudioOutput,
    stop: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

impl PlaybackOutput for CpalPlayback {
    fn set_muted(&mut self, muted: bool) {
        self.output.set_muted(muted);
    }

    fn position_seconds(&self) -> f64 {
        self.output.position_seconds()
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.output.pause();
        if let Some(handle) = self.feeder.take() {
            if handle.join().is_err() {
                tracing::error!("feeder thread panicked");
            }
        }
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
