// Audio output using cpal
// Handles cross-platform audio output with a ring buffer

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use ringbuf::{HeapRb, traits::{Consumer, Observer, Producer, Split}};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::LoadError;

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

/// State shared with the device callback
struct CallbackShared {
    // f32 bits, the callback must never block on a lock
    volume: AtomicU32,
    muted: AtomicBool,
    // Real samples handed to the device, silence padding excluded
    consumed: AtomicU64,
}

impl CallbackShared {
    fn new(volume: f32, muted: bool) -> Self {
        Self {
            volume: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            muted: AtomicBool::new(muted),
            consumed: AtomicU64::new(0),
        }
    }

    fn gain(&self) -> f32 {
        if self.muted.load(Ordering::Relaxed) {
            0.0
        } else {
            f32::from_bits(self.volume.load(Ordering::Relaxed))
        }
    }
}

/// Write side of the ring buffer, owned by the feeder thread
pub struct SampleWriter {
    producer: RingProducer,
}

impl SampleWriter {
    /// Write samples until all are queued or `stop` is raised.
    /// Returns false if it gave up because of `stop`.
    pub fn write_until(&mut self, samples: &[f32], stop: &AtomicBool) -> bool {
        let mut remaining = samples;

        while !remaining.is_empty() {
            if stop.load(Ordering::Acquire) {
                return false;
            }
            let written = self.producer.push_slice(remaining);
            if written > 0 {
                remaining = &remaining[written..];
            } else {
                // Buffer full, wait a bit
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        true
    }

    /// Block until the device has drained everything queued so far
    pub fn drain(&self, stop: &AtomicBool) {
        while !self.producer.is_empty() && !stop.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

pub struct AudioOutput {
    stream: Stream,
    shared: Arc<CallbackShared>,
    sample_rate: u32,
    channels: u16,
}

impl AudioOutput {
    /// Open the default output device.
    ///
    /// Returns the output together with the writer the feeder thread uses.
    pub fn open(ring_buffer_ms: u32, volume: f32, muted: bool) -> Result<(Self, SampleWriter), LoadError> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| LoadError::OutputDevice("no output device available".to_string()))?;

        let config = device
            .default_output_config()
            .map_err(|e| LoadError::OutputDevice(format!("failed to get default output config: {}", e)))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        let capacity = (sample_rate as usize * channels as usize * ring_buffer_ms as usize / 1000).max(1024);
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();

        let shared = Arc::new(CallbackShared::new(volume, muted));

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), consumer, shared.clone())?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), consumer, shared.clone())?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), consumer, shared.clone())?
            }
            format => {
                return Err(LoadError::OutputDevice(format!("unsupported sample format: {:?}", format)))
            }
        };

        stream
            .play()
            .map_err(|e| LoadError::OutputDevice(format!("failed to start stream: {}", e)))?;

        tracing::debug!(sample_rate, channels, capacity, "audio output opened");

        Ok((
            Self {
                stream,
                shared,
                sample_rate,
                channels,
            },
            SampleWriter { producer },
        ))
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut consumer: RingConsumer,
        shared: Arc<CallbackShared>,
    ) -> Result<Stream, LoadError> {
        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let gain = shared.gain();

                    let mut consumed = 0u64;
                    for sample in data.iter_mut() {
                        let value = match consumer.try_pop() {
                            Some(v) => {
                                consumed += 1;
                                v * gain
                            }
                            None => 0.0,
                        };
                        *sample = T::from_sample(value);
                    }
                    shared.consumed.fetch_add(consumed, Ordering::Relaxed);
                },
                move |err| {
                    tracing::error!(error = %err, "audio output error");
                },
                None,
            )
            .map_err(|e| LoadError::OutputDevice(format!("failed to build output stream: {}", e)))?;

        Ok(stream)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    /// Seconds of audio the device has actually consumed
    pub fn position_seconds(&self) -> f64 {
        let samples = self.shared.consumed.load(Ordering::Relaxed);
        samples as f64 / self.channels.max(1) as f64 / self.sample_rate.max(1) as f64
    }

    /// Stop pulling samples from the ring buffer
    pub fn pause(&self) {
        if let Err(e) = self.stream.pause() {
            tracing::warn!(error = %e, "failed to pause output stream");
        }
    }
}
