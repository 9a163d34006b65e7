// Sample rate and channel layout conversion between decoder and device
use rubato::{FftFixedIn, Resampler};

use crate::error::LoadError;

/// Streaming resampler over interleaved samples.
/// Passes samples through untouched when the rates already match.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    channels: usize,
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self, LoadError> {
        let channels = channels.max(1);
        let inner = if from_rate == to_rate {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                chunk_frames,
                2,
                channels,
            )
            .map_err(|e| LoadError::Resample(e.to_string()))?;
            Some(resampler)
        };

        Ok(Self {
            inner,
            channels,
            pending: vec![Vec::new(); channels],
        })
    }

    /// Feed interleaved input, get whatever interleaved output is ready
    pub fn push(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, LoadError> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(interleaved.to_vec());
        };

        for frame in interleaved.chunks(self.channels) {
            for (ch, pending) in self.pending.iter_mut().enumerate() {
                pending.push(frame.get(ch).copied().unwrap_or(0.0));
            }
        }

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|p| p.drain(..needed).collect())
                .collect();
            let resampled = resampler
                .process(chunk.as_slice(), None)
                .map_err(|e| LoadError::Resample(e.to_string()))?;
            interleave_into(&resampled, &mut out);
        }
        Ok(out)
    }

    /// Resample the tail left over at end of stream
    pub fn flush(&mut self) -> Result<Vec<f32>, LoadError> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        if self.pending[0].is_empty() {
            return Ok(Vec::new());
        }

        let resampled = resampler
            .process_partial(Some(self.pending.as_slice()), None)
            .map_err(|e| LoadError::Resample(e.to_string()))?;
        for pending in &mut self.pending {
            pending.clear();
        }

        let mut out = Vec::new();
        interleave_into(&resampled, &mut out);
        Ok(out)
    }
}

fn interleave_into(planes: &[Vec<f32>], out: &mut Vec<f32>) {
    let frames = planes.first().map(|p| p.len()).unwrap_or(0);
    out.reserve(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            out.push(plane[frame]);
        }
    }
}

/// Map interleaved samples from `from` channels to `to` channels.
///
/// Mono is copied to every output channel, surplus input channels are dropped
/// and missing ones repeat the last input channel.
pub fn map_channels(input: &[f32], from: usize, to: usize) -> Vec<f32> {
    let from = from.max(1);
    let to = to.max(1);
    if from == to {
        return input.to_vec();
    }

    let mut out = Vec::with_capacity(input.len() / from * to);
    for frame in input.chunks_exact(from) {
        for ch in 0..to {
            out.push(frame[ch.min(from - 1)]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_to_stereo_duplicates() {
        assert_eq!(map_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_surround_to_stereo_keeps_front_pair() {
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(map_channels(&input, 6, 2), vec![1.0, 2.0]);
    }

    #[test]
    fn test_stereo_to_quad_repeats_last_channel() {
        assert_eq!(map_channels(&[0.5, -0.5], 2, 4), vec![0.5, -0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_matching_rate_passes_through() {
        let mut resampler = StreamResampler::new(48000, 48000, 2, 1024).unwrap();
        let input = vec![0.25f32; 64];
        assert_eq!(resampler.push(&input).unwrap(), input);
        assert!(resampler.flush().unwrap().is_empty());
    }

    #[test]
    fn test_upsampling_produces_more_frames() {
        let mut resampler = StreamResampler::new(24000, 48000, 1, 256).unwrap();
        let input = vec![0.0f32; 24000];
        let mut total = resampler.push(&input).unwrap().len();
        total += resampler.flush().unwrap().len();
        // Roughly doubled; the FFT resampler adds some delay padding
        assert!(total > 40000, "got {} frames", total);
    }
}
