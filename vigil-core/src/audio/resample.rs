//! Sample-rate conversion for whole clips using a rubato `FastFixedIn` resampler.
//!
//! Alarm assets and synthesized speech arrive at whatever rate their producer
//! chose (22.05 kHz TTS voices, 44.1 kHz MP3-to-WAV conversions, ...). The
//! output device and the packaged alert payload both want one fixed rate, so
//! every clip passes through `RateConverter` once, off the real-time thread.
//!
//! When source rate == target rate the converter is a passthrough and no
//! rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{Result, VigilError};

/// Default block size handed to rubato per call.
pub const DEFAULT_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input blocks between calls.
    pending: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
    /// Total input samples seen, used to trim the zero-padded tail in `finish`.
    consumed: usize,
    produced: usize,
}

impl RateConverter {
    /// Create a converter from `source_rate` to `target_rate`.
    ///
    /// # Errors
    /// Returns `VigilError::InvalidConfig` for a zero rate, or
    /// `VigilError::AudioStream` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(VigilError::InvalidConfig(format!(
                "sample rates must be non-zero (source={source_rate}, target={target_rate})"
            )));
        }
        let ratio = target_rate as f64 / source_rate as f64;

        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio,
                consumed: 0,
                produced: 0,
            });
        }

        let resampler =
            FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
                .map_err(|e| VigilError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        debug!(source_rate, target_rate, chunk_size, max_out, "rate converter ready");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
            ratio,
            consumed: 0,
            produced: 0,
        })
    }

    /// Feed samples, returning whatever full blocks could be converted.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.consumed += samples.len();
        self.pending.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.pending.len() >= self.chunk_size {
            let block = &self.pending[..self.chunk_size];
            match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.pending.drain(..self.chunk_size);
        }

        self.produced += result.len();
        result
    }

    /// Flush the remaining partial block (zero padded) and trim the output so
    /// the total length matches `input_len * ratio`.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.resampler.is_none() {
            return Vec::new();
        }

        let expected_total = (self.consumed as f64 * self.ratio).round() as usize;
        let produced_before = self.produced;
        let mut tail = Vec::new();

        // Two padded blocks push the filter delay through as well.
        for _ in 0..2 {
            if produced_before + tail.len() >= expected_total {
                break;
            }
            let mut block = std::mem::take(&mut self.pending);
            let pad = self.chunk_size - block.len() % self.chunk_size;
            block.resize(block.len() + pad, 0.0);
            let consumed = self.consumed;
            tail.extend(self.process(&block));
            // Padding is not real input.
            self.consumed = consumed;
        }

        tail.truncate(expected_total.saturating_sub(produced_before));
        self.produced = produced_before + tail.len();
        tail
    }

    /// Returns `true` when source rate == target rate.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Convert a complete mono clip in one call.
pub fn convert_clip(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    let mut rc = RateConverter::new(source_rate, target_rate, DEFAULT_CHUNK)?;
    if rc.is_passthrough() {
        return Ok(samples.to_vec());
    }
    let mut out = rc.process(samples);
    out.extend(rc.finish());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(22_050, 22_050, 512).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..300).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert!(rc.finish().is_empty());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(RateConverter::new(0, 16_000, 512).is_err());
    }

    #[test]
    fn partial_block_is_held_back() {
        let mut rc = RateConverter::new(44_100, 22_050, 1024).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
    }

    #[test]
    fn whole_clip_has_expected_length() {
        let clip = vec![0.1f32; 22_050];
        let out = convert_clip(&clip, 22_050, 16_000).unwrap();
        let expected = 16_000usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 2,
            "len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn upsampling_short_clip_keeps_ratio() {
        let clip = vec![0.0f32; 300];
        let out = convert_clip(&clip, 16_000, 48_000).unwrap();
        assert!((out.len() as isize - 900).unsigned_abs() <= 2, "len={}", out.len());
    }
}
