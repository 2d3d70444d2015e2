//! Frame sampling gate: run detection on every `interval`-th frame only.

use crate::error::{Result, VigilError};

/// Default number of frames between detector invocations.
pub const DEFAULT_INTERVAL: u32 = 3;

/// `true` iff `frame_index` is a multiple of `interval`.
///
/// Frame 0 is always sampled. An `interval` of 0 is treated as 1 so a
/// misconfigured caller degrades to "check every frame" instead of panicking;
/// use [`FrameSampler::new`] to reject it up front.
pub fn should_sample(frame_index: u64, interval: u32) -> bool {
    frame_index % u64::from(interval.max(1)) == 0
}

/// Validated sampling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampler {
    interval: u32,
}

impl FrameSampler {
    /// # Errors
    /// `VigilError::InvalidConfig` when `interval` is 0.
    pub fn new(interval: u32) -> Result<Self> {
        if interval == 0 {
            return Err(VigilError::InvalidConfig(
                "sampling interval must be at least 1".into(),
            ));
        }
        Ok(Self { interval })
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn should_sample(&self, frame_index: u64) -> bool {
        should_sample(frame_index, self.interval)
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_three_samples_every_third_frame() {
        let sampled: Vec<u64> = (0..10).filter(|&i| should_sample(i, 3)).collect();
        assert_eq!(sampled, vec![0, 3, 6, 9]);
    }

    #[test]
    fn interval_one_samples_everything() {
        assert!((0..50).all(|i| should_sample(i, 1)));
    }

    #[test]
    fn zero_interval_is_rejected_by_sampler() {
        assert!(FrameSampler::new(0).is_err());
        assert!(should_sample(7, 0));
    }

    #[test]
    fn large_frame_indices_do_not_overflow() {
        let sampler = FrameSampler::new(u32::MAX).unwrap();
        assert!(sampler.should_sample(0));
        assert!(sampler.should_sample(u64::from(u32::MAX) * 2));
        assert!(!sampler.should_sample(u64::MAX - 1));
    }
}
