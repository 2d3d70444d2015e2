//! `StubDetector`: scripted backend that replays canned results.
//!
//! Lets the host app, the replay bench and the tests drive the full frame path
//! without model weights. Each `detect` call pops the next scripted response;
//! once the script is exhausted the `fallback` response is returned forever.

use std::collections::VecDeque;

use tracing::debug;

use crate::detect::{ImageInput, ObjectDetector, RawDetection};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct StubDetector {
    script: VecDeque<Vec<RawDetection>>,
    fallback: Vec<RawDetection>,
    calls: u64,
}

impl StubDetector {
    /// Replay `responses` in order, then report nothing.
    pub fn scripted(responses: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script: responses.into(),
            fallback: Vec::new(),
            calls: 0,
        }
    }

    /// Return the same detections on every call.
    pub fn fixed(response: Vec<RawDetection>) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: response,
            calls: 0,
        }
    }

    /// Queue another response behind the current script.
    pub fn push(&mut self, response: Vec<RawDetection>) {
        self.script.push_back(response);
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl ObjectDetector for StubDetector {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubDetector::warm_up: no-op");
        Ok(())
    }

    fn detect(&mut self, image: &ImageInput, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        let response = self
            .script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        debug!(
            image = %image.describe(),
            call = self.calls,
            raw = response.len(),
            "StubDetector::detect"
        );
        Ok(response
            .into_iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use std::path::PathBuf;

    #[test]
    fn script_then_fallback() {
        let mut stub = StubDetector::scripted(vec![vec![RawDetection::new(
            "fire",
            0.8,
            BoundingBox::default(),
        )]]);
        let img = ImageInput::Path(PathBuf::from("a.jpg"));
        assert_eq!(stub.detect(&img, 0.1).unwrap().len(), 1);
        assert!(stub.detect(&img, 0.1).unwrap().is_empty());
        assert_eq!(stub.calls(), 2);
    }

    #[test]
    fn threshold_is_applied() {
        let mut stub = StubDetector::fixed(vec![
            RawDetection::new("fire", 0.1, BoundingBox::default()),
            RawDetection::new("smoke", 0.5, BoundingBox::default()),
        ]);
        let img = ImageInput::Path(PathBuf::from("a.jpg"));
        let out = stub.detect(&img, 0.25).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "smoke");
    }
}
