//! `DetectionAdapter`: typed boundary between the frame path and a detector.
//!
//! Capability failures never leave this module: they are logged, counted and
//! turned into an empty result, so the caller sees "nothing detected".

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::detect::{AcceptancePolicy, Detection, DetectorHandle, ImageInput, RawDetection};
use crate::error::Result;

/// Shared adapter counters.
#[derive(Default)]
pub struct AdapterDiagnostics {
    pub calls: AtomicUsize,
    pub failures: AtomicUsize,
    pub raw_seen: AtomicUsize,
    pub accepted: AtomicUsize,
    pub rejected: AtomicUsize,
    pub last_latency_ms: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterDiagnosticsSnapshot {
    pub calls: usize,
    pub failures: usize,
    pub raw_seen: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub last_latency_ms: usize,
}

impl AdapterDiagnostics {
    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.raw_seen.store(0, Ordering::Relaxed);
        self.accepted.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.last_latency_ms.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AdapterDiagnosticsSnapshot {
        AdapterDiagnosticsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            raw_seen: self.raw_seen.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            last_latency_ms: self.last_latency_ms.load(Ordering::Relaxed),
        }
    }
}

pub struct DetectionAdapter {
    detector: DetectorHandle,
    policy: RwLock<AcceptancePolicy>,
    diagnostics: Arc<AdapterDiagnostics>,
}

impl DetectionAdapter {
    pub fn new(detector: DetectorHandle, policy: AcceptancePolicy) -> Self {
        Self {
            detector,
            policy: RwLock::new(policy),
            diagnostics: Arc::new(AdapterDiagnostics::default()),
        }
    }

    /// Forward to the detector's one-time warm-up.
    pub fn warm_up(&self) -> Result<()> {
        self.detector.0.lock().warm_up()
    }

    /// Run the detector and keep only accepted detections, in detector order.
    ///
    /// Never fails: detector errors yield an empty `Vec` and a `warn!`.
    pub fn classify(&self, image: &ImageInput, confidence_floor: f32) -> Vec<Detection> {
        self.diagnostics.calls.fetch_add(1, Ordering::Relaxed);
        let t0 = Instant::now();
        let result = self.detector.0.lock().detect(image, confidence_floor);
        self.diagnostics
            .last_latency_ms
            .store(t0.elapsed().as_millis() as usize, Ordering::Relaxed);

        match result {
            Ok(raw) => self.accept(raw, confidence_floor),
            Err(e) => {
                self.diagnostics.failures.fetch_add(1, Ordering::Relaxed);
                warn!(image = %image.describe(), "detector failed: {e}");
                Vec::new()
            }
        }
    }

    /// Normalize externally produced detections and apply the policy.
    ///
    /// Entries below `confidence_floor` are dropped even if the producer did
    /// not filter them.
    pub fn accept(&self, raw: Vec<RawDetection>, confidence_floor: f32) -> Vec<Detection> {
        self.diagnostics
            .raw_seen
            .fetch_add(raw.len(), Ordering::Relaxed);
        let policy = self.policy.read();
        let mut accepted = Vec::with_capacity(raw.len());
        let mut rejected = 0usize;
        for det in raw.into_iter().filter_map(RawDetection::normalize) {
            if det.score >= confidence_floor && policy.accepts(&det) {
                accepted.push(det);
            } else {
                rejected += 1;
            }
        }
        self.diagnostics
            .accepted
            .fetch_add(accepted.len(), Ordering::Relaxed);
        self.diagnostics
            .rejected
            .fetch_add(rejected, Ordering::Relaxed);
        if rejected > 0 {
            debug!(accepted = accepted.len(), rejected, "acceptance policy applied");
        }
        accepted
    }

    pub fn policy(&self) -> AcceptancePolicy {
        self.policy.read().clone()
    }

    pub fn set_policy(&self, policy: AcceptancePolicy) {
        *self.policy.write() = policy;
    }

    pub fn class_names(&self) -> Vec<String> {
        self.detector.0.lock().class_names()
    }

    pub fn diagnostics(&self) -> Arc<AdapterDiagnostics> {
        Arc::clone(&self.diagnostics)
    }
}

impl std::fmt::Debug for DetectionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionAdapter")
            .field("policy", &*self.policy.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, ObjectDetector, StubDetector};
    use crate::error::VigilError;
    use std::path::PathBuf;

    struct FailingDetector;

    impl ObjectDetector for FailingDetector {
        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }
        fn detect(&mut self, _image: &ImageInput, _t: f32) -> Result<Vec<RawDetection>> {
            Err(VigilError::Detection("model crashed".into()))
        }
    }

    fn image() -> ImageInput {
        ImageInput::Path(PathBuf::from("frame.jpg"))
    }

    fn raw(label: &str, score: f32) -> RawDetection {
        RawDetection::new(label, score, BoundingBox::default())
    }

    #[test]
    fn failure_becomes_empty_result() {
        let adapter = DetectionAdapter::new(
            DetectorHandle::new(FailingDetector),
            AcceptancePolicy::fire(),
        );
        assert!(adapter.classify(&image(), 0.15).is_empty());
        let snap = adapter.diagnostics().snapshot();
        assert_eq!(snap.calls, 1);
        assert_eq!(snap.failures, 1);
    }

    #[test]
    fn output_order_is_preserved() {
        let stub = StubDetector::scripted(vec![vec![
            raw("knife", 0.6),
            raw("person", 0.9),
            raw("gun", 0.5),
            raw("pistol", 0.4),
        ]]);
        let adapter = DetectionAdapter::new(DetectorHandle::new(stub), AcceptancePolicy::threat());
        let labels: Vec<String> = adapter
            .classify(&image(), 0.3)
            .into_iter()
            .map(|d| d.label)
            .collect();
        assert_eq!(labels, vec!["knife", "gun", "pistol"]);
    }

    #[test]
    fn accept_applies_floor_and_counts_rejections() {
        let adapter = DetectionAdapter::new(
            DetectorHandle::new(StubDetector::default()),
            AcceptancePolicy::fire(),
        );
        let out = adapter.accept(vec![raw("fire", 0.1), raw("smoke", 0.3), raw("cat", 0.4)], 0.15);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "smoke");
        let snap = adapter.diagnostics().snapshot();
        assert_eq!(snap.raw_seen, 3);
        assert_eq!(snap.rejected, 2);
        adapter.diagnostics().reset();
        assert_eq!(adapter.diagnostics().snapshot().raw_seen, 0);
    }

    #[test]
    fn policy_can_be_swapped_at_runtime() {
        let adapter = DetectionAdapter::new(
            DetectorHandle::new(StubDetector::default()),
            AcceptancePolicy::threat(),
        );
        assert!(adapter.accept(vec![raw("class_0", 0.9)], 0.3).is_empty());
        adapter.set_policy(AcceptancePolicy::accept_all());
        assert_eq!(adapter.accept(vec![raw("class_0", 0.9)], 0.3).len(), 1);
    }
}
