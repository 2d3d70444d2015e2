//! Object detection abstraction.
//!
//! The `ObjectDetector` trait decouples the frame path from any specific
//! model (scripted stub, YOLO over ONNX Runtime, a remote service whose JSON
//! response is parsed by [`raw`]). Detectors keep session state, so `detect`
//! takes `&mut self` and all calls are serialised through `DetectorHandle`'s
//! `parking_lot::Mutex`.
//!
//! [`DetectionAdapter`] wraps a handle with an [`AcceptancePolicy`] and is the
//! only thing the rest of the crate talks to.

pub mod adapter;
pub mod policy;
pub mod raw;
pub mod stub;
pub mod yolo;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{YoloDetector, YoloDetectorConfig};

pub use adapter::{AdapterDiagnostics, AdapterDiagnosticsSnapshot, DetectionAdapter};
pub use policy::{AcceptancePolicy, AcceptanceRule};
pub use stub::StubDetector;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Axis-aligned box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Build from corner coordinates; swapped corners are reordered.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let (left, right) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (top, bottom) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union, 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// A classified region accepted by the detection boundary. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub label: String,
    /// Confidence in [0.0, 1.0].
    pub score: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

/// Unvalidated detector output, before normalization and policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Trim the label, clamp the score into [0, 1] and fix negative extents.
    ///
    /// Returns `None` for entries no policy could use: empty label or a
    /// non-finite confidence.
    pub fn normalize(self) -> Option<Detection> {
        let label = self.label.trim();
        if label.is_empty() || !self.confidence.is_finite() {
            return None;
        }
        let b = self.bbox;
        Some(Detection {
            label: label.to_string(),
            score: self.confidence.clamp(0.0, 1.0),
            bbox: BoundingBox::from_corners(b.x, b.y, b.x + b.width, b.y + b.height),
        })
    }
}

/// Channel order of a raw pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb8,
    /// OpenCV-style frames.
    Bgr8,
}

/// Packed 8-bit, 3-channel frame.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Arc<[u8]>,
}

impl PixelBuffer {
    /// `true` when `data` holds exactly `width * height * 3` bytes.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 3
    }
}

/// What a detector can look at.
#[derive(Debug, Clone)]
pub enum ImageInput {
    Path(PathBuf),
    Pixels(PixelBuffer),
}

impl ImageInput {
    pub fn describe(&self) -> String {
        match self {
            ImageInput::Path(p) => p.display().to_string(),
            ImageInput::Pixels(buf) => format!("{}x{} {:?}", buf.width, buf.height, buf.format),
        }
    }
}

/// One camera frame handed to the frame path. Transient.
#[derive(Debug, Clone)]
pub struct FrameContext {
    /// Monotonic per-camera index; drives the sampling gate.
    pub frame_index: u64,
    pub image: ImageInput,
}

impl FrameContext {
    pub fn new(frame_index: u64, image: ImageInput) -> Self {
        Self { frame_index, image }
    }
}

/// Contract for detection backends.
pub trait ObjectDetector: Send + 'static {
    /// One-time warm-up: open the model session and run a dummy inference.
    /// Called once, before the first `detect`.
    ///
    /// # Errors
    /// Returns an error if model files are missing or corrupt.
    fn warm_up(&mut self) -> Result<()>;

    /// Run the model on `image`, returning regions with confidence at or above
    /// `confidence_threshold`, in model output order.
    fn detect(&mut self, image: &ImageInput, confidence_threshold: f32) -> Result<Vec<RawDetection>>;

    /// Class names the model can emit, if known.
    fn class_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Thread-safe reference-counted handle to any `ObjectDetector` implementor.
#[derive(Clone)]
pub struct DetectorHandle(pub Arc<Mutex<dyn ObjectDetector>>);

impl DetectorHandle {
    pub fn new<D: ObjectDetector>(detector: D) -> Self {
        Self(Arc::new(Mutex::new(detector)))
    }
}

impl std::fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorHandle").finish_non_exhaustive()
    }
}
