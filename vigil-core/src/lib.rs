//! # vigil-core
//!
//! Perimeter alert engine SDK: decides when to look at a camera frame, turns
//! detector output into a stable alert signal, drives a looping alarm and
//! composes spoken alerts.
//!
//! ## Architecture
//!
//! ```text
//! FrameContext → FrameSampler → DetectionAdapter → AlertStateMachine → AlarmPlayer
//!                                      │                                   │
//!                              ObjectDetector                    worker thread + PlaybackBackend
//!
//! threats + metadata → AlertComposer → SpeechSynthesizer → WAV → AlertPayload
//! ```
//!
//! The frame path runs on the caller's thread and never fails. The alarm loop
//! runs on its own thread and is cancelled through a channel.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod alarm;
pub mod audio;
pub mod compose;
pub mod detect;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod sampling;
pub mod speech;

// Convenience re-exports for downstream crates
pub use alarm::{AlarmConfig, AlarmControl, AlarmPlayer, BackendHandle, PlaybackBackend};
pub use audio::CpalOutput;
pub use compose::{build_alert_text, fire_alert_summary, AlertComposer, SituationalMetadata};
pub use detect::{
    AcceptancePolicy, Detection, DetectionAdapter, DetectorHandle, FrameContext, ImageInput,
    ObjectDetector, RawDetection,
};
pub use engine::{EngineConfig, FrameMonitor, RetriggerPolicy};
pub use error::{Result, VigilError};
pub use ipc::events::{AlarmStatusEvent, AlertPayload, AlertTransition, AudioPayload, DetectionEvent};
pub use sampling::{should_sample, FrameSampler};
pub use speech::{SpeechSynthesizer, SynthHandle};

#[cfg(feature = "onnx")]
pub use detect::{YoloDetector, YoloDetectorConfig};
