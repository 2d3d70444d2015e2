//! Event and payload types published by the core.
//!
//! ## Channels
//!
//! | Event | Source | Subscribe via |
//! |-------|--------|---------------|
//! | `AlarmStatusEvent` | `AlarmPlayer` | `AlarmPlayer::subscribe` |
//! | `DetectionEvent` | `FrameMonitor` | `FrameMonitor::subscribe_detections` |
//!
//! `AlertPayload` is the response body for one-shot security alerts and keeps
//! the field names existing dashboards consume (`hasThreat`, `alertText`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::wav::WAV_MIME;
use crate::detect::Detection;

// ---------------------------------------------------------------------------
// Alarm status events
// ---------------------------------------------------------------------------

/// Emitted whenever an alarm session starts or ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmStatusEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub session_id: u64,
    pub state: AlarmState,
    /// Set on `Stopped` events.
    pub reason: Option<StopReason>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmState {
    Playing,
    Stopped,
}

/// Why an alarm session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The auto-stop deadline passed.
    AutoStop,
    /// The backend failed to play the clip.
    PlaybackError,
    /// A new `start()` replaced the session.
    Superseded,
}

// ---------------------------------------------------------------------------
// Detection events
// ---------------------------------------------------------------------------

/// State-machine outcome of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertTransition {
    /// Unsampled frame, or no state change.
    NoOp,
    /// IDLE → ALARMING; the alarm was started.
    Start,
    /// ALARMING → IDLE; the alarm was stopped.
    Stop,
    /// Positive while ALARMING under the refresh policy; the alarm restarted.
    Refresh,
    /// A positive frame could not start the alarm; state stays IDLE.
    StartFailed,
}

/// Emitted for every frame on which detection actually ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    pub seq: u64,
    pub frame_index: u64,
    pub detections: Vec<Detection>,
    pub transition: AlertTransition,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Alert payloads
// ---------------------------------------------------------------------------

/// Encoded speech attached to an alert. Empty `base64` means no audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    pub base64: String,
    pub mime_type: String,
}

impl AudioPayload {
    pub fn empty() -> Self {
        Self {
            base64: String::new(),
            mime_type: WAV_MIME.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base64.is_empty()
    }
}

/// Result of a one-shot security alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub has_threat: bool,
    pub threats: Vec<Detection>,
    pub alert_text: String,
    pub audio: AudioPayload,
}

impl AlertPayload {
    /// The "nothing found" response.
    pub fn empty() -> Self {
        Self {
            has_threat: false,
            threats: Vec::new(),
            alert_text: String::new(),
            audio: AudioPayload::empty(),
        }
    }
}
