//! `FrameMonitor`: per-camera frame path.
//!
//! ## Flow
//!
//! ```text
//! FrameContext ─► FrameSampler ─► DetectionAdapter ─► AlertStateMachine ─► AlarmControl
//!                   (skip)            (never fails)        (IDLE ⇄ ALARMING)
//! ```
//!
//! `process_frame` runs on the caller's thread and never returns an error:
//! detector failures arrive as "nothing detected" and alarm failures as
//! `AlertTransition::StartFailed`. Frames for one camera must be fed
//! sequentially; use one `FrameMonitor` per camera.

pub mod state;

pub use state::{AlertState, AlertStateMachine, RetriggerPolicy};

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::alarm::AlarmControl;
use crate::detect::{Detection, DetectionAdapter, FrameContext, ImageInput, RawDetection};
use crate::error::Result;
use crate::ipc::events::{AlertTransition, DetectionEvent};
use crate::sampling::{FrameSampler, DEFAULT_INTERVAL};

/// Broadcast channel capacity for detection events.
const BROADCAST_CAP: usize = 256;

/// Configuration for `FrameMonitor`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Run detection on every `sampling_interval`-th frame. Default: 3.
    pub sampling_interval: u32,
    /// Confidence floor for live video frames. Default: 0.15.
    pub video_confidence_floor: f32,
    /// Confidence floor for single still images (one-shot fire checks). Default: 0.25.
    pub still_confidence_floor: f32,
    /// Confidence floor for weapon detection. Default: 0.3.
    pub threat_confidence_floor: f32,
    /// Master switch for the frame path. Default: true.
    pub enable_fire_detection: bool,
    pub retrigger: RetriggerPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sampling_interval: DEFAULT_INTERVAL,
            video_confidence_floor: 0.15,
            still_confidence_floor: 0.25,
            threat_confidence_floor: 0.3,
            enable_fire_detection: true,
            retrigger: RetriggerPolicy::Suppress,
        }
    }
}

impl EngineConfig {
    /// Clamp floors into [0, 1] and raise a zero interval to 1.
    pub fn normalize(&mut self) {
        self.sampling_interval = self.sampling_interval.max(1);
        for floor in [
            &mut self.video_confidence_floor,
            &mut self.still_confidence_floor,
            &mut self.threat_confidence_floor,
        ] {
            *floor = if floor.is_finite() {
                floor.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
    }
}

/// Shared frame-path counters.
#[derive(Default)]
pub struct MonitorDiagnostics {
    pub frames_seen: AtomicUsize,
    pub frames_checked: AtomicUsize,
    pub frames_skipped: AtomicUsize,
    pub positive_frames: AtomicUsize,
    pub alarm_starts: AtomicUsize,
    pub alarm_stops: AtomicUsize,
    pub alarm_refreshes: AtomicUsize,
    pub start_failures: AtomicUsize,
    pub last_check_ms: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorDiagnosticsSnapshot {
    pub frames_seen: usize,
    pub frames_checked: usize,
    pub frames_skipped: usize,
    pub positive_frames: usize,
    pub alarm_starts: usize,
    pub alarm_stops: usize,
    pub alarm_refreshes: usize,
    pub start_failures: usize,
    pub last_check_ms: usize,
}

impl MonitorDiagnostics {
    pub fn reset(&self) {
        self.frames_seen.store(0, Ordering::Relaxed);
        self.frames_checked.store(0, Ordering::Relaxed);
        self.frames_skipped.store(0, Ordering::Relaxed);
        self.positive_frames.store(0, Ordering::Relaxed);
        self.alarm_starts.store(0, Ordering::Relaxed);
        self.alarm_stops.store(0, Ordering::Relaxed);
        self.alarm_refreshes.store(0, Ordering::Relaxed);
        self.start_failures.store(0, Ordering::Relaxed);
        self.last_check_ms.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MonitorDiagnosticsSnapshot {
        MonitorDiagnosticsSnapshot {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            frames_checked: self.frames_checked.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            positive_frames: self.positive_frames.load(Ordering::Relaxed),
            alarm_starts: self.alarm_starts.load(Ordering::Relaxed),
            alarm_stops: self.alarm_stops.load(Ordering::Relaxed),
            alarm_refreshes: self.alarm_refreshes.load(Ordering::Relaxed),
            start_failures: self.start_failures.load(Ordering::Relaxed),
            last_check_ms: self.last_check_ms.load(Ordering::Relaxed),
        }
    }

    fn record(&self, transition: AlertTransition) {
        let counter = match transition {
            AlertTransition::NoOp => return,
            AlertTransition::Start => &self.alarm_starts,
            AlertTransition::Stop => &self.alarm_stops,
            AlertTransition::Refresh => &self.alarm_refreshes,
            AlertTransition::StartFailed => &self.start_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result of feeding one frame.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub frame_index: u64,
    /// `false` when the frame was skipped by the sampler or detection is disabled.
    pub checked: bool,
    pub detections: Vec<Detection>,
    pub transition: AlertTransition,
}

/// The frame-path handle.
///
/// `FrameMonitor` is `Send + Sync`; the state machine sits behind a mutex so a
/// control surface can call `silence()` while frames are flowing.
pub struct FrameMonitor {
    config: EngineConfig,
    sampler: FrameSampler,
    adapter: Arc<DetectionAdapter>,
    alarm: Arc<dyn AlarmControl>,
    machine: Mutex<AlertStateMachine>,
    detection_tx: broadcast::Sender<DetectionEvent>,
    seq: AtomicU64,
    diagnostics: Arc<MonitorDiagnostics>,
}

impl FrameMonitor {
    /// # Errors
    /// `VigilError::InvalidConfig` when the sampling interval is 0.
    pub fn new(
        config: EngineConfig,
        adapter: Arc<DetectionAdapter>,
        alarm: Arc<dyn AlarmControl>,
    ) -> Result<Self> {
        let sampler = FrameSampler::new(config.sampling_interval)?;
        let mut config = config;
        config.normalize();
        let (detection_tx, _) = broadcast::channel(BROADCAST_CAP);
        Ok(Self {
            machine: Mutex::new(AlertStateMachine::new(config.retrigger)),
            config,
            sampler,
            adapter,
            alarm,
            detection_tx,
            seq: AtomicU64::new(0),
            diagnostics: Arc::new(MonitorDiagnostics::default()),
        })
    }

    /// Warm up the detector. Call once before the first frame.
    pub fn warm_up(&self) -> Result<()> {
        info!("warming up detector");
        self.adapter.warm_up()?;
        info!("detector ready");
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Feed one camera frame.
    pub fn process_frame(&self, frame: &FrameContext) -> FrameOutcome {
        self.diagnostics.frames_seen.fetch_add(1, Ordering::Relaxed);

        if !self.config.enable_fire_detection || !self.sampler.should_sample(frame.frame_index) {
            self.diagnostics
                .frames_skipped
                .fetch_add(1, Ordering::Relaxed);
            return FrameOutcome {
                frame_index: frame.frame_index,
                checked: false,
                detections: Vec::new(),
                transition: AlertTransition::NoOp,
            };
        }

        let t0 = Instant::now();
        let detections = self
            .adapter
            .classify(&frame.image, self.config.video_confidence_floor);
        self.diagnostics
            .last_check_ms
            .store(t0.elapsed().as_millis() as usize, Ordering::Relaxed);

        self.apply_checked(frame.frame_index, detections)
    }

    /// Drive the state machine from a detection result produced elsewhere
    /// (e.g. a server-side check of the same camera). Always counts as a
    /// checked frame: positive keeps the alarm on, negative clears it.
    pub fn observe_checked(&self, frame_index: u64, raw: Vec<RawDetection>) -> FrameOutcome {
        self.diagnostics.frames_seen.fetch_add(1, Ordering::Relaxed);
        let detections = self
            .adapter
            .accept(raw, self.config.video_confidence_floor);
        self.apply_checked(frame_index, detections)
    }

    /// One-shot fire check of a single still image at the still-image floor.
    ///
    /// Bypasses the sampler and leaves the alert state and the alarm alone;
    /// the caller decides what a positive still means.
    pub fn check_still(&self, image: &ImageInput) -> Vec<Detection> {
        let fires = self
            .adapter
            .classify(image, self.config.still_confidence_floor);
        debug!(image = %image.describe(), fires = fires.len(), "still image checked");
        fires
    }

    fn apply_checked(&self, frame_index: u64, detections: Vec<Detection>) -> FrameOutcome {
        self.diagnostics
            .frames_checked
            .fetch_add(1, Ordering::Relaxed);
        if !detections.is_empty() {
            self.diagnostics
                .positive_frames
                .fetch_add(1, Ordering::Relaxed);
        }

        let transition = self
            .machine
            .lock()
            .on_frame(Some(detections.as_slice()), self.alarm.as_ref());
        self.diagnostics.record(transition);

        debug!(
            frame = frame_index,
            detections = detections.len(),
            ?transition,
            "frame checked"
        );
        let _ = self.detection_tx.send(DetectionEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            frame_index,
            detections: detections.clone(),
            transition,
            at: Utc::now(),
        });

        FrameOutcome {
            frame_index,
            checked: true,
            detections,
            transition,
        }
    }

    /// Operator override: stop the alarm and return to IDLE.
    pub fn silence(&self) -> AlertTransition {
        let transition = self.machine.lock().reset(self.alarm.as_ref());
        self.diagnostics.record(transition);
        transition
    }

    pub fn state(&self) -> AlertState {
        self.machine.lock().state()
    }

    pub fn adapter(&self) -> &Arc<DetectionAdapter> {
        &self.adapter
    }

    /// Subscribe to events for checked frames.
    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionEvent> {
        self.detection_tx.subscribe()
    }

    pub fn diagnostics(&self) -> Arc<MonitorDiagnostics> {
        Arc::clone(&self.diagnostics)
    }
}

impl std::fmt::Debug for FrameMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameMonitor")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{AcceptancePolicy, BoundingBox, DetectorHandle, ImageInput, StubDetector};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FlagAlarm {
        playing: AtomicBool,
        starts: AtomicUsize,
    }

    impl AlarmControl for FlagAlarm {
        fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.playing.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn stop(&self) {
            self.playing.store(false, Ordering::SeqCst);
        }
        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }
    }

    fn fire() -> RawDetection {
        RawDetection::new("fire", 0.8, BoundingBox::from_corners(0.0, 0.0, 10.0, 10.0))
    }

    fn frame(i: u64) -> FrameContext {
        FrameContext::new(i, ImageInput::Path(PathBuf::from(format!("frame-{i}.jpg"))))
    }

    fn monitor(stub: StubDetector, config: EngineConfig) -> (FrameMonitor, Arc<FlagAlarm>) {
        let adapter = Arc::new(DetectionAdapter::new(
            DetectorHandle::new(stub),
            AcceptancePolicy::fire(),
        ));
        let alarm = Arc::new(FlagAlarm::default());
        let monitor = FrameMonitor::new(config, adapter, alarm.clone()).unwrap();
        (monitor, alarm)
    }

    #[test]
    fn only_sampled_frames_reach_the_detector() {
        let (monitor, _) = monitor(StubDetector::fixed(vec![]), EngineConfig::default());
        let checked: Vec<u64> = (0..10)
            .map(|i| monitor.process_frame(&frame(i)))
            .filter(|o| o.checked)
            .map(|o| o.frame_index)
            .collect();
        assert_eq!(checked, vec![0, 3, 6, 9]);
        let snap = monitor.diagnostics().snapshot();
        assert_eq!(snap.frames_seen, 10);
        assert_eq!(snap.frames_skipped, 6);
    }

    #[test]
    fn fire_starts_and_clean_frame_stops() {
        let config = EngineConfig {
            sampling_interval: 1,
            ..EngineConfig::default()
        };
        let stub = StubDetector::scripted(vec![vec![fire()], vec![fire()], vec![]]);
        let (monitor, alarm) = monitor(stub, config);

        assert_eq!(monitor.process_frame(&frame(0)).transition, AlertTransition::Start);
        assert!(alarm.is_playing());
        assert_eq!(monitor.process_frame(&frame(1)).transition, AlertTransition::NoOp);
        assert_eq!(monitor.process_frame(&frame(2)).transition, AlertTransition::Stop);
        assert!(!alarm.is_playing());
        assert_eq!(alarm.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disabled_detection_never_checks() {
        let config = EngineConfig {
            enable_fire_detection: false,
            ..EngineConfig::default()
        };
        let (monitor, alarm) = monitor(StubDetector::fixed(vec![fire()]), config);
        assert!(!monitor.process_frame(&frame(0)).checked);
        assert!(!alarm.is_playing());
    }

    #[test]
    fn observe_checked_bypasses_sampler() {
        let (monitor, alarm) = monitor(StubDetector::default(), EngineConfig::default());
        assert_eq!(monitor.observe_checked(1, vec![fire()]).transition, AlertTransition::Start);
        assert!(alarm.is_playing());
        assert_eq!(monitor.observe_checked(2, vec![]).transition, AlertTransition::Stop);
    }

    #[test]
    fn silence_resets_state() {
        let (monitor, alarm) = monitor(StubDetector::default(), EngineConfig::default());
        monitor.observe_checked(0, vec![fire()]);
        assert_eq!(monitor.state(), AlertState::Alarming);
        assert_eq!(monitor.silence(), AlertTransition::Stop);
        assert_eq!(monitor.state(), AlertState::Idle);
        assert!(!alarm.is_playing());
    }

    #[test]
    fn still_check_uses_still_floor_and_leaves_state_alone() {
        let stub = StubDetector::fixed(vec![
            RawDetection::new("fire", 0.2, BoundingBox::from_corners(0.0, 0.0, 5.0, 5.0)),
            RawDetection::new("flame", 0.3, BoundingBox::from_corners(0.0, 0.0, 5.0, 5.0)),
        ]);
        let (monitor, alarm) = monitor(stub, EngineConfig::default());

        let fires = monitor.check_still(&ImageInput::Path(PathBuf::from("still.jpg")));
        // 0.2 clears the video floor (0.15) but not the still floor (0.25).
        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].label, "flame");
        assert_eq!(monitor.state(), AlertState::Idle);
        assert!(!alarm.is_playing());
        assert_eq!(monitor.diagnostics().snapshot().frames_checked, 0);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = EngineConfig {
            sampling_interval: 0,
            ..EngineConfig::default()
        };
        let adapter = Arc::new(DetectionAdapter::new(
            DetectorHandle::new(StubDetector::default()),
            AcceptancePolicy::fire(),
        ));
        let alarm: Arc<dyn AlarmControl> = Arc::new(FlagAlarm::default());
        assert!(FrameMonitor::new(config, adapter, alarm).is_err());
    }

    #[test]
    fn checked_frames_are_broadcast() {
        let (monitor, _) = monitor(StubDetector::fixed(vec![fire()]), EngineConfig::default());
        let mut rx = monitor.subscribe_detections();
        monitor.process_frame(&frame(0));
        monitor.process_frame(&frame(1));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.frame_index, 0);
        assert_eq!(event.transition, AlertTransition::Start);
        assert!(rx.try_recv().is_err());
    }
}
