//! Host state shared by the command loop.
//!
//! `Runtime` is everything built from one `AppSettings` value: alarm, frame
//! monitor, threat adapter and composer. `setSettings` builds a fresh runtime
//! and swaps it in; commands hold an `Arc<Runtime>` for their duration.

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_core::alarm::{AlarmDiagnosticsSnapshot, AlarmSessionInfo, SilentBackend};
use vigil_core::detect::{AdapterDiagnosticsSnapshot, StubDetector};
use vigil_core::engine::{AlertState, MonitorDiagnosticsSnapshot};
use vigil_core::speech::ToneSynthesizer;
use vigil_core::{
    AcceptancePolicy, AlarmPlayer, AlertComposer, BackendHandle, CpalOutput, DetectionAdapter,
    DetectorHandle, FrameMonitor, SynthHandle,
};

use crate::settings::{save_settings, AppSettings};

/// Clip length assumed by the silent fallback backend.
const SILENT_CLIP: Duration = Duration::from_secs(1);

pub struct Runtime {
    pub monitor: Arc<FrameMonitor>,
    pub alarm: Arc<AlarmPlayer>,
    pub threat_adapter: Arc<DetectionAdapter>,
    pub composer: Arc<AlertComposer>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Build every component `settings` describes.
    ///
    /// Missing models and output devices degrade (stub detector, silent
    /// alarm) with a warning; an unreadable policy file is an error.
    pub fn build(settings: &AppSettings, handle: &Handle) -> anyhow::Result<Self> {
        let alarm = Arc::new(AlarmPlayer::new(
            settings.alarm_config(),
            open_backend(settings),
        ));

        let fire_policy = match &settings.fire_policy {
            Some(path) => load_policy(path)?,
            None => AcceptancePolicy::fire(),
        };
        let fire_adapter = Arc::new(DetectionAdapter::new(
            load_detector(settings.detector_model.as_deref(), "fire"),
            fire_policy,
        ));
        let threat_adapter = Arc::new(DetectionAdapter::new(
            load_detector(settings.threat_model.as_deref(), "threat"),
            AcceptancePolicy::threat(),
        ));

        let monitor = Arc::new(
            FrameMonitor::new(settings.engine_config(), fire_adapter, alarm.clone())
                .context("invalid engine configuration")?,
        );
        if let Err(e) = monitor.warm_up() {
            warn!("fire detector warm-up failed: {e}");
        }
        if let Err(e) = threat_adapter.warm_up() {
            warn!("threat detector warm-up failed: {e}");
        }

        let synth = settings
            .speech_enabled
            .then(|| SynthHandle::new(ToneSynthesizer::default()));
        let composer = Arc::new(AlertComposer::new(synth));
        if let Err(e) = composer.warm_up() {
            warn!("speech warm-up failed; alerts will be text-only: {e}");
        }

        let mut runtime = Self::from_parts(monitor, alarm, threat_adapter, composer);
        runtime.forward_events(handle);
        Ok(runtime)
    }

    pub fn from_parts(
        monitor: Arc<FrameMonitor>,
        alarm: Arc<AlarmPlayer>,
        threat_adapter: Arc<DetectionAdapter>,
        composer: Arc<AlertComposer>,
    ) -> Self {
        Self {
            monitor,
            alarm,
            threat_adapter,
            composer,
            forwarders: Vec::new(),
        }
    }

    /// Log alarm and detection events as they happen.
    fn forward_events(&mut self, handle: &Handle) {
        let mut status_rx = self.alarm.subscribe();
        self.forwarders.push(handle.spawn(async move {
            loop {
                match status_rx.recv().await {
                    Ok(event) => info!(
                        session = event.session_id,
                        state = ?event.state,
                        reason = ?event.reason,
                        "alarm status"
                    ),
                    Err(RecvError::Lagged(n)) => warn!("alarm status forwarder lagged by {n}"),
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        let mut detection_rx = self.monitor.subscribe_detections();
        self.forwarders.push(handle.spawn(async move {
            loop {
                match detection_rx.recv().await {
                    Ok(event) => debug!(
                        frame = event.frame_index,
                        detections = event.detections.len(),
                        transition = ?event.transition,
                        "detection"
                    ),
                    Err(RecvError::Lagged(n)) => warn!("detection forwarder lagged by {n}"),
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
    }
}

fn open_backend(settings: &AppSettings) -> BackendHandle {
    if settings.alarm_sound.is_none() {
        warn!("no alarm sound configured; alarms will be reported but not played");
        return BackendHandle::new(SilentBackend::new(SILENT_CLIP));
    }
    match CpalOutput::open(settings.preferred_output_device.as_deref()) {
        Ok(output) => {
            info!(sample_rate = output.sample_rate, "audio output ready");
            BackendHandle::new(output)
        }
        Err(e) => {
            warn!("audio output unavailable, alarm will be silent: {e}");
            BackendHandle::new(SilentBackend::new(SILENT_CLIP))
        }
    }
}

fn load_policy(path: &Path) -> anyhow::Result<AcceptancePolicy> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading acceptance policy {}", path.display()))?;
    AcceptancePolicy::from_json(&raw)
        .with_context(|| format!("parsing acceptance policy {}", path.display()))
}

#[cfg(feature = "onnx")]
fn load_detector(model: Option<&Path>, role: &str) -> DetectorHandle {
    use vigil_core::{YoloDetector, YoloDetectorConfig};

    match model {
        Some(path) if path.exists() => {
            info!(role, model = %path.display(), "using YOLO detector");
            DetectorHandle::new(YoloDetector::new(YoloDetectorConfig::new(path)))
        }
        Some(path) => {
            warn!(role, model = %path.display(), "model file not found; using stub detector");
            DetectorHandle::new(StubDetector::default())
        }
        None => {
            info!(role, "no model configured; using stub detector");
            DetectorHandle::new(StubDetector::default())
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn load_detector(model: Option<&Path>, role: &str) -> DetectorHandle {
    if let Some(path) = model {
        warn!(
            role,
            model = %path.display(),
            "built without the `onnx` feature; using stub detector"
        );
    }
    DetectorHandle::new(StubDetector::default())
}

/// Shared host state, one per process.
pub struct AppState {
    runtime: RwLock<Arc<Runtime>>,
    pub settings: Mutex<AppSettings>,
    /// `None` keeps settings in memory only.
    pub settings_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub commands_handled: AtomicUsize,
    pub command_errors: AtomicUsize,
    handle: Handle,
}

impl AppState {
    pub fn new(
        runtime: Runtime,
        settings: AppSettings,
        settings_path: Option<PathBuf>,
        handle: Handle,
    ) -> Self {
        Self {
            runtime: RwLock::new(Arc::new(runtime)),
            settings: Mutex::new(settings),
            settings_path,
            started_at: Utc::now(),
            commands_handled: AtomicUsize::new(0),
            command_errors: AtomicUsize::new(0),
            handle,
        }
    }

    pub fn runtime(&self) -> Arc<Runtime> {
        Arc::clone(&self.runtime.read())
    }

    /// Persist `settings` and rebuild the runtime from them. The previous
    /// runtime's alarm is silenced before the swap.
    pub fn replace_settings(&self, settings: AppSettings) -> anyhow::Result<()> {
        let runtime = Runtime::build(&settings, &self.handle)?;
        if let Some(path) = &self.settings_path {
            save_settings(path, &settings)
                .with_context(|| format!("saving settings to {}", path.display()))?;
        }

        let previous = std::mem::replace(&mut *self.runtime.write(), Arc::new(runtime));
        previous.monitor.silence();
        *self.settings.lock() = settings;
        info!("settings applied");
        Ok(())
    }

    pub fn status(&self) -> StatusPayload {
        let runtime = self.runtime();
        StatusPayload {
            started_at: self.started_at,
            alert_state: runtime.monitor.state(),
            alarm_playing: runtime.alarm.is_playing(),
            alarm_session: runtime.alarm.session(),
            alarm: runtime.alarm.diagnostics_snapshot(),
            monitor: runtime.monitor.diagnostics().snapshot(),
            fire_detector: runtime.monitor.adapter().diagnostics().snapshot(),
            threat_detector: runtime.threat_adapter.diagnostics().snapshot(),
            commands_handled: self.commands_handled.load(Ordering::Relaxed),
            command_errors: self.command_errors.load(Ordering::Relaxed),
        }
    }

    /// Stop any alarm before the process exits.
    pub fn shutdown(&self) {
        let runtime = self.runtime();
        runtime.monitor.silence();
        let status = self.status();
        info!(
            commands = status.commands_handled,
            errors = status.command_errors,
            frames_checked = status.monitor.frames_checked,
            alarm_sessions = status.alarm.sessions_started,
            "host diagnostics snapshot on shutdown"
        );
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub started_at: DateTime<Utc>,
    pub alert_state: AlertState,
    pub alarm_playing: bool,
    pub alarm_session: Option<AlarmSessionInfo>,
    pub alarm: AlarmDiagnosticsSnapshot,
    pub monitor: MonitorDiagnosticsSnapshot,
    pub fire_detector: AdapterDiagnosticsSnapshot,
    pub threat_detector: AdapterDiagnosticsSnapshot,
    pub commands_handled: usize,
    pub command_errors: usize,
}
