//! JSON-lines command handlers.
//!
//! Each stdin line is one request object tagged by `cmd`; an optional `id` is
//! echoed on the response so callers can pipeline requests:
//!
//! ```json
//! {"id": 7, "cmd": "frame", "frameIndex": 42, "image": {"path": "/var/cam0/42.jpg"}}
//! {"id": 7, "ok": true, "result": {"frameIndex": 42, "checked": true, ...}}
//! ```

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use vigil_core::detect::{raw, PixelBuffer, PixelFormat};
use vigil_core::{
    fire_alert_summary, AlertTransition, Detection, FrameContext, ImageInput, SituationalMetadata,
};

use crate::settings::AppSettings;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Command {
    /// Feed one camera frame through the sampler and fire detector.
    #[serde(rename_all = "camelCase")]
    Frame { frame_index: u64, image: ImageSpec },
    /// Drive the alert state from a detection result produced elsewhere.
    #[serde(rename_all = "camelCase")]
    Observe {
        frame_index: u64,
        result: Value,
        #[serde(default = "default_observe_label")]
        default_label: String,
        #[serde(default)]
        metadata: SituationalMetadata,
    },
    /// One-shot fire check of a still image. Does not touch the alarm.
    #[serde(rename_all = "camelCase")]
    FireCheck {
        image: ImageSpec,
        #[serde(default)]
        metadata: SituationalMetadata,
    },
    /// One-shot weapon check with a spoken alert.
    #[serde(rename_all = "camelCase")]
    Alert {
        image: ImageSpec,
        #[serde(default)]
        metadata: SituationalMetadata,
    },
    StopAlarm,
    Status,
    ListOutputDevices,
    /// Merge a partial settings object and rebuild the runtime.
    SetSettings { settings: Value },
}

fn default_observe_label() -> String {
    "fire".to_string()
}

/// Image reference: a file path or an inline packed 8-bit frame.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub pixels: Option<PixelSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelSpec {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_pixel_format")]
    pub format: PixelFormat,
    pub base64: String,
}

fn default_pixel_format() -> PixelFormat {
    PixelFormat::Bgr8
}

impl ImageSpec {
    pub fn into_input(self) -> anyhow::Result<ImageInput> {
        match (self.path, self.pixels) {
            (Some(path), None) => Ok(ImageInput::Path(path)),
            (None, Some(px)) => {
                let data = base64::engine::general_purpose::STANDARD
                    .decode(px.base64.as_bytes())
                    .context("pixels.base64 is not valid base64")?;
                let buffer = PixelBuffer {
                    width: px.width,
                    height: px.height,
                    format: px.format,
                    data: data.into(),
                };
                if !buffer.is_well_formed() {
                    bail!(
                        "pixel buffer holds {} bytes, expected {}x{}x3",
                        buffer.data.len(),
                        buffer.width,
                        buffer.height
                    );
                }
                Ok(ImageInput::Pixels(buffer))
            }
            (Some(_), Some(_)) => bail!("image takes either `path` or `pixels`, not both"),
            (None, None) => bail!("image needs `path` or `pixels`"),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, error: String) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FrameResult {
    frame_index: u64,
    checked: bool,
    detections: Vec<Detection>,
    transition: AlertTransition,
    alarm_playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FireCheckResult {
    fires: Vec<Detection>,
    has_fire: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopResult {
    transition: AlertTransition,
    alarm_playing: bool,
}

/// Parse and execute one request line. Never fails; errors become
/// `{"ok": false, "error": ...}`.
pub fn handle_line(state: &AppState, line: &str) -> Response {
    state.commands_handled.fetch_add(1, Ordering::Relaxed);

    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            state.command_errors.fetch_add(1, Ordering::Relaxed);
            return Response::error(None, format!("invalid JSON: {e}"));
        }
    };
    let id = value.get("id").cloned();

    let result = serde_json::from_value::<Command>(value)
        .context("invalid command")
        .and_then(|command| execute(state, command));

    match result {
        Ok(result) => Response::ok(id, result),
        Err(e) => {
            state.command_errors.fetch_add(1, Ordering::Relaxed);
            warn!("command failed: {e:#}");
            Response::error(id, format!("{e:#}"))
        }
    }
}

fn execute(state: &AppState, command: Command) -> anyhow::Result<Value> {
    let runtime = state.runtime();
    match command {
        Command::Frame { frame_index, image } => {
            let frame = FrameContext::new(frame_index, image.into_input()?);
            let outcome = runtime.monitor.process_frame(&frame);
            to_json(FrameResult {
                frame_index: outcome.frame_index,
                checked: outcome.checked,
                detections: outcome.detections,
                transition: outcome.transition,
                alarm_playing: runtime.alarm.is_playing(),
                summary: None,
            })
        }
        Command::Observe {
            frame_index,
            result,
            default_label,
            metadata,
        } => {
            let raw = raw::parse_value(&result, &default_label)?;
            let outcome = runtime.monitor.observe_checked(frame_index, raw);
            let summary = fire_alert_summary(
                &metadata.zone_name,
                metadata.plate_number.as_deref(),
                &outcome.detections,
            );
            if let Some(line) = &summary {
                info!("{line}");
            }
            to_json(FrameResult {
                frame_index: outcome.frame_index,
                checked: outcome.checked,
                detections: outcome.detections,
                transition: outcome.transition,
                alarm_playing: runtime.alarm.is_playing(),
                summary,
            })
        }
        Command::FireCheck { image, metadata } => {
            let fires = runtime.monitor.check_still(&image.into_input()?);
            let summary = fire_alert_summary(
                &metadata.zone_name,
                metadata.plate_number.as_deref(),
                &fires,
            );
            if let Some(line) = &summary {
                info!("{line}");
            }
            to_json(FireCheckResult {
                has_fire: !fires.is_empty(),
                fires,
                summary,
            })
        }
        Command::Alert { image, metadata } => {
            let image = image.into_input()?;
            let floor = runtime.monitor.config().threat_confidence_floor;
            let payload = runtime.composer.process_security_alert(
                &runtime.threat_adapter,
                &image,
                &metadata,
                floor,
            );
            to_json(payload)
        }
        Command::StopAlarm => {
            let transition = runtime.monitor.silence();
            to_json(StopResult {
                transition,
                alarm_playing: runtime.alarm.is_playing(),
            })
        }
        Command::Status => to_json(state.status()),
        Command::ListOutputDevices => to_json(vigil_core::audio::device::list_output_devices()),
        Command::SetSettings { settings } => {
            // Release the runtime before it is swapped out.
            drop(runtime);
            let current = state.settings.lock().clone();
            let merged = merge_settings(&current, settings)?;
            debug!(?merged, "applying settings");
            state.replace_settings(merged.clone())?;
            to_json(merged)
        }
    }
}

/// Overlay the keys of `patch` onto `current`.
pub fn merge_settings(current: &AppSettings, patch: Value) -> anyhow::Result<AppSettings> {
    let Value::Object(patch) = patch else {
        bail!("settings must be a JSON object");
    };
    let mut base = serde_json::to_value(current)?;
    if let Value::Object(fields) = &mut base {
        fields.extend(patch);
    }
    let mut merged: AppSettings =
        serde_json::from_value(base).context("invalid settings value")?;
    merged.normalize();
    Ok(merged)
}

fn to_json<T: Serialize>(value: T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Convenience for the stdin loop: run a line on the blocking pool.
pub async fn dispatch(state: Arc<AppState>, line: String) -> Response {
    match tokio::task::spawn_blocking(move || handle_line(&state, &line)).await {
        Ok(response) => response,
        Err(e) => Response::error(None, format!("command task failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_core::alarm::SilentBackend;
    use vigil_core::detect::{BoundingBox, StubDetector};
    use vigil_core::speech::ToneSynthesizer;
    use vigil_core::{
        AcceptancePolicy, AlarmConfig, AlarmPlayer, AlertComposer, BackendHandle,
        DetectionAdapter, DetectorHandle, EngineConfig, FrameMonitor, RawDetection, SynthHandle,
    };

    use crate::state::Runtime;

    fn raw_det(label: &str, confidence: f32) -> RawDetection {
        RawDetection::new(label, confidence, BoundingBox::from_corners(1.0, 1.0, 20.0, 20.0))
    }

    fn test_state(fire: Vec<RawDetection>, threats: Vec<RawDetection>) -> AppState {
        let alarm = Arc::new(AlarmPlayer::new(
            AlarmConfig {
                sound_path: Some(PathBuf::from("alarm.wav")),
                poll_interval: Duration::from_millis(10),
                ..AlarmConfig::default()
            },
            BackendHandle::new(SilentBackend::new(Duration::from_millis(50))),
        ));
        let fire_adapter = Arc::new(DetectionAdapter::new(
            DetectorHandle::new(StubDetector::fixed(fire)),
            AcceptancePolicy::fire(),
        ));
        let threat_adapter = Arc::new(DetectionAdapter::new(
            DetectorHandle::new(StubDetector::fixed(threats)),
            AcceptancePolicy::threat(),
        ));
        let monitor = Arc::new(
            FrameMonitor::new(
                EngineConfig {
                    sampling_interval: 1,
                    ..EngineConfig::default()
                },
                fire_adapter,
                alarm.clone(),
            )
            .unwrap(),
        );
        let composer = Arc::new(AlertComposer::new(Some(SynthHandle::new(
            ToneSynthesizer::default(),
        ))));
        AppState::new(
            Runtime::from_parts(monitor, alarm, threat_adapter, composer),
            AppSettings::default(),
            None,
            tokio::runtime::Handle::current(),
        )
    }

    fn run(state: &AppState, line: &str) -> Value {
        serde_json::to_value(handle_line(state, line)).unwrap()
    }

    #[tokio::test]
    async fn frame_then_stop_alarm() {
        let state = test_state(vec![raw_det("fire", 0.8)], vec![]);

        let resp = run(
            &state,
            r#"{"id": 1, "cmd": "frame", "frameIndex": 0, "image": {"path": "cam0/0.jpg"}}"#,
        );
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["result"]["transition"], "start");
        assert_eq!(resp["result"]["alarmPlaying"], true);
        assert_eq!(resp["result"]["detections"][0]["label"], "fire");

        let resp = run(&state, r#"{"cmd": "stopAlarm"}"#);
        assert_eq!(resp["result"]["transition"], "stop");
        assert_eq!(resp["result"]["alarmPlaying"], false);
    }

    #[tokio::test]
    async fn observe_accepts_external_result_shapes() {
        let state = test_state(vec![], vec![]);
        let line = r#"{
            "cmd": "observe",
            "frameIndex": 9,
            "result": {"predictions": [
                {"class": "smoke", "confidence": 0.6, "bbox": [0, 0, 10, 10]},
                {"class": "person", "confidence": 0.5, "bbox": [0, 0, 10, 10]}
            ]},
            "metadata": {"zoneName": "Gate 2", "plateNumber": "AB123"}
        }"#;
        let resp = run(&state, line);
        assert_eq!(resp["ok"], true, "{resp}");
        assert_eq!(resp["result"]["transition"], "start");
        assert_eq!(
            resp["result"]["summary"],
            "[FIRE DETECTED] at Gate 2 (Plate: AB123): smoke"
        );

        let resp = run(&state, r#"{"cmd": "observe", "frameIndex": 10, "result": []}"#);
        assert_eq!(resp["result"]["transition"], "stop");
        assert!(resp["result"].get("summary").is_none());
    }

    #[tokio::test]
    async fn fire_check_reports_without_alarming() {
        let state = test_state(vec![raw_det("fire", 0.2), raw_det("smoke", 0.6)], vec![]);
        let resp = run(
            &state,
            r#"{"cmd": "fireCheck", "image": {"path": "still.jpg"}, "metadata": {"zoneName": "Dock"}}"#,
        );
        assert_eq!(resp["ok"], true, "{resp}");
        let result = &resp["result"];
        assert_eq!(result["hasFire"], true);
        assert_eq!(result["fires"].as_array().map(Vec::len), Some(1));
        assert_eq!(result["fires"][0]["label"], "smoke");
        assert_eq!(result["summary"], "[FIRE DETECTED] at Dock: smoke");
        assert!(!state.runtime().alarm.is_playing());
        assert_eq!(state.status().alert_state, vigil_core::engine::AlertState::Idle);

        let state = test_state(vec![raw_det("fire", 0.2)], vec![]);
        let resp = run(&state, r#"{"cmd": "fireCheck", "image": {"path": "still.jpg"}}"#);
        assert_eq!(resp["result"]["hasFire"], false);
        assert!(resp["result"].get("summary").is_none());
    }

    #[tokio::test]
    async fn alert_returns_payload_with_audio() {
        let state = test_state(vec![], vec![raw_det("knife", 0.8)]);
        let resp = run(
            &state,
            r#"{"cmd": "alert", "image": {"path": "lobby.jpg"}, "metadata": {"zoneName": "Lobby"}}"#,
        );
        let result = &resp["result"];
        assert_eq!(result["hasThreat"], true);
        assert_eq!(
            result["alertText"],
            "Attention security. Activity detected near Lobby. Possible knife detected. \
             Please respond immediately."
        );
        assert_eq!(result["audio"]["mimeType"], "audio/wav");
        assert!(!result["audio"]["base64"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_requests_report_errors() {
        let state = test_state(vec![], vec![]);

        let resp = run(&state, "{not json");
        assert_eq!(resp["ok"], false);
        assert!(resp.get("id").is_none());

        let resp = run(&state, r#"{"id": "a", "cmd": "selfDestruct"}"#);
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["id"], "a");

        let resp = run(&state, r#"{"cmd": "frame", "frameIndex": 1, "image": {}}"#);
        assert_eq!(resp["ok"], false);

        let resp = run(
            &state,
            r#"{"cmd": "frame", "frameIndex": 1,
                "image": {"pixels": {"width": 2, "height": 2, "base64": "AAAA"}}}"#,
        );
        assert_eq!(resp["ok"], false);
        assert!(resp["error"].as_str().unwrap().contains("expected 2x2x3"));

        assert_eq!(state.command_errors.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn inline_pixels_reach_the_detector() {
        let state = test_state(vec![raw_det("flame", 0.5)], vec![]);
        let pixels = base64::engine::general_purpose::STANDARD.encode([0u8; 12]);
        let line = format!(
            r#"{{"cmd": "frame", "frameIndex": 0,
                 "image": {{"pixels": {{"width": 2, "height": 2, "format": "rgb8", "base64": "{pixels}"}}}}}}"#
        );
        let resp = run(&state, &line);
        assert_eq!(resp["ok"], true, "{resp}");
        assert_eq!(resp["result"]["transition"], "start");
        state.shutdown();
    }

    #[tokio::test]
    async fn status_reports_counters() {
        let state = test_state(vec![], vec![]);
        run(&state, r#"{"cmd": "frame", "frameIndex": 0, "image": {"path": "a.jpg"}}"#);
        let resp = run(&state, r#"{"cmd": "status"}"#);
        let result = &resp["result"];
        assert_eq!(result["alertState"], "idle");
        assert_eq!(result["alarmPlaying"], false);
        assert_eq!(result["monitor"]["framesChecked"], 1);
        assert_eq!(result["fireDetector"]["calls"], 1);
        assert_eq!(result["commandsHandled"], 2);
    }

    #[tokio::test]
    async fn set_settings_rebuilds_runtime() {
        let state = test_state(vec![], vec![]);
        let resp = run(
            &state,
            r#"{"cmd": "setSettings", "settings": {"fireDetectionInterval": 5, "speechEnabled": false}}"#,
        );
        assert_eq!(resp["ok"], true, "{resp}");
        assert_eq!(resp["result"]["fireDetectionInterval"], 5);
        assert_eq!(state.runtime().monitor.config().sampling_interval, 5);
        assert!(!state.settings.lock().speech_enabled);

        let resp = run(&state, r#"{"cmd": "setSettings", "settings": [1, 2]}"#);
        assert_eq!(resp["ok"], false);
    }

    #[test]
    fn merge_keeps_unpatched_fields() {
        let current = AppSettings {
            alarm_volume: 0.3,
            ..AppSettings::default()
        };
        let merged =
            merge_settings(&current, serde_json::json!({ "fireDetectionInterval": 0 })).unwrap();
        assert_eq!(merged.alarm_volume, 0.3);
        assert_eq!(merged.fire_detection_interval, 1);
    }
}
