use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use vigil_core::alarm::SilentBackend;
use vigil_core::audio::wav::decode_bytes;
use vigil_core::detect::{AcceptancePolicy, BoundingBox, StubDetector};
use vigil_core::engine::AlertState;
use vigil_core::speech::{SpeechSynthesizer, SynthesizedSpeech, ToneSynthesizer};
use vigil_core::{
    AlarmConfig, AlarmPlayer, AlertComposer, AlertTransition, BackendHandle, DetectionAdapter,
    DetectorHandle, EngineConfig, FrameContext, FrameMonitor, ImageInput, RawDetection, Result,
    SituationalMetadata, SynthHandle, VigilError,
};

fn raw(label: &str, confidence: f32) -> RawDetection {
    RawDetection::new(label, confidence, BoundingBox::from_corners(4.0, 4.0, 40.0, 60.0))
}

fn alarm() -> Arc<AlarmPlayer> {
    Arc::new(AlarmPlayer::new(
        AlarmConfig {
            sound_path: Some(PathBuf::from("alarm.wav")),
            poll_interval: Duration::from_millis(10),
            ..AlarmConfig::default()
        },
        BackendHandle::new(SilentBackend::new(Duration::from_millis(50))),
    ))
}

fn frame(index: u64) -> FrameContext {
    FrameContext::new(index, ImageInput::Path(PathBuf::from(format!("cam0/{index}.jpg"))))
}

#[test]
fn checked_sequence_starts_then_stops_the_alarm() {
    let script = vec![vec![], vec![], vec![raw("fire", 0.8)], vec![], vec![]];
    let adapter = Arc::new(DetectionAdapter::new(
        DetectorHandle::new(StubDetector::scripted(script)),
        AcceptancePolicy::fire(),
    ));
    let alarm = alarm();
    let monitor = FrameMonitor::new(
        EngineConfig {
            sampling_interval: 1,
            ..EngineConfig::default()
        },
        adapter,
        alarm.clone(),
    )
    .expect("monitor");
    let mut events = monitor.subscribe_detections();

    let transitions: Vec<AlertTransition> = (0..5)
        .map(|i| {
            let outcome = monitor.process_frame(&frame(i));
            assert!(outcome.checked);
            if i == 2 {
                assert!(alarm.is_playing(), "alarm should be playing after frame 2");
                assert_eq!(monitor.state(), AlertState::Alarming);
            }
            outcome.transition
        })
        .collect();

    assert_eq!(
        transitions,
        vec![
            AlertTransition::NoOp,
            AlertTransition::NoOp,
            AlertTransition::Start,
            AlertTransition::Stop,
            AlertTransition::NoOp,
        ]
    );
    assert!(!alarm.is_playing());
    assert_eq!(monitor.state(), AlertState::Idle);

    let snapshot = alarm.diagnostics_snapshot();
    assert_eq!(snapshot.sessions_started, 1);

    let mut seen = Vec::new();
    while let Ok(ev) = events.try_recv() {
        seen.push((ev.frame_index, ev.transition));
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[2], (2, AlertTransition::Start));
}

#[test]
fn unsampled_frames_never_reach_the_detector() {
    let adapter = Arc::new(DetectionAdapter::new(
        DetectorHandle::new(StubDetector::fixed(vec![raw("fire", 0.9)])),
        AcceptancePolicy::fire(),
    ));
    let monitor = FrameMonitor::new(EngineConfig::default(), adapter.clone(), alarm())
        .expect("monitor");

    let checked: Vec<u64> = (0..10)
        .map(|i| monitor.process_frame(&frame(i)))
        .filter(|o| o.checked)
        .map(|o| o.frame_index)
        .collect();
    assert_eq!(checked, vec![0, 3, 6, 9]);
    assert_eq!(adapter.diagnostics().snapshot().calls, 4);

    let diag = monitor.diagnostics().snapshot();
    assert_eq!(diag.frames_seen, 10);
    assert_eq!(diag.frames_checked, 4);
    assert_eq!(diag.frames_skipped, 6);
    monitor.silence();
}

#[test]
fn non_fire_labels_do_not_raise_the_alarm() {
    let adapter = Arc::new(DetectionAdapter::new(
        DetectorHandle::new(StubDetector::fixed(vec![raw("person", 0.5), raw("car", 0.6)])),
        AcceptancePolicy::fire(),
    ));
    let alarm = alarm();
    let monitor = FrameMonitor::new(
        EngineConfig {
            sampling_interval: 1,
            ..EngineConfig::default()
        },
        adapter,
        alarm.clone(),
    )
    .expect("monitor");

    for i in 0..4 {
        let outcome = monitor.process_frame(&frame(i));
        assert!(outcome.detections.is_empty());
        assert_eq!(outcome.transition, AlertTransition::NoOp);
    }
    assert!(!alarm.is_playing());
}

#[test]
fn silence_clears_an_active_alert() {
    let adapter = Arc::new(DetectionAdapter::new(
        DetectorHandle::new(StubDetector::default()),
        AcceptancePolicy::fire(),
    ));
    let alarm = alarm();
    let monitor = FrameMonitor::new(EngineConfig::default(), adapter, alarm.clone())
        .expect("monitor");

    let outcome = monitor.observe_checked(42, vec![raw("smoke", 0.4)]);
    assert_eq!(outcome.transition, AlertTransition::Start);
    assert!(alarm.is_playing());

    assert_eq!(monitor.silence(), AlertTransition::Stop);
    assert!(!alarm.is_playing());
    assert_eq!(monitor.state(), AlertState::Idle);
}

// ── One-shot security alerts ────────────────────────────────────────────────

struct FailingSynth;

impl SpeechSynthesizer for FailingSynth {
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    fn synthesize(&mut self, _text: &str) -> Result<SynthesizedSpeech> {
        Err(VigilError::Synthesis("voice model crashed".into()))
    }
}

fn threat_adapter(response: Vec<RawDetection>) -> DetectionAdapter {
    DetectionAdapter::new(
        DetectorHandle::new(StubDetector::fixed(response)),
        AcceptancePolicy::threat(),
    )
}

#[test]
fn security_alert_carries_text_and_wav_audio() {
    let adapter = threat_adapter(vec![raw("knife", 0.8), raw("person", 0.9), raw("gun", 0.6)]);
    let composer = AlertComposer::new(Some(SynthHandle::new(ToneSynthesizer::default())));
    let meta = SituationalMetadata::zone("Lobby");

    let payload = composer.process_security_alert(
        &adapter,
        &ImageInput::Path(PathBuf::from("lobby.jpg")),
        &meta,
        0.3,
    );

    assert!(payload.has_threat);
    let labels: Vec<&str> = payload.threats.iter().map(|t| t.label.as_str()).collect();
    assert_eq!(labels, vec!["knife", "gun"]);
    assert_eq!(
        payload.alert_text,
        "Attention security. Activity detected near Lobby. Possible knife and gun detected. \
         Please respond immediately."
    );
    assert_eq!(payload.audio.mime_type, "audio/wav");
    assert!(!payload.audio.is_empty());

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&payload.audio.base64)
        .expect("valid base64");
    let clip = decode_bytes(&bytes).expect("valid wav");
    assert_eq!(clip.sample_rate, vigil_core::speech::SPEECH_SAMPLE_RATE);
    assert!(!clip.samples.is_empty());
}

#[test]
fn security_alert_degrades_to_text_when_speech_fails() {
    let adapter = threat_adapter(vec![raw("pistol", 0.7)]);
    let composer = AlertComposer::new(Some(SynthHandle::new(FailingSynth)));
    let meta = SituationalMetadata {
        zone_name: "Gate 2".into(),
        vehicle_color: Some("red".into()),
        vehicle_type: Some("truck".into()),
        plate_number: Some("AB123".into()),
    };

    let payload = composer.process_security_alert(
        &adapter,
        &ImageInput::Path(PathBuf::from("gate.jpg")),
        &meta,
        0.3,
    );

    assert!(payload.has_threat);
    assert_eq!(
        payload.alert_text,
        "Attention security. red truck near Gate 2, plate AB123. Possible pistol detected. \
         Please respond immediately."
    );
    assert!(payload.audio.is_empty());
}

#[test]
fn security_alert_without_threats_is_empty() {
    let adapter = threat_adapter(vec![raw("person", 0.95)]);
    let composer = AlertComposer::new(Some(SynthHandle::new(ToneSynthesizer::default())));

    let payload = composer.process_security_alert(
        &adapter,
        &ImageInput::Path(PathBuf::from("hall.jpg")),
        &SituationalMetadata::default(),
        0.3,
    );

    assert!(!payload.has_threat);
    assert!(payload.threats.is_empty());
    assert!(payload.alert_text.is_empty());
    assert!(payload.audio.is_empty());
}
