//! `AlertComposer`: alert sentence, speech request and payload packaging.
//!
//! ```text
//! threats + metadata ─► build_alert_text ─► synthesize_and_package ─► AlertPayload
//!                                              │ (TTS fails)
//!                                              └─► text-only alert, empty audio
//! ```

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio::resample::convert_clip;
use crate::audio::wav::{encode_pcm16, WAV_MIME};
use crate::detect::{Detection, DetectionAdapter, ImageInput};
use crate::error::{Result, VigilError};
use crate::ipc::events::{AlertPayload, AudioPayload};
use crate::speech::{SynthHandle, SPEECH_SAMPLE_RATE};

/// Used when the caller does not name a zone.
const FALLBACK_ZONE: &str = "the monitored area";

/// Labels listed in a fire summary before collapsing into "and N more".
const SUMMARY_LABELS: usize = 3;

/// What the camera knows about the scene besides the detections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SituationalMetadata {
    pub zone_name: String,
    pub vehicle_color: Option<String>,
    pub vehicle_type: Option<String>,
    pub plate_number: Option<String>,
}

impl SituationalMetadata {
    pub fn zone(zone_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
            ..Self::default()
        }
    }
}

/// Encoded speech ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// One composed alert. `audio` is `None` for a degraded (text-only) alert.
#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub threats: Vec<Detection>,
    pub alert_text: String,
    pub audio: Option<EncodedAudio>,
}

impl AlertRecord {
    pub fn is_degraded(&self) -> bool {
        self.audio.is_none()
    }

    pub fn into_payload(self) -> AlertPayload {
        let audio = match self.audio {
            Some(encoded) => AudioPayload {
                base64: base64::engine::general_purpose::STANDARD.encode(&encoded.bytes),
                mime_type: encoded.mime_type,
            },
            None => AudioPayload::empty(),
        };
        AlertPayload {
            has_threat: !self.threats.is_empty(),
            threats: self.threats,
            alert_text: self.alert_text,
            audio,
        }
    }
}

/// Build the spoken alert sentence. Pure and deterministic.
///
/// `"Attention security."`, then the subject (vehicle description or
/// `"Activity detected near <zone>."`), then the threat clause over unique
/// lowercase labels in first-seen order, then `"Please respond immediately."`.
pub fn build_alert_text(threats: &[Detection], metadata: &SituationalMetadata) -> String {
    let mut parts: Vec<String> = vec!["Attention security.".to_string()];
    parts.push(subject_sentence(metadata));
    if let Some(clause) = threat_clause(threats) {
        parts.push(clause);
    }
    parts.push("Please respond immediately.".to_string());
    parts.join(" ")
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn subject_sentence(metadata: &SituationalMetadata) -> String {
    let zone = match metadata.zone_name.trim() {
        "" => FALLBACK_ZONE,
        z => z,
    };
    let color = present(&metadata.vehicle_color);
    let kind = present(&metadata.vehicle_type);
    let plate = present(&metadata.plate_number);

    let vehicle = match (color, kind) {
        (Some(c), Some(k)) => Some(format!("{c} {k}")),
        (Some(c), None) => Some(format!("{c} vehicle")),
        (None, Some(k)) => Some(k.to_string()),
        (None, None) => plate.map(|_| "vehicle".to_string()),
    };

    match (vehicle, plate) {
        (Some(v), Some(p)) => format!("{v} near {zone}, plate {p}."),
        (Some(v), None) => format!("{v} near {zone}."),
        (None, _) => format!("Activity detected near {zone}."),
    }
}

fn threat_clause(threats: &[Detection]) -> Option<String> {
    let mut labels: Vec<String> = Vec::new();
    for t in threats {
        let label = t.label.trim().to_lowercase();
        if !label.is_empty() && !labels.contains(&label) {
            labels.push(label);
        }
    }
    match labels.as_slice() {
        [] => None,
        [only] => Some(format!("Possible {only} detected.")),
        [init @ .., last] => Some(format!("Possible {} and {last} detected.", init.join(", "))),
    }
}

/// One-line operator summary for a fire alert; `None` when `fires` is empty.
///
/// `"[FIRE DETECTED] at Gate 2 (Plate: AB123): fire, smoke, flame and 2 more"`
pub fn fire_alert_summary(zone_name: &str, plate: Option<&str>, fires: &[Detection]) -> Option<String> {
    if fires.is_empty() {
        return None;
    }
    let mut msg = format!("[FIRE DETECTED] at {zone_name}");
    if let Some(p) = plate.map(str::trim).filter(|p| !p.is_empty()) {
        msg.push_str(&format!(" (Plate: {p})"));
    }
    let labels: Vec<&str> = fires
        .iter()
        .take(SUMMARY_LABELS)
        .map(|f| f.label.as_str())
        .collect();
    msg.push_str(&format!(": {}", labels.join(", ")));
    if fires.len() > SUMMARY_LABELS {
        msg.push_str(&format!(" and {} more", fires.len() - SUMMARY_LABELS));
    }
    Some(msg)
}

pub struct AlertComposer {
    synth: Option<SynthHandle>,
    output_rate: u32,
}

impl AlertComposer {
    pub fn new(synth: Option<SynthHandle>) -> Self {
        Self {
            synth,
            output_rate: SPEECH_SAMPLE_RATE,
        }
    }

    pub fn with_output_rate(mut self, rate: u32) -> Self {
        self.output_rate = rate;
        self
    }

    /// Forward to the synthesizer's one-time warm-up, if one is configured.
    pub fn warm_up(&self) -> Result<()> {
        match &self.synth {
            Some(synth) => synth.0.lock().warm_up(),
            None => Ok(()),
        }
    }

    /// Speak `text` and encode it as a 16-bit WAV at the output rate.
    ///
    /// # Errors
    /// `VigilError::Synthesis` when no synthesizer is configured, the engine
    /// fails, or it returns no audio.
    pub fn synthesize_and_package(&self, text: &str) -> Result<EncodedAudio> {
        let synth = self
            .synth
            .as_ref()
            .ok_or_else(|| VigilError::Synthesis("no speech synthesizer configured".into()))?;

        let speech = synth.0.lock().synthesize(text)?;
        if speech.is_empty() || speech.sample_rate == 0 {
            return Err(VigilError::Synthesis("synthesizer returned no audio".into()));
        }

        let samples = convert_clip(&speech.to_f32(), speech.sample_rate, self.output_rate)?;
        let bytes = encode_pcm16(&samples, self.output_rate)?;
        Ok(EncodedAudio {
            bytes,
            mime_type: WAV_MIME.to_string(),
        })
    }

    /// Compose text and audio for `threats`. Speech failure degrades to a
    /// text-only record; it is never an error.
    pub fn compose(&self, threats: Vec<Detection>, metadata: &SituationalMetadata) -> AlertRecord {
        let alert_text = build_alert_text(&threats, metadata);
        let audio = match self.synthesize_and_package(&alert_text) {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!("speech synthesis failed; sending text-only alert: {e}");
                None
            }
        };
        AlertRecord {
            threats,
            alert_text,
            audio,
        }
    }

    /// Detect threats in one still image and build the alert payload.
    ///
    /// No accepted detections → [`AlertPayload::empty`].
    pub fn process_security_alert(
        &self,
        adapter: &DetectionAdapter,
        image: &ImageInput,
        metadata: &SituationalMetadata,
        confidence_floor: f32,
    ) -> AlertPayload {
        let threats = adapter.classify(image, confidence_floor);
        if threats.is_empty() {
            return AlertPayload::empty();
        }
        let record = self.compose(threats, metadata);
        info!(
            zone = %metadata.zone_name,
            threats = record.threats.len(),
            degraded = record.is_degraded(),
            "security alert composed"
        );
        record.into_payload()
    }
}

impl std::fmt::Debug for AlertComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertComposer")
            .field("has_synth", &self.synth.is_some())
            .field("output_rate", &self.output_rate)
            .finish()
    }
}
