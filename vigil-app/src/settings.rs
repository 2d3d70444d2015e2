//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use vigil_core::{AlarmConfig, EngineConfig, RetriggerPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_output_device: Option<String>,
    pub alarm_sound: Option<PathBuf>,
    pub alarm_volume: f32,
    pub alarm_auto_stop_minutes: f64,
    pub fire_detection_interval: u32,
    pub fire_confidence_threshold: f32,
    pub still_confidence_threshold: f32,
    pub threat_confidence_threshold: f32,
    pub enable_fire_detection: bool,
    pub retrigger: RetriggerPolicy,
    /// YOLO weights for the fire model. Unset or missing → stub detector.
    pub detector_model: Option<PathBuf>,
    /// YOLO weights for the weapon model.
    pub threat_model: Option<PathBuf>,
    /// JSON acceptance policy replacing the built-in fire keywords.
    pub fire_policy: Option<PathBuf>,
    pub speech_enabled: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_output_device: None,
            alarm_sound: None,
            alarm_volume: 1.0,
            alarm_auto_stop_minutes: 5.0,
            fire_detection_interval: 3,
            fire_confidence_threshold: 0.15,
            still_confidence_threshold: 0.25,
            threat_confidence_threshold: 0.3,
            enable_fire_detection: true,
            retrigger: RetriggerPolicy::Suppress,
            detector_model: None,
            threat_model: None,
            fire_policy: None,
            speech_enabled: true,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.preferred_output_device = trimmed(self.preferred_output_device.take());
        self.alarm_sound = nonempty_path(self.alarm_sound.take());
        self.detector_model = nonempty_path(self.detector_model.take());
        self.threat_model = nonempty_path(self.threat_model.take());
        self.fire_policy = nonempty_path(self.fire_policy.take());

        self.alarm_volume = finite_or(self.alarm_volume, 1.0).clamp(0.0, 1.0);
        self.alarm_auto_stop_minutes = if self.alarm_auto_stop_minutes.is_finite() {
            self.alarm_auto_stop_minutes.clamp(0.1, 120.0)
        } else {
            5.0
        };
        self.fire_detection_interval = self.fire_detection_interval.clamp(1, 600);
        self.fire_confidence_threshold = finite_or(self.fire_confidence_threshold, 0.15).clamp(0.0, 1.0);
        self.still_confidence_threshold =
            finite_or(self.still_confidence_threshold, 0.25).clamp(0.0, 1.0);
        self.threat_confidence_threshold =
            finite_or(self.threat_confidence_threshold, 0.3).clamp(0.0, 1.0);
    }

    /// Apply `VIGIL_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parsed(&lookup, "VIGIL_FIRE_DETECTION_INTERVAL") {
            self.fire_detection_interval = v;
        }
        if let Some(v) = parsed(&lookup, "VIGIL_FIRE_CONFIDENCE_THRESHOLD") {
            self.fire_confidence_threshold = v;
        }
        if let Some(raw) = lookup("VIGIL_ENABLE_FIRE_DETECTION") {
            match parse_flag(&raw) {
                Some(flag) => self.enable_fire_detection = flag,
                None => warn!(value = %raw, "ignoring VIGIL_ENABLE_FIRE_DETECTION"),
            }
        }
        if let Some(v) = parsed(&lookup, "VIGIL_ALARM_AUTO_STOP_MINUTES") {
            self.alarm_auto_stop_minutes = v;
        }
        if let Some(v) = parsed(&lookup, "VIGIL_ALARM_VOLUME") {
            self.alarm_volume = v;
        }
        if let Some(v) = lookup("VIGIL_ALARM_SOUND") {
            self.alarm_sound = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VIGIL_DETECTOR_MODEL") {
            self.detector_model = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VIGIL_THREAT_MODEL") {
            self.threat_model = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("VIGIL_FIRE_POLICY") {
            self.fire_policy = Some(PathBuf::from(v));
        }
        if let Some(v) = parsed(&lookup, "VIGIL_THREAT_CONFIDENCE_THRESHOLD") {
            self.threat_confidence_threshold = v;
        }
        self.normalize();
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sampling_interval: self.fire_detection_interval,
            video_confidence_floor: self.fire_confidence_threshold,
            still_confidence_floor: self.still_confidence_threshold,
            threat_confidence_floor: self.threat_confidence_threshold,
            enable_fire_detection: self.enable_fire_detection,
            retrigger: self.retrigger,
        }
    }

    pub fn alarm_config(&self) -> AlarmConfig {
        AlarmConfig {
            sound_path: self.alarm_sound.clone(),
            volume: self.alarm_volume,
            auto_stop: Duration::from_secs_f64(self.alarm_auto_stop_minutes * 60.0),
            ..AlarmConfig::default()
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn nonempty_path(value: Option<PathBuf>) -> Option<PathBuf> {
    value.filter(|p| !p.as_os_str().is_empty())
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable override");
            None
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Vigil")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("vigil")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "settings file unreadable, using defaults: {e}");
            AppSettings::default()
        }),
        Err(_) => AppSettings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
