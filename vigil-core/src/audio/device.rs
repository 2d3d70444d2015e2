//! Audio output device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
    /// Heuristic flag for outputs nobody is likely to hear (virtual sinks,
    /// HDMI ports on a headless NVR, ...).
    pub is_virtual_like: bool,
}

const VIRTUAL_KEYWORDS: &[&str] = &[
    "virtual",
    "null",
    "dummy",
    "loopback",
    "cable input",
    "monitor of",
    "hdmi",
    "displayport",
];

/// Best-effort heuristic for outputs that are not a real speaker.
pub fn is_virtual_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    VIRTUAL_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// List all available audio output devices, default first.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        is_virtual_like: is_virtual_like_name(&name),
                        name,
                    }
                })
                .collect::<Vec<_>>();
            list.sort_by_key(|d| (!d.is_default, d.is_virtual_like, d.name.to_ascii_lowercase()));
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            default_name
                .map(|name| {
                    vec![DeviceInfo {
                        is_virtual_like: is_virtual_like_name(&name),
                        name,
                        is_default: true,
                    }]
                })
                .unwrap_or_default()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}
