use thiserror::Error;

/// All errors produced by vigil-core.
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("asset not found: {path}")]
    AssetUnavailable { path: std::path::PathBuf },

    #[error("no alarm sound configured")]
    NoAlarmSound,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("playback error: {0}")]
    Playback(String),

    #[error("detection error: {0}")]
    Detection(String),

    #[error("malformed detector output: {0}")]
    MalformedOutput(String),

    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("WAV codec error: {0}")]
    Wav(#[from] hound::Error),

    #[error("audio codec error: {0}")]
    Codec(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VigilError {
    /// `true` for failures caused by a missing or unloadable asset (sound file,
    /// model weights). Callers degrade the feature instead of surfacing these.
    pub fn is_asset_unavailable(&self) -> bool {
        matches!(
            self,
            VigilError::AssetUnavailable { .. } | VigilError::NoAlarmSound
        )
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;
