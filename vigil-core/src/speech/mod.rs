//! Speech synthesis abstraction.
//!
//! The `SpeechSynthesizer` trait decouples alert composition from any specific
//! TTS engine. Engines hand back raw samples in whatever format they produce;
//! [`SynthesizedSpeech::to_f32`] normalizes them before packaging.
//!
//! Synthesis is slow and is never called from the frame path.

pub mod stub;

pub use stub::ToneSynthesizer;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Sample rate every speech payload is converted to before encoding.
pub const SPEECH_SAMPLE_RATE: u32 = 22_050;

/// Raw TTS output in the engine's native sample format.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechSamples {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedSpeech {
    pub samples: SpeechSamples,
    pub sample_rate: u32,
}

impl SynthesizedSpeech {
    /// Mono f32 in [-1, 1]; i16 input is scaled by 1/32768.
    pub fn to_f32(&self) -> Vec<f32> {
        match &self.samples {
            SpeechSamples::F32(s) => s.clone(),
            SpeechSamples::I16(s) => s.iter().map(|&v| v as f32 / 32768.0).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.samples {
            SpeechSamples::F32(s) => s.len(),
            SpeechSamples::I16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Contract for text-to-speech backends.
pub trait SpeechSynthesizer: Send + 'static {
    /// One-time warm-up: load the voice model. Called once, before the first
    /// `synthesize`.
    fn warm_up(&mut self) -> Result<()>;

    /// Render `text` as mono audio.
    ///
    /// # Errors
    /// `VigilError::Synthesis` when the engine fails or returns no audio.
    fn synthesize(&mut self, text: &str) -> Result<SynthesizedSpeech>;
}

/// Thread-safe reference-counted handle to any `SpeechSynthesizer` implementor.
#[derive(Clone)]
pub struct SynthHandle(pub Arc<Mutex<dyn SpeechSynthesizer>>);

impl SynthHandle {
    pub fn new<S: SpeechSynthesizer>(synth: S) -> Self {
        Self(Arc::new(Mutex::new(synth)))
    }
}

impl std::fmt::Debug for SynthHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthHandle").finish_non_exhaustive()
    }
}
