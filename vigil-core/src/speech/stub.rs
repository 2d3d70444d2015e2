//! `ToneSynthesizer`: placeholder TTS that renders one beep per word.
//!
//! Stands in for a real voice model on hosts without one, so the alert
//! payload path (normalize → resample → WAV → base64) is exercised end to end.

use tracing::debug;

use crate::error::{Result, VigilError};
use crate::speech::{SpeechSamples, SpeechSynthesizer, SynthesizedSpeech};

const TONE_MS: u32 = 120;
const GAP_MS: u32 = 40;
const AMPLITUDE: f32 = 0.3;

/// Produces i16 samples at `sample_rate` (default 16 kHz, so packaging has to
/// resample).
pub struct ToneSynthesizer {
    sample_rate: u32,
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self::new(16_000)
    }
}

impl SpeechSynthesizer for ToneSynthesizer {
    fn warm_up(&mut self) -> Result<()> {
        debug!("ToneSynthesizer::warm_up: no-op");
        Ok(())
    }

    fn synthesize(&mut self, text: &str) -> Result<SynthesizedSpeech> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Err(VigilError::Synthesis("nothing to say".into()));
        }

        let rate = self.sample_rate as f32;
        let tone_len = (self.sample_rate * TONE_MS / 1000) as usize;
        let gap_len = (self.sample_rate * GAP_MS / 1000) as usize;
        let mut samples = Vec::with_capacity(words.len() * (tone_len + gap_len));

        for word in &words {
            // Pitch varies with word length: 440 Hz + 40 Hz per char, capped.
            let freq = 440.0 + 40.0 * word.chars().count().min(12) as f32;
            samples.extend((0..tone_len).map(|i| {
                let v = (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * AMPLITUDE;
                (v * i16::MAX as f32) as i16
            }));
            samples.extend(std::iter::repeat(0i16).take(gap_len));
        }

        debug!(words = words.len(), samples = samples.len(), "ToneSynthesizer::synthesize");
        Ok(SynthesizedSpeech {
            samples: SpeechSamples::I16(samples),
            sample_rate: self.sample_rate,
        })
    }
}
