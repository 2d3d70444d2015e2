//! WAV decoding (alarm assets) and in-memory encoding (speech payloads).

use std::io::Cursor;
use std::path::Path;

use crate::error::{Result, VigilError};

/// MIME type of everything produced by [`encode_pcm16`].
pub const WAV_MIME: &str = "audio/wav";

/// A decoded mono clip.
#[derive(Debug, Clone)]
pub struct Clip {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Clip {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Read a WAV file from disk and downmix it to mono f32.
///
/// # Errors
/// `VigilError::AssetUnavailable` when the file does not exist,
/// `VigilError::Wav` when it is not a readable WAV stream.
pub fn decode_file(path: &Path) -> Result<Clip> {
    if !path.is_file() {
        return Err(VigilError::AssetUnavailable {
            path: path.to_path_buf(),
        });
    }
    let reader = hound::WavReader::open(path)?;
    decode_reader(reader)
}

/// Decode WAV bytes already in memory.
pub fn decode_bytes(bytes: &[u8]) -> Result<Clip> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    decode_reader(reader)
}

fn decode_reader<R: std::io::Read>(mut reader: hound::WavReader<R>) -> Result<Clip> {
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            // hound yields each sample in its native range (i8 for 8-bit).
            let full_scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(Clip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Encode mono f32 samples as a 16-bit PCM WAV byte stream.
pub fn encode_pcm16(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer.write_sample(v)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_stream_has_riff_header() {
        let bytes = encode_pcm16(&[0.0, 0.5, -0.5], 16_000).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + 3 * 2);
    }

    #[test]
    fn decode_reads_back_encoded_samples() {
        let bytes = encode_pcm16(&[0.25; 160], 22_050).unwrap();
        let clip = decode_bytes(&bytes).unwrap();
        assert_eq!(clip.sample_rate, 22_050);
        assert_eq!(clip.samples.len(), 160);
        assert!((clip.samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn out_of_range_samples_are_clipped() {
        let bytes = encode_pcm16(&[4.0, -4.0], 8_000).unwrap();
        let clip = decode_bytes(&bytes).unwrap();
        assert!(clip.samples[0] > 0.99);
        assert!(clip.samples[1] < -0.99);
    }

    #[test]
    fn missing_file_is_asset_unavailable() {
        let err = decode_file(Path::new("/nonexistent/vigil/alarm.wav")).unwrap_err();
        assert!(err.is_asset_unavailable());
    }

    fn int_wav(bits: u16, samples: &[i32]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &v in samples {
                writer.write_sample(v).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn eight_bit_samples_use_full_scale() {
        let clip = decode_bytes(&int_wav(8, &[100, -128, 0])).unwrap();
        assert!((clip.samples[0] - 100.0 / 128.0).abs() < 1e-6);
        assert_eq!(clip.samples[1], -1.0);
        assert_eq!(clip.samples[2], 0.0);
    }

    #[test]
    fn twenty_four_bit_samples_use_full_scale() {
        let clip = decode_bytes(&int_wav(24, &[4_194_304])).unwrap();
        assert!((clip.samples[0] - 0.5).abs() < 1e-6);
    }
}
