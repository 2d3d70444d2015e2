//! Alarm asset decoding.
//!
//! `.wav` files go through `hound` ([`super::wav`]). Everything else (MP3,
//! FLAC, OGG/Vorbis, or a WAV under another name) is identified by content and decoded with
//! `symphonia`. Both paths produce the same mono [`Clip`].

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::wav::{self, Clip};
use crate::error::{Result, VigilError};

/// Decode an alarm asset of any supported container to mono f32.
///
/// # Errors
/// `VigilError::AssetUnavailable` when the file does not exist,
/// `VigilError::Wav` / `VigilError::Codec` when it cannot be decoded.
pub fn decode_asset(path: &Path) -> Result<Clip> {
    if !path.is_file() {
        return Err(VigilError::AssetUnavailable {
            path: path.to_path_buf(),
        });
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("wav") | Some("wave") => wav::decode_file(path),
        other => decode_compressed(path, other),
    }
}

fn decode_compressed(path: &Path, extension: Option<&str>) -> Result<Clip> {
    let codec_err = |e: SymphoniaError| VigilError::Codec(format!("{}: {e}", path.display()));

    let file = File::open(path)?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let opened = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(codec_err)?;
    let mut format = opened.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| VigilError::Codec(format!("{}: no audio track", path.display())))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(codec_err)?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(codec_err(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                warn!(path = %path.display(), "skipping undecodable packet: {msg}");
                continue;
            }
            Err(e) => return Err(codec_err(e)),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        if sample_rate.is_none() {
            sample_rate = Some(spec.rate);
        }

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend(
            buf.samples()
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    let sample_rate = sample_rate
        .filter(|&rate| rate > 0)
        .ok_or_else(|| VigilError::Codec(format!("{}: unknown sample rate", path.display())))?;
    if samples.is_empty() {
        return Err(VigilError::Codec(format!(
            "{}: no audio decoded",
            path.display()
        )));
    }
    debug!(path = %path.display(), samples = samples.len(), sample_rate, "asset decoded");
    Ok(Clip {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vigil-codec-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn missing_mp3_is_asset_unavailable() {
        let err = decode_asset(Path::new("/nonexistent/vigil/siren.mp3")).unwrap_err();
        assert!(err.is_asset_unavailable());
    }

    #[test]
    fn wav_extension_uses_hound() {
        let path = scratch("siren.wav");
        std::fs::write(&path, wav::encode_pcm16(&[0.5; 64], 16_000).unwrap()).unwrap();
        let clip = decode_asset(&path).unwrap();
        assert_eq!(clip.sample_rate, 16_000);
        assert_eq!(clip.samples.len(), 64);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn other_extensions_are_detected_by_content() {
        let path = scratch("siren.alarm");
        std::fs::write(&path, wav::encode_pcm16(&[0.25; 480], 22_050).unwrap()).unwrap();
        let clip = decode_asset(&path).unwrap();
        assert_eq!(clip.sample_rate, 22_050);
        assert_eq!(clip.samples.len(), 480);
        assert!((clip.samples[0] - 0.25).abs() < 1e-3);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn garbage_mp3_is_a_codec_error() {
        let path = scratch("broken.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();
        let err = decode_asset(&path).unwrap_err();
        assert!(matches!(err, VigilError::Codec(_)), "got {err:?}");
        assert!(!err.is_asset_unavailable());
        let _ = std::fs::remove_file(path);
    }
}
