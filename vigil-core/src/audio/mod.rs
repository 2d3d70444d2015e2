//! Alarm audio output via cpal backend.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It **must not** block on a mutex, perform I/O, or decode audio. Clips are
//! therefore decoded and resampled to the device rate in [`CpalOutput::load`]
//! on the calling thread; the callback only copies from the current clip,
//! using `try_lock` so a concurrent `load` produces one buffer of silence
//! instead of a stall.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `CpalOutput` owns a dedicated thread that creates the stream, keeps
//! it alive, and drops it on shutdown. Everything else talks to the callback
//! through [`PlaybackShared`] atomics, so `CpalOutput` itself is `Send` and can
//! live behind a [`BackendHandle`](crate::alarm::backend::BackendHandle).

pub mod codec;
pub mod device;
pub mod resample;
pub mod wav;

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::alarm::backend::{PlaybackBackend, Silencer};
use crate::error::{Result, VigilError};

/// Playback position packed into one atomic word: generation (31 bits), busy
/// flag (1 bit), cursor (32 bits). `play`, `stop` and `load` bump the
/// generation, so a render that started before them cannot commit over them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    generation: u32,
    busy: bool,
    cursor: u32,
}

impl Position {
    const BUSY_BIT: u64 = 1 << 32;
    const GENERATION_MASK: u32 = (1 << 31) - 1;

    fn from_bits(bits: u64) -> Self {
        Self {
            generation: (bits >> 33) as u32,
            busy: bits & Self::BUSY_BIT != 0,
            cursor: bits as u32,
        }
    }

    fn to_bits(self) -> u64 {
        (u64::from(self.generation & Self::GENERATION_MASK) << 33)
            | if self.busy { Self::BUSY_BIT } else { 0 }
            | u64::from(self.cursor)
    }
}

/// State shared between `CpalOutput` and the real-time output callback.
pub struct PlaybackShared {
    /// Current clip, mono, already at the device sample rate.
    clip: Mutex<Arc<Vec<f32>>>,
    /// Packed [`Position`].
    position: AtomicU64,
    /// `f32` volume stored as raw bits.
    volume_bits: AtomicU32,
}

impl PlaybackShared {
    fn new() -> Self {
        Self {
            clip: Mutex::new(Arc::new(Vec::new())),
            position: AtomicU64::new(0),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    fn position(&self) -> Position {
        Position::from_bits(self.position.load(Ordering::Acquire))
    }

    fn is_busy(&self) -> bool {
        self.position().busy
    }

    /// Start a new pass over the clip (`busy`) or go idle, from sample 0.
    fn rewind(&self, busy: bool) {
        let _ = self
            .position
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let current = Position::from_bits(bits);
                Some(
                    Position {
                        generation: current.generation.wrapping_add(1),
                        busy,
                        cursor: 0,
                    }
                    .to_bits(),
                )
            });
    }

    /// Store the cursor reached by a render that started at `observed`.
    /// Returns `false` when a `play`/`stop` landed in between and won.
    fn commit(&self, observed: Position, cursor: usize, clip_len: usize) -> bool {
        let next = Position {
            generation: observed.generation,
            busy: cursor < clip_len,
            cursor: u32::try_from(cursor).unwrap_or(u32::MAX),
        };
        self.position
            .compare_exchange(
                observed.to_bits(),
                next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Fill one interleaved output buffer. Called from the audio thread.
    fn render<T: Copy>(&self, out: &mut [T], channels: usize, silence: T, convert: impl Fn(f32) -> T) {
        let observed = self.position();
        if !observed.busy {
            out.fill(silence);
            return;
        }
        let Some(clip) = self.clip.try_lock().map(|c| Arc::clone(&c)) else {
            out.fill(silence);
            return;
        };

        let volume = f32::from_bits(self.volume_bits.load(Ordering::Relaxed));
        let mut cursor = observed.cursor as usize;
        for frame in out.chunks_mut(channels.max(1)) {
            let value = match clip.get(cursor) {
                Some(sample) => {
                    cursor += 1;
                    convert((sample * volume).clamp(-1.0, 1.0))
                }
                None => silence,
            };
            frame.fill(value);
        }
        self.commit(observed, cursor, clip.len());
    }

    /// Lock-free mute, shared with [`Silencer`].
    fn halt(&self) {
        self.rewind(false);
    }
}

/// Alarm playback backend rendering through the system audio output.
pub struct CpalOutput {
    shared: Arc<PlaybackShared>,
    /// Actual output sample rate reported by the device (Hz).
    pub sample_rate: u32,
    /// Path of the clip currently held in `shared`, to skip re-decoding on loop.
    loaded: Option<PathBuf>,
    shutdown_tx: Option<crossbeam_channel::Sender<()>>,
    stream_thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open an output device by preferred name, otherwise fall back to the
    /// default output device and then the first available one.
    ///
    /// Blocks until the stream thread confirms the device is open.
    ///
    /// # Errors
    /// `VigilError::NoDefaultOutputDevice` when no speaker is available,
    /// `VigilError::AudioStream` if cpal fails to build the stream.
    pub fn open(preferred_device_name: Option<&str>) -> Result<Self> {
        let shared = Arc::new(PlaybackShared::new());
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_shared = Arc::clone(&shared);
        let preferred = preferred_device_name.map(str::to_string);
        let stream_thread = std::thread::Builder::new()
            .name("vigil-audio-out".into())
            .spawn(move || {
                // The stream must be created and dropped on this thread.
                let stream = match open_stream(thread_shared, preferred.as_deref()) {
                    Ok((stream, rate)) => {
                        let _ = open_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                // Park until shutdown (or the sender is dropped).
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("audio output stream released");
            })?;

        match open_rx.recv() {
            Ok(Ok(sample_rate)) => Ok(Self {
                shared,
                sample_rate,
                loaded: None,
                shutdown_tx: Some(shutdown_tx),
                stream_thread: Some(stream_thread),
            }),
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                Err(e)
            }
            Err(_) => Err(VigilError::Other(anyhow::anyhow!(
                "audio output thread died unexpectedly"
            ))),
        }
    }
}

impl PlaybackBackend for CpalOutput {
    fn load(&mut self, path: &Path) -> Result<()> {
        if self.loaded.as_deref() == Some(path) {
            self.shared.rewind(false);
            return Ok(());
        }

        let clip = codec::decode_asset(path)?;
        let samples = resample::convert_clip(&clip.samples, clip.sample_rate, self.sample_rate)?;
        info!(
            path = %path.display(),
            source_rate = clip.sample_rate,
            device_rate = self.sample_rate,
            seconds = clip.duration_secs(),
            "alarm clip loaded"
        );

        self.shared.rewind(false);
        *self.shared.clip.lock() = Arc::new(samples);
        self.loaded = Some(path.to_path_buf());
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if self.shared.clip.lock().is_empty() {
            return Err(VigilError::Playback("no clip loaded".into()));
        }
        self.shared.rewind(true);
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.shared.is_busy()
    }

    fn stop(&mut self) {
        self.shared.halt();
    }

    fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 1.0 };
        self.shared.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    fn silencer(&self) -> Option<Silencer> {
        let shared = Arc::clone(&self.shared);
        Some(Silencer::new(move || shared.halt()))
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(feature = "audio-cpal")]
fn open_stream(
    shared: Arc<PlaybackShared>,
    preferred_device_name: Option<&str>,
) -> Result<(cpal::Stream, u32)> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate, StreamConfig};
    use tracing::{error, warn};

    let host = cpal::default_host();
    let mut selected_device = None;

    if let Some(preferred_name) = preferred_device_name {
        match host.output_devices() {
            Ok(mut devices) => {
                selected_device = devices.find(|device| {
                    device
                        .name()
                        .map(|name| name == preferred_name)
                        .unwrap_or(false)
                });
                if selected_device.is_none() {
                    warn!(
                        "preferred output device '{}' not found, falling back",
                        preferred_name
                    );
                }
            }
            Err(e) => {
                warn!("failed to list output devices while resolving preference: {e}");
            }
        }
    }

    let device = if let Some(device) = selected_device {
        device
    } else if let Some(default) = host.default_output_device() {
        default
    } else {
        let mut devices = host
            .output_devices()
            .map_err(|e| VigilError::AudioDevice(e.to_string()))?;
        let fallback = devices.next().ok_or(VigilError::NoDefaultOutputDevice)?;
        warn!("no default output device, falling back to first available output");
        fallback
    };

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| VigilError::AudioDevice(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    info!(sample_rate, channels, "audio output config selected");

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let ch = channels as usize;

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _info| shared.render(data, ch, 0.0, |v| v),
            |err| error!("audio output stream error: {err}"),
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _info| {
                shared.render(data, ch, 0, |v| (v * i16::MAX as f32) as i16)
            },
            |err| error!("audio output stream error: {err}"),
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            &config,
            move |data: &mut [u16], _info| {
                shared.render(data, ch, 32768, |v| ((v + 1.0) * 32767.5) as u16)
            },
            |err| error!("audio output stream error: {err}"),
            None,
        ),
        fmt => {
            return Err(VigilError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| VigilError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VigilError::AudioStream(e.to_string()))?;

    Ok((stream, sample_rate))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
fn open_stream(
    _shared: Arc<PlaybackShared>,
    _preferred_device_name: Option<&str>,
) -> Result<((), u32)> {
    Err(VigilError::AudioStream(
        "compiled without audio-cpal feature".into(),
    ))
}
