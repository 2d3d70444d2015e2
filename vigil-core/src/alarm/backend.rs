//! Playback backend abstraction.
//!
//! The `PlaybackBackend` trait decouples the alarm loop from any specific
//! audio stack (cpal output, a silent backend for headless deployments, test
//! doubles). All calls are serialised through `BackendHandle`'s
//! `parking_lot::Mutex`, so implementors may assume exclusive access.
//!
//! The one exception is [`Silencer`]: a lock-free mute handed out once by
//! backends that can silence themselves from another thread. The alarm uses it
//! when a worker is stuck while holding the backend lock.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

/// Contract for alarm audio backends.
pub trait PlaybackBackend: Send + 'static {
    /// Prepare the clip at `path` for playback. Replaces any previous clip.
    ///
    /// # Errors
    /// `VigilError::AssetUnavailable` if the file is missing, or a codec error.
    fn load(&mut self, path: &Path) -> Result<()>;

    /// Start playing the loaded clip once, from the beginning. Non-blocking.
    fn play(&mut self) -> Result<()>;

    /// `true` while the clip started by `play` is still audible.
    fn is_busy(&self) -> bool;

    /// Silence output immediately. Must be safe to call at any time.
    fn stop(&mut self);

    /// Output gain in `[0, 1]`.
    fn set_volume(&mut self, volume: f32);

    /// Lock-free mute for this backend, if it has one.
    fn silencer(&self) -> Option<Silencer> {
        None
    }
}

/// Mutes a backend without taking the `BackendHandle` lock.
#[derive(Clone)]
pub struct Silencer(Arc<dyn Fn() + Send + Sync>);

impl Silencer {
    pub fn new(mute: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(mute))
    }

    pub fn silence(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for Silencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Silencer").finish_non_exhaustive()
    }
}

/// Thread-safe reference-counted handle to any `PlaybackBackend` implementor.
#[derive(Clone)]
pub struct BackendHandle(pub Arc<Mutex<dyn PlaybackBackend>>);

impl BackendHandle {
    /// Wrap any `PlaybackBackend` in a `BackendHandle`.
    pub fn new<B: PlaybackBackend>(backend: B) -> Self {
        Self(Arc::new(Mutex::new(backend)))
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle").finish_non_exhaustive()
    }
}

/// Backend that accepts every call and produces no sound.
///
/// Each `play` is considered audible for `clip_duration`, so the alarm loop
/// behaves exactly as with a real device. Used on headless hosts and by the
/// replay bench.
pub struct SilentBackend {
    clip_duration: std::time::Duration,
    playing_since: Option<std::time::Instant>,
    loaded: bool,
}

impl SilentBackend {
    pub fn new(clip_duration: std::time::Duration) -> Self {
        Self {
            clip_duration,
            playing_since: None,
            loaded: false,
        }
    }
}

impl PlaybackBackend for SilentBackend {
    fn load(&mut self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "SilentBackend::load");
        self.loaded = true;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(crate::error::VigilError::Playback("no clip loaded".into()));
        }
        self.playing_since = Some(std::time::Instant::now());
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.playing_since
            .map(|t| t.elapsed() < self.clip_duration)
            .unwrap_or(false)
    }

    fn stop(&mut self) {
        self.playing_since = None;
    }

    fn set_volume(&mut self, _volume: f32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn silent_backend_requires_load_before_play() {
        let mut backend = SilentBackend::new(Duration::from_millis(50));
        assert!(backend.play().is_err());
        backend.load(Path::new("alarm.wav")).unwrap();
        backend.play().unwrap();
        assert!(backend.is_busy());
        backend.stop();
        assert!(!backend.is_busy());
    }

    #[test]
    fn silencer_runs_its_mute_closure() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let audible = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&audible);
        let silencer = Silencer::new(move || flag.store(false, Ordering::SeqCst));
        silencer.clone().silence();
        assert!(!audible.load(Ordering::SeqCst));
        assert!(SilentBackend::new(Duration::from_millis(10)).silencer().is_none());
    }

    #[test]
    fn silent_backend_finishes_after_clip_duration() {
        let mut backend = SilentBackend::new(Duration::from_millis(10));
        backend.load(Path::new("alarm.wav")).unwrap();
        backend.play().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(!backend.is_busy());
    }
}
