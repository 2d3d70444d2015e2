//! `AlarmPlayer`: single, cancellable, time-bounded looping alarm.
//!
//! ## Lifecycle
//!
//! ```text
//! AlarmPlayer::new()
//!     └─► start()      → clip validated, worker spawned, is_playing() = true
//!         ├─► stop()   → cancel signal, bounded join, forced backend stop
//!         └─► (auto)   → worker exits at started_at + auto_stop
//! ```
//!
//! `start()` while a session is active stops that session first, so at most
//! one worker ever drives the backend. `stop()` on an idle player returns
//! immediately.
//!
//! ## Ownership
//!
//! `active_session` holds the id of the session allowed to touch the backend
//! (0 = none). A worker checks it under the backend lock before every `play`,
//! and `stop()` clears it before forcing the backend silent, so a worker that
//! missed the grace period can never start sound again after its session was
//! torn down.
//!
//! A worker that misses the grace period is usually stuck inside a backend
//! call, holding the backend lock. `stop()` then mutes through the backend's
//! lock-free [`Silencer`] when it has one, and the worker itself stops the
//! backend on exit once it finds no session owns it.

pub mod backend;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::{Result, VigilError};
use crate::ipc::events::{AlarmState, AlarmStatusEvent, StopReason};

pub use backend::{BackendHandle, PlaybackBackend, Silencer, SilentBackend};

/// Broadcast channel capacity for alarm status events.
const BROADCAST_CAP: usize = 64;

/// Upper bound on the cancellation poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for `AlarmPlayer`.
#[derive(Debug, Clone)]
pub struct AlarmConfig {
    /// WAV file looped while the alarm is active. `None` disables alarms.
    pub sound_path: Option<PathBuf>,
    /// Output gain in [0, 1]. Default: 1.0.
    pub volume: f32,
    /// Session length after which the loop stops by itself. Default: 5 min.
    pub auto_stop: Duration,
    /// Cancellation / deadline poll interval. Clamped to ≤ 100 ms.
    pub poll_interval: Duration,
    /// How long `stop()` waits for the worker to acknowledge. Default: 2 s.
    pub stop_grace: Duration,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            sound_path: None,
            volume: 1.0,
            auto_stop: Duration::from_secs(5 * 60),
            poll_interval: MAX_POLL_INTERVAL,
            stop_grace: Duration::from_secs(2),
        }
    }
}

impl AlarmConfig {
    pub fn normalize(&mut self) {
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.poll_interval = self
            .poll_interval
            .clamp(Duration::from_millis(5), MAX_POLL_INTERVAL);
        self.auto_stop = self.auto_stop.max(self.poll_interval);
        self.stop_grace = self
            .stop_grace
            .clamp(self.poll_interval, Duration::from_secs(10));
    }
}

/// Minimal control surface the alert state machine needs.
pub trait AlarmControl: Send + Sync {
    /// Begin (or restart) the alarm loop.
    fn start(&self) -> Result<()>;
    /// Stop the alarm loop if one is running.
    fn stop(&self);
    fn is_playing(&self) -> bool;
}

/// Snapshot of the current logical alarm session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmSessionInfo {
    pub id: u64,
    pub started_at: DateTime<Utc>,
    /// `started_at + auto_stop`.
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Default)]
pub struct AlarmDiagnostics {
    pub sessions_started: AtomicUsize,
    pub start_failures: AtomicUsize,
    pub auto_stops: AtomicUsize,
    pub forced_stops: AtomicUsize,
    pub playback_errors: AtomicUsize,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmDiagnosticsSnapshot {
    pub sessions_started: usize,
    pub start_failures: usize,
    pub auto_stops: usize,
    pub forced_stops: usize,
    pub playback_errors: usize,
}

impl AlarmDiagnostics {
    pub fn snapshot(&self) -> AlarmDiagnosticsSnapshot {
        AlarmDiagnosticsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            start_failures: self.start_failures.load(Ordering::Relaxed),
            auto_stops: self.auto_stops.load(Ordering::Relaxed),
            forced_stops: self.forced_stops.load(Ordering::Relaxed),
            playback_errors: self.playback_errors.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the worker of one session. Only ever held inside `AlarmPlayer::session`.
struct SessionHandle {
    id: u64,
    started_at: DateTime<Utc>,
    cancel_tx: Sender<()>,
    done_rx: Receiver<StopReason>,
    worker: Option<JoinHandle<()>>,
}

/// Shared pieces cloned into every worker and into `AlarmPlayer` itself.
#[derive(Clone)]
struct Shared {
    backend: BackendHandle,
    silencer: Option<Silencer>,
    /// Id of the session allowed to drive the backend; 0 = none.
    active_session: Arc<AtomicU64>,
    status_tx: broadcast::Sender<AlarmStatusEvent>,
    seq: Arc<AtomicU64>,
    diagnostics: Arc<AlarmDiagnostics>,
}

impl Shared {
    fn emit(&self, session_id: u64, state: AlarmState, reason: Option<StopReason>) {
        let _ = self.status_tx.send(AlarmStatusEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            session_id,
            state,
            reason,
            at: Utc::now(),
        });
    }
}

/// The alarm handle.
///
/// `AlarmPlayer` is `Send + Sync`; wrap it in `Arc` to share between the
/// frame path and a control surface.
pub struct AlarmPlayer {
    config: AlarmConfig,
    shared: Shared,
    next_session_id: AtomicU64,
    /// Serialises start/stop; holds the live session, if any.
    session: Mutex<Option<SessionHandle>>,
}

impl AlarmPlayer {
    pub fn new(mut config: AlarmConfig, backend: BackendHandle) -> Self {
        config.normalize();
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let silencer = backend.0.lock().silencer();
        Self {
            config,
            shared: Shared {
                backend,
                silencer,
                active_session: Arc::new(AtomicU64::new(0)),
                status_tx,
                seq: Arc::new(AtomicU64::new(0)),
                diagnostics: Arc::new(AlarmDiagnostics::default()),
            },
            next_session_id: AtomicU64::new(1),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AlarmConfig {
        &self.config
    }

    /// Start a new alarm session, stopping any active one first.
    ///
    /// Returns as soon as the worker is spawned; playback continues in the
    /// background until `stop()` or the auto-stop deadline.
    ///
    /// # Errors
    /// - `VigilError::NoAlarmSound` / `VigilError::AssetUnavailable` when the
    ///   clip is not configured or cannot be loaded.
    /// - `VigilError::Io` if the worker thread cannot be spawned.
    ///
    /// On error `is_playing()` is false.
    pub fn start(&self) -> Result<AlarmSessionInfo> {
        let mut slot = self.session.lock();
        self.stop_locked(&mut slot, StopReason::Superseded);

        let result = self.spawn_session();
        match result {
            Ok(handle) => {
                let info = self.describe(&handle);
                *slot = Some(handle);
                Ok(info)
            }
            Err(e) => {
                self.shared
                    .diagnostics
                    .start_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!("alarm start failed: {e}");
                Err(e)
            }
        }
    }

    /// Stop the active session, if any.
    ///
    /// Waits at most `stop_grace` for the worker to acknowledge, then forces the
    /// backend silent regardless. Returns `true` if a session was torn down.
    pub fn stop(&self) -> bool {
        let mut slot = self.session.lock();
        self.stop_locked(&mut slot, StopReason::Requested)
    }

    /// `true` while a session is driving the backend.
    pub fn is_playing(&self) -> bool {
        self.shared.active_session.load(Ordering::SeqCst) != 0
    }

    /// The current (or most recent, if auto-stopped but not yet cleared) session.
    pub fn session(&self) -> Option<AlarmSessionInfo> {
        self.session.lock().as_ref().map(|h| self.describe(h))
    }

    /// Subscribe to alarm start/stop events.
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> AlarmDiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn describe(&self, handle: &SessionHandle) -> AlarmSessionInfo {
        let auto_stop = chrono::Duration::from_std(self.config.auto_stop)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        AlarmSessionInfo {
            id: handle.id,
            started_at: handle.started_at,
            expires_at: handle.started_at + auto_stop,
            is_active: self.shared.active_session.load(Ordering::SeqCst) == handle.id,
        }
    }

    fn spawn_session(&self) -> Result<SessionHandle> {
        let sound_path = self.config.sound_path.clone().ok_or(VigilError::NoAlarmSound)?;

        // Validate the clip synchronously so asset problems surface to the caller.
        self.shared.backend.0.lock().load(&sound_path)?;

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<StopReason>(1);

        self.shared.active_session.store(id, Ordering::SeqCst);

        let worker = WorkerContext {
            id,
            sound_path,
            volume: self.config.volume,
            deadline: Instant::now() + self.config.auto_stop,
            poll_interval: self.config.poll_interval,
            shared: self.shared.clone(),
            cancel_rx,
            done_tx,
        };

        let spawned = std::thread::Builder::new()
            .name(format!("vigil-alarm-{id}"))
            .spawn(move || worker.run());

        let worker = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.active_session.store(0, Ordering::SeqCst);
                return Err(VigilError::Io(e));
            }
        };

        self.shared
            .diagnostics
            .sessions_started
            .fetch_add(1, Ordering::Relaxed);
        self.shared.emit(id, AlarmState::Playing, None);
        info!(
            session = id,
            auto_stop_secs = self.config.auto_stop.as_secs_f64(),
            "alarm started"
        );

        Ok(SessionHandle {
            id,
            started_at: Utc::now(),
            cancel_tx,
            done_rx,
            worker: Some(worker),
        })
    }

    fn stop_locked(&self, slot: &mut Option<SessionHandle>, reason: StopReason) -> bool {
        let Some(mut handle) = slot.take() else {
            return false;
        };

        let was_active = self.shared.active_session.load(Ordering::SeqCst) == handle.id;
        let _ = handle.cancel_tx.try_send(());

        match handle.done_rx.recv_timeout(self.config.stop_grace) {
            Ok(worker_reason) => {
                debug!(session = handle.id, ?worker_reason, "alarm worker acknowledged");
                if let Some(worker) = handle.worker.take() {
                    let _ = worker.join();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                self.shared
                    .diagnostics
                    .forced_stops
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    session = handle.id,
                    grace_ms = self.config.stop_grace.as_millis() as u64,
                    "alarm worker did not acknowledge stop in time; forcing backend stop"
                );
                // Detach: the worker can no longer reach the backend once ownership is cleared.
                drop(handle.worker.take());
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!(session = handle.id, "alarm worker exited without acknowledging");
                if let Some(worker) = handle.worker.take() {
                    let _ = worker.join();
                }
            }
        }

        let _ = self.shared.active_session.compare_exchange(
            handle.id,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        if let Some(silencer) = &self.shared.silencer {
            silencer.silence();
        }
        match self.shared.backend.0.try_lock_for(self.config.stop_grace) {
            Some(mut backend) => backend.stop(),
            None if self.shared.silencer.is_some() => {
                debug!(session = handle.id, "playback backend busy; muted via silencer");
            }
            None => warn!(
                session = handle.id,
                "playback backend busy; the stuck worker will stop it on exit"
            ),
        }

        if was_active {
            self.shared.emit(handle.id, AlarmState::Stopped, Some(reason));
            info!(session = handle.id, ?reason, "alarm stopped");
        }
        true
    }
}

impl AlarmControl for AlarmPlayer {
    fn start(&self) -> Result<()> {
        AlarmPlayer::start(self).map(|_| ())
    }

    fn stop(&self) {
        AlarmPlayer::stop(self);
    }

    fn is_playing(&self) -> bool {
        AlarmPlayer::is_playing(self)
    }
}

impl Drop for AlarmPlayer {
    fn drop(&mut self) {
        let mut slot = self.session.lock();
        self.stop_locked(&mut slot, StopReason::Requested);
    }
}

impl std::fmt::Debug for AlarmPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmPlayer")
            .field("config", &self.config)
            .field("is_playing", &self.is_playing())
            .finish_non_exhaustive()
    }
}

/// Everything one playback worker owns.
struct WorkerContext {
    id: u64,
    sound_path: PathBuf,
    volume: f32,
    deadline: Instant,
    poll_interval: Duration,
    shared: Shared,
    cancel_rx: Receiver<()>,
    done_tx: Sender<StopReason>,
}

impl WorkerContext {
    fn owns_backend(&self) -> bool {
        self.shared.active_session.load(Ordering::SeqCst) == self.id
    }

    fn run(self) {
        debug!(session = self.id, "alarm worker started");
        let reason = self.play_until_stopped();

        // A superseded worker must not cut off its successor. Ownership is
        // re-checked under the backend lock, which every `play` also holds.
        let owned = {
            let mut backend = self.shared.backend.0.lock();
            let owned = self
                .shared
                .active_session
                .compare_exchange(self.id, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if owned || self.shared.active_session.load(Ordering::SeqCst) == 0 {
                backend.stop();
            }
            owned
        };

        match reason {
            StopReason::AutoStop => {
                self.shared
                    .diagnostics
                    .auto_stops
                    .fetch_add(1, Ordering::Relaxed);
                info!(session = self.id, "alarm auto-stopped");
            }
            StopReason::PlaybackError => {
                self.shared
                    .diagnostics
                    .playback_errors
                    .fetch_add(1, Ordering::Relaxed);
            }
            StopReason::Requested | StopReason::Superseded => {}
        }
        if owned && matches!(reason, StopReason::AutoStop | StopReason::PlaybackError) {
            self.shared.emit(self.id, AlarmState::Stopped, Some(reason));
        }

        let _ = self.done_tx.send(reason);
    }

    fn cancelled(&self) -> bool {
        !matches!(self.cancel_rx.try_recv(), Err(TryRecvError::Empty))
    }

    fn play_until_stopped(&self) -> StopReason {
        loop {
            if self.cancelled() {
                return StopReason::Requested;
            }
            if Instant::now() >= self.deadline {
                return StopReason::AutoStop;
            }

            {
                let mut backend = self.shared.backend.0.lock();
                if !self.owns_backend() {
                    return StopReason::Superseded;
                }
                let started = backend.load(&self.sound_path).and_then(|()| {
                    backend.set_volume(self.volume);
                    backend.play()
                });
                if let Err(e) = started {
                    error!(session = self.id, "alarm playback failed: {e}");
                    return StopReason::PlaybackError;
                }
            }

            // Wait for the clip to end, a cancel, or the deadline.
            loop {
                let remaining = self.deadline.saturating_duration_since(Instant::now());
                let wait = self.poll_interval.min(remaining);
                match self.cancel_rx.recv_timeout(wait) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        return StopReason::Requested;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                }
                if Instant::now() >= self.deadline {
                    return StopReason::AutoStop;
                }
                if !self.shared.backend.0.lock().is_busy() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Backend whose clip "plays" for a fixed time and that counts calls.
    struct CountingBackend {
        clip: Duration,
        started: Option<Instant>,
        plays: Arc<AtomicUsize>,
    }

    impl PlaybackBackend for CountingBackend {
        fn load(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
        fn play(&mut self) -> Result<()> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            self.started = Some(Instant::now());
            Ok(())
        }
        fn is_busy(&self) -> bool {
            self.started.map(|t| t.elapsed() < self.clip).unwrap_or(false)
        }
        fn stop(&mut self) {
            self.started = None;
        }
        fn set_volume(&mut self, _volume: f32) {}
    }

    fn player(clip: Duration, auto_stop: Duration) -> (AlarmPlayer, Arc<AtomicUsize>) {
        let plays = Arc::new(AtomicUsize::new(0));
        let backend = BackendHandle::new(CountingBackend {
            clip,
            started: None,
            plays: Arc::clone(&plays),
        });
        let config = AlarmConfig {
            sound_path: Some(PathBuf::from("alarm.wav")),
            auto_stop,
            poll_interval: Duration::from_millis(10),
            ..AlarmConfig::default()
        };
        (AlarmPlayer::new(config, backend), plays)
    }

    #[test]
    fn normalize_clamps_poll_interval_and_volume() {
        let mut config = AlarmConfig {
            volume: 3.0,
            poll_interval: Duration::from_secs(1),
            ..AlarmConfig::default()
        };
        config.normalize();
        assert_eq!(config.volume, 1.0);
        assert_eq!(config.poll_interval, MAX_POLL_INTERVAL);
    }

    #[test]
    fn start_without_sound_reports_error_and_stays_idle() {
        let backend = BackendHandle::new(SilentBackend::new(Duration::from_millis(10)));
        let player = AlarmPlayer::new(AlarmConfig::default(), backend);
        let err = player.start().unwrap_err();
        assert!(err.is_asset_unavailable());
        assert!(!player.is_playing());
        assert_eq!(player.diagnostics_snapshot().start_failures, 1);
    }

    #[test]
    fn short_clip_is_replayed_until_stopped() {
        let (player, plays) = player(Duration::from_millis(15), Duration::from_secs(30));
        player.start().unwrap();
        std::thread::sleep(Duration::from_millis(120));
        assert!(player.is_playing());
        assert!(plays.load(Ordering::SeqCst) >= 2, "clip should loop");
        assert!(player.stop());
        assert!(!player.is_playing());
    }

    #[test]
    fn stop_when_idle_is_a_noop() {
        let (player, _) = player(Duration::from_millis(15), Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(!player.stop());
        assert!(t0.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn session_reports_expiry_from_auto_stop() {
        let (player, _) = player(Duration::from_millis(15), Duration::from_secs(60));
        let info = player.start().unwrap();
        assert!(info.is_active);
        assert_eq!((info.expires_at - info.started_at).num_seconds(), 60);
        player.stop();
        assert!(player.session().is_none());
    }
}
