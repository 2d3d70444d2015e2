//! Vigil headless host.
//!
//! Reads one JSON command per stdin line and writes one JSON response per
//! stdout line. Logs go to stderr so stdout stays machine-readable. Commands
//! run on the blocking pool one at a time, preserving request order.

mod commands;
mod settings;
mod state;

use std::sync::Arc;

use anyhow::Context;
use settings::{default_settings_path, load_settings};
use state::{AppState, Runtime};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vigil=info")),
        )
        .init();

    info!("Vigil starting");

    let settings_path = default_settings_path();
    let mut app_settings = load_settings(&settings_path);
    app_settings.apply_overrides(|key| std::env::var(key).ok());
    info!(
        settings_path = ?settings_path,
        interval = app_settings.fire_detection_interval,
        video_floor = app_settings.fire_confidence_threshold,
        fire_detection = app_settings.enable_fire_detection,
        auto_stop_minutes = app_settings.alarm_auto_stop_minutes,
        alarm_sound = ?app_settings.alarm_sound,
        "runtime settings loaded"
    );

    // ── Runtime setup ─────────────────────────────────────────────────────
    let handle = tokio::runtime::Handle::current();
    let runtime = {
        let settings = app_settings.clone();
        let handle = handle.clone();
        // Model warm-up and device opening block.
        tokio::task::spawn_blocking(move || Runtime::build(&settings, &handle))
            .await
            .context("runtime setup task panicked")??
    };
    let state = Arc::new(AppState::new(
        runtime,
        app_settings,
        Some(settings_path),
        handle,
    ));
    info!("ready for commands on stdin");

    // ── Command loop ──────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        };
        let Some(line) = line else {
            info!("stdin closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = commands::dispatch(Arc::clone(&state), line).await;
        let mut out = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("could not serialize response: {e}");
                continue;
            }
        };
        out.push(b'\n');
        stdout.write_all(&out).await.context("writing stdout")?;
        stdout.flush().await.context("flushing stdout")?;
    }

    let shutdown_state = Arc::clone(&state);
    tokio::task::spawn_blocking(move || shutdown_state.shutdown())
        .await
        .context("shutdown task panicked")?;
    info!("Vigil stopped");
    Ok(())
}
