//! Replays recorded detector responses through the frame path.
//!
//! Input is a JSON array with one element per camera frame; each element is a
//! raw detector response in any shape `detect::raw` understands. The alarm
//! runs against a silent backend, so this measures the controller alone.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use vigil_core::alarm::SilentBackend;
use vigil_core::detect::{raw, AcceptancePolicy, StubDetector};
use vigil_core::{
    AlarmConfig, AlarmPlayer, BackendHandle, DetectionAdapter, DetectorHandle, EngineConfig,
    FrameContext, FrameMonitor, ImageInput, RawDetection,
};

#[derive(Debug)]
struct Args {
    input: Option<PathBuf>,
    interval: u32,
    auto_stop_ms: u64,
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    frames: usize,
    checked: usize,
    interval: u32,
    transitions: BTreeMap<String, usize>,
    p50_latency_us: f64,
    p95_latency_us: f64,
    avg_latency_us: f64,
    max_latency_us: f64,
    alarm: vigil_core::alarm::AlarmDiagnosticsSnapshot,
    monitor: vigil_core::engine::MonitorDiagnosticsSnapshot,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("replay failed: {e}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        input: None,
        interval: 3,
        auto_stop_ms: 300_000,
        output: None,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--input" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --input".into());
                };
                args.input = Some(PathBuf::from(v));
            }
            "--interval" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --interval".into());
                };
                args.interval = v
                    .parse::<u32>()
                    .map_err(|_| "invalid value for --interval".to_string())?
                    .max(1);
            }
            "--auto-stop-ms" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --auto-stop-ms".into());
                };
                args.auto_stop_ms = v
                    .parse::<u64>()
                    .map_err(|_| "invalid value for --auto-stop-ms".to_string())?;
            }
            "--output" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --output".into());
                };
                args.output = Some(PathBuf::from(v));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p vigil-core --bin replay -- \\
  [--input <frames.json>] [--interval <n>] [--auto-stop-ms <ms>] [--output <summary.json>]"
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

/// Per-frame responses: from `--input`, or a built-in fire/clear/fire sequence.
fn load_frames(args: &Args) -> Result<Vec<Vec<RawDetection>>, String> {
    let Some(path) = &args.input else {
        let fire = || {
            vec![RawDetection::new(
                "fire",
                0.8,
                vigil_core::detect::BoundingBox::from_corners(10.0, 10.0, 60.0, 80.0),
            )]
        };
        return Ok((0..300)
            .map(|i| match i / 60 {
                1 | 3 => fire(),
                _ => Vec::new(),
            })
            .collect());
    };

    let body = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| e.to_string())?;
    let frames = value
        .as_array()
        .ok_or_else(|| "input must be a JSON array with one element per frame".to_string())?;
    frames
        .iter()
        .map(|frame| raw::parse_value(frame, "fire").map_err(|e| e.to_string()))
        .collect()
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    let frames = load_frames(&args)?;

    // Only sampled frames reach the detector, so only they consume the script.
    let script: Vec<Vec<RawDetection>> = frames
        .iter()
        .enumerate()
        .filter(|(i, _)| vigil_core::should_sample(*i as u64, args.interval))
        .map(|(_, f)| f.clone())
        .collect();

    let adapter = Arc::new(DetectionAdapter::new(
        DetectorHandle::new(StubDetector::scripted(script)),
        AcceptancePolicy::fire(),
    ));
    let alarm = Arc::new(AlarmPlayer::new(
        AlarmConfig {
            sound_path: Some(PathBuf::from("replay-alarm.wav")),
            auto_stop: Duration::from_millis(args.auto_stop_ms),
            ..AlarmConfig::default()
        },
        BackendHandle::new(SilentBackend::new(Duration::from_millis(500))),
    ));
    let config = EngineConfig {
        sampling_interval: args.interval,
        ..EngineConfig::default()
    };
    let monitor = FrameMonitor::new(config, adapter, alarm.clone()).map_err(|e| e.to_string())?;

    let mut transitions: BTreeMap<String, usize> = BTreeMap::new();
    let mut latencies_us: Vec<f64> = Vec::with_capacity(frames.len());
    let mut checked = 0usize;

    for index in 0..frames.len() {
        let frame = FrameContext::new(
            index as u64,
            ImageInput::Path(PathBuf::from(format!("frame-{index:06}.jpg"))),
        );
        let t0 = Instant::now();
        let outcome = monitor.process_frame(&frame);
        latencies_us.push(t0.elapsed().as_secs_f64() * 1_000_000.0);

        if outcome.checked {
            checked += 1;
        }
        let name = serde_json::to_value(outcome.transition)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", outcome.transition));
        *transitions.entry(name).or_default() += 1;
    }

    alarm.stop();

    let avg = if latencies_us.is_empty() {
        0.0
    } else {
        latencies_us.iter().sum::<f64>() / latencies_us.len() as f64
    };
    latencies_us.sort_by(|a, b| a.total_cmp(b));

    let summary = Summary {
        frames: frames.len(),
        checked,
        interval: args.interval,
        transitions,
        p50_latency_us: percentile(&latencies_us, 0.50),
        p95_latency_us: percentile(&latencies_us, 0.95),
        avg_latency_us: avg,
        max_latency_us: latencies_us.last().copied().unwrap_or(0.0),
        alarm: alarm.diagnostics_snapshot(),
        monitor: monitor.diagnostics().snapshot(),
    };

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, &json).map_err(|e| format!("{}: {e}", path.display()))?;
            eprintln!("summary written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
