// ================================
// src/replay.rs - recorded frame source
// ================================
use crate::{error::ConfigError, lidar::RangeFrame};
use log::{info, warn};
use serde::Deserialize;
use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc::{error::TrySendError, Sender},
    time,
};

/// TOML file of `[[frames]]` tables.
#[derive(Deserialize, Debug)]
struct ScanRecording {
    frames: Vec<RangeFrame>,
}

pub fn load_recording(path: impl AsRef<Path>) -> Result<Vec<RangeFrame>, ConfigError> {
    let path = path.as_ref();
    let recording_str = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let recording: ScanRecording =
        toml::from_str(&recording_str).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

    info!("Loaded {} frames from {}", recording.frames.len(), path.display());
    Ok(recording.frames)
}

/// Feed `frames` into the worker queue at `rate_hz` until done or `stop` is set.
/// Returns the number of frames queued.
pub async fn replay(
    frames: Vec<RangeFrame>,
    tx: Sender<RangeFrame>,
    rate_hz: f64,
    stop: Arc<AtomicBool>,
) -> usize {
    let mut ticker = time::interval(Duration::from_secs_f64(1.0 / rate_hz));
    let mut sent = 0;

    for frame in frames {
        ticker.tick().await;
        if stop.load(Ordering::Relaxed) {
            break;
        }

        // Non-blocking send, like a sensor callback
        match tx.try_send(frame) {
            Ok(()) => sent += 1,
            Err(TrySendError::Full(_)) => warn!("Frame queue full, dropping frame"),
            Err(TrySendError::Closed(_)) => break,
        }
    }

    sent
}
