// ================================
// src/main.rs
// ================================
use anyhow::Result;
use gap_follow_control::{
    controller::{LogPublisher, FRAME_QUEUE_DEPTH},
    replay, FrameWorker, GapFollowController, NodeConfig, ParameterStore, ParameterWatcher,
};
use log::{info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("F1Tenth Gap Follow Control Node");

    let config = NodeConfig::load()?;
    info!("Config file: {}", NodeConfig::config_path().display());
    if config.debug_mode {
        info!("=== Initial Configuration ===\n{:#?}", config);
    }

    let topics = &config.topics;
    info!(
        "Topics: {} -> {}, {} (updates on {})",
        topics.scan, topics.steering, topics.throttle, topics.parameters
    );

    let store = ParameterStore::new(config.parameters)?;
    let watcher = config
        .params_path
        .as_ref()
        .map(|path| ParameterWatcher::start(path, store.clone()));
    if watcher.is_none() {
        warn!("No params_path configured, parameters are fixed for this run");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    ctrlc::set_handler(move || stop_flag.store(true, Ordering::Relaxed))?;

    // Frame worker runs on its own task, fed through a bounded queue
    let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
    let controller = GapFollowController::new(store, &config.tuning);
    let publisher = LogPublisher::new(config.topics.clone());
    let worker = tokio::spawn(FrameWorker::new(rx, controller, publisher).run());

    match &config.scan_file {
        Some(path) => {
            let frames = replay::load_recording(path)?;
            let sent = replay::replay(frames, tx, config.replay_rate_hz, stop).await;
            info!("Replay finished after {} frames", sent);
        }
        None => {
            warn!("No scan_file configured, idling until Ctrl-C");
            while !stop.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            drop(tx);
        }
    }

    let worker = worker.await?;
    info!(
        "Final steering angle: {:.4}",
        worker.controller().state().running_steering_angle
    );

    if let Some(watcher) = watcher {
        watcher.stop();
    }
    Ok(())
}
