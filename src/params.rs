// ================================
// src/params.rs - live parameter store and update channel
// ================================
use crate::{
    config::ControlParameters,
    error::{ConfigError, ParamError},
};
use log::{info, warn};
use parking_lot::RwLock;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

/// How often the update file's modification time is checked.
pub const WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Inbound parameter update, field names as sent by the tuning UI.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ParameterUpdate {
    pub throttle: f32,
    pub window_half_size: usize,
    pub disparity_extender: usize,
    pub max_actionable_dist: f32,
}

impl ParameterUpdate {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let update_str = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&update_str).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

impl From<ParameterUpdate> for ControlParameters {
    fn from(update: ParameterUpdate) -> Self {
        Self {
            throttle: update.throttle,
            window_half: update.window_half_size,
            disparity_extender: update.disparity_extender,
            max_actionable_dist: update.max_actionable_dist,
        }
    }
}

/// Shared holder of the current [`ControlParameters`].
///
/// Updates replace the whole struct under the write lock, so a reader
/// never sees a mix of old and new fields.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    params: Arc<RwLock<ControlParameters>>,
}

impl ParameterStore {
    pub fn new(initial: ControlParameters) -> Result<Self, ParamError> {
        initial.validate()?;
        Ok(Self {
            params: Arc::new(RwLock::new(initial)),
        })
    }

    /// Copy of the current parameters, taken once per frame.
    pub fn snapshot(&self) -> ControlParameters {
        *self.params.read()
    }

    /// Apply an update. Returns `Ok(false)` when nothing changed.
    pub fn apply(&self, update: ParameterUpdate) -> Result<bool, ParamError> {
        let candidate = ControlParameters::from(update);
        candidate.validate()?;

        let mut guard = self.params.write();
        if *guard == candidate {
            return Ok(false);
        }
        *guard = candidate;
        Ok(true)
    }
}

/// Background thread that hot-reloads a parameter update file.
pub struct ParameterWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ParameterWatcher {
    /// Start watching `path` with the default poll interval.
    pub fn start(path: impl Into<PathBuf>, store: ParameterStore) -> Self {
        Self::start_with_interval(path, store, WATCH_INTERVAL)
    }

    /// An existing file is applied on the first poll.
    pub fn start_with_interval(
        path: impl Into<PathBuf>,
        store: ParameterStore,
        interval: Duration,
    ) -> Self {
        let path = path.into();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        info!("Watching parameter updates in {}", path.display());

        let handle = thread::spawn(move || {
            let mut last_modified = SystemTime::UNIX_EPOCH;

            while !stop_flag.load(Ordering::Relaxed) {
                let modified = fs::metadata(&path).and_then(|metadata| metadata.modified());

                // A missing file is normal until the UI writes its first update.
                // An unreadable or unparsable file is retried on the next poll.
                if let Ok(modified) = modified {
                    if modified > last_modified && Self::reload(&path, &store) {
                        last_modified = modified;
                    }
                }

                thread::sleep(interval);
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Returns `false` when the file could not be read or parsed.
    fn reload(path: &Path, store: &ParameterStore) -> bool {
        let update = match ParameterUpdate::from_path(path) {
            Ok(update) => update,
            Err(e) => {
                warn!("Parameter reload failed: {}", e);
                return false;
            }
        };

        match store.apply(update) {
            Ok(true) => info!("Parameters hot-reloaded: {:?}", update),
            Ok(false) => {}
            Err(e) => warn!("Rejected parameter update {:?}: {}", update, e),
        }
        true
    }

    /// Stop polling and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Parameter watcher thread panicked");
            }
        }
    }
}

impl Drop for ParameterWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn update(throttle: f32, window_half_size: usize) -> ParameterUpdate {
        ParameterUpdate {
            throttle,
            window_half_size,
            disparity_extender: 30,
            max_actionable_dist: 2.5,
        }
    }

    fn wait_for(store: &ParameterStore, pred: impl Fn(&ControlParameters) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if pred(&store.snapshot()) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn apply_replaces_every_field() {
        let store = ParameterStore::default();
        assert!(store.apply(update(0.5, 10)).unwrap());

        let params = store.snapshot();
        assert_eq!(params.throttle, 0.5);
        assert_eq!(params.window_half, 10);
        assert_eq!(params.disparity_extender, 30);
        assert_eq!(params.max_actionable_dist, 2.5);
    }

    #[test]
    fn equal_update_is_noop() {
        let store = ParameterStore::default();
        assert!(store.apply(update(0.5, 10)).unwrap());
        assert!(!store.apply(update(0.5, 10)).unwrap());
    }

    #[test]
    fn invalid_update_keeps_previous_snapshot() {
        let store = ParameterStore::default();
        let before = store.snapshot();

        assert_eq!(store.apply(update(0.5, 0)), Err(ParamError::ZeroWindow));

        let mut bad = update(0.5, 10);
        bad.max_actionable_dist = -1.0;
        assert_eq!(
            store.apply(bad),
            Err(ParamError::InvalidActionableDist(-1.0))
        );
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn non_finite_throttle_is_rejected() {
        let store = ParameterStore::default();
        store.apply(update(0.5, 10)).unwrap();
        let before = store.snapshot();

        assert!(matches!(
            store.apply(update(f32::NAN, 10)),
            Err(ParamError::InvalidThrottle(t)) if t.is_nan()
        ));
        assert_eq!(
            store.apply(update(f32::INFINITY, 10)),
            Err(ParamError::InvalidThrottle(f32::INFINITY))
        );
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn oversized_window_is_rejected() {
        let store = ParameterStore::default();
        assert_eq!(
            store.apply(update(0.5, usize::MAX)),
            Err(ParamError::WindowTooLarge(usize::MAX))
        );
        assert_eq!(
            store.apply(update(0.5, usize::MAX / 2 + 1)),
            Err(ParamError::WindowTooLarge(usize::MAX / 2 + 1))
        );
        assert!(store.apply(update(0.5, usize::MAX / 2)).unwrap());
        assert_eq!(store.snapshot().window_half, usize::MAX / 2);
    }

    #[test]
    fn snapshot_is_detached_from_later_updates() {
        let store = ParameterStore::default();
        let snapshot = store.snapshot();
        store.apply(update(0.9, 7)).unwrap();
        assert_eq!(snapshot, ControlParameters::default());
    }

    #[test]
    fn concurrent_updates_are_never_torn() {
        let store = ParameterStore::default();
        let writer_store = store.clone();

        let writer = thread::spawn(move || {
            for i in 0..2000 {
                let n = 1 + i % 50;
                writer_store
                    .apply(ParameterUpdate {
                        throttle: n as f32,
                        window_half_size: n,
                        disparity_extender: n,
                        max_actionable_dist: n as f32,
                    })
                    .unwrap();
            }
        });

        for _ in 0..2000 {
            let p = store.snapshot();
            if p != ControlParameters::default() {
                assert_eq!(p.window_half, p.disparity_extender);
                assert_eq!(p.throttle, p.window_half as f32);
                assert_eq!(p.max_actionable_dist, p.window_half as f32);
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn watcher_applies_update_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gap_follow_params.toml");
        fs::write(
            &path,
            "throttle = 0.4\nwindow_half_size = 20\ndisparity_extender = 60\nmax_actionable_dist = 3.0\n",
        )
        .unwrap();

        let store = ParameterStore::default();
        let watcher =
            ParameterWatcher::start_with_interval(&path, store.clone(), Duration::from_millis(10));

        assert!(wait_for(&store, |p| p.window_half == 20));
        assert_eq!(store.snapshot().disparity_extender, 60);
        watcher.stop();
    }

    #[test]
    fn watcher_ignores_unparsable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gap_follow_params.toml");
        fs::write(&path, "throttle = \"fast\"\n").unwrap();

        let store = ParameterStore::default();
        let watcher =
            ParameterWatcher::start_with_interval(&path, store.clone(), Duration::from_millis(10));
        thread::sleep(Duration::from_millis(100));

        assert_eq!(store.snapshot(), ControlParameters::default());
        drop(watcher);
    }

    #[test]
    fn watcher_retries_file_that_failed_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gap_follow_params.toml");
        fs::write(&path, "throttle = 0.4\nwindow_half_size = \n").unwrap();
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();

        let store = ParameterStore::default();
        let watcher =
            ParameterWatcher::start_with_interval(&path, store.clone(), Duration::from_millis(10));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(store.snapshot(), ControlParameters::default());

        // Finished write that keeps the timestamp of the partial one
        fs::write(
            &path,
            "throttle = 0.4\nwindow_half_size = 25\ndisparity_extender = 60\nmax_actionable_dist = 3.0\n",
        )
        .unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();

        assert!(wait_for(&store, |p| p.window_half == 25));
        watcher.stop();
    }
}
