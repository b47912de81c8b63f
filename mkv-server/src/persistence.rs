//! # Persistence Manager
//!
//! Bridge between the live engine and the backing snapshot file: load once at
//! startup, then save the whole mapping on a fixed interval.
//!
//! ## Design Principles
//!
//! 1. **Copy Under Read Lock**: Each save takes a point-in-time copy through
//!    `KvEngine::snapshot`, so a batch write is captured whole or not at all.
//! 2. **I/O Off the Runtime**: Serialization and file writes run on the
//!    blocking pool; request tasks never wait on disk.
//! 3. **Single Writer**: An async mutex orders the startup, periodic, and
//!    shutdown saves so only one ever touches the file.
//! 4. **Survive Failures**: A failed save is logged and retried next tick.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use mkv_engine::{KvEngine, SnapshotError, SnapshotFile};

use crate::metrics::Metrics;

/// Longest save interval the loop will schedule (one year).
pub const MAX_SAVE_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Outcome of one successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    /// Keys captured.
    pub keys: usize,
    /// Bytes written to the backing file.
    pub bytes: u64,
    /// Time from copy to rename.
    pub elapsed: Duration,
}

/// Owns the backing file for one engine.
pub struct Persistence<E> {
    engine: Arc<E>,
    file: SnapshotFile,
    metrics: Arc<Metrics>,
    save_lock: Mutex<()>,
}

impl<E: KvEngine + 'static> Persistence<E> {
    pub fn new(engine: Arc<E>, file: SnapshotFile, metrics: Arc<Metrics>) -> Self {
        Persistence {
            engine,
            file,
            metrics,
            save_lock: Mutex::new(()),
        }
    }

    pub fn file(&self) -> &SnapshotFile {
        &self.file
    }

    /// Installs the on-disk snapshot into the engine.
    ///
    /// Returns the number of keys loaded. Must complete before the server
    /// accepts connections; an error here means the file is unusable.
    pub async fn load(&self) -> Result<usize, SnapshotError> {
        let file = self.file.clone();
        let snapshot = match tokio::task::spawn_blocking(move || file.load()).await {
            Ok(loaded) => loaded?,
            Err(err) => return Err(self.join_error(err)),
        };

        let keys = snapshot.len();
        self.engine.restore(snapshot);
        Ok(keys)
    }

    /// Copies the engine and atomically replaces the backing file.
    pub async fn save_once(&self) -> Result<SaveReport, SnapshotError> {
        let _writer = self.save_lock.lock().await;
        let started = Instant::now();

        let snapshot = self.engine.snapshot();
        let keys = snapshot.len();
        let file = self.file.clone();
        let saved = match tokio::task::spawn_blocking(move || file.save(&snapshot)).await {
            Ok(saved) => saved,
            Err(err) => Err(self.join_error(err)),
        };

        match saved {
            Ok(bytes) => {
                let elapsed = started.elapsed();
                self.metrics.record_snapshot_saved(keys, bytes, elapsed);
                Ok(SaveReport {
                    keys,
                    bytes,
                    elapsed,
                })
            }
            Err(err) => {
                self.metrics.record_snapshot_failed();
                Err(err)
            }
        }
    }

    /// Spawns the periodic save loop.
    ///
    /// The first save happens one `interval` after the call. Intervals above
    /// `MAX_SAVE_INTERVAL` are clamped to it.
    pub fn start_snapshotter(self: &Arc<Self>, interval: Duration) -> SnapshotterHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let persistence = Arc::clone(self);

        let interval = if interval > MAX_SAVE_INTERVAL {
            warn!(
                requested_s = interval.as_secs(),
                max_s = MAX_SAVE_INTERVAL.as_secs(),
                "snapshot interval too large, clamping"
            );
            MAX_SAVE_INTERVAL
        } else {
            interval
        };

        let task = tokio::spawn(async move {
            let mut ticker = match time::Instant::now().checked_add(interval) {
                Some(first) => time::interval_at(first, interval),
                None => time::interval(interval),
            };
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => persistence.save_tick().await,
                }
            }
            debug!("snapshot loop stopped");
        });

        SnapshotterHandle { stop_tx, task }
    }

    async fn save_tick(&self) {
        match self.save_once().await {
            Ok(report) => {
                let stats = self.metrics.snapshot();
                debug!(
                    keys = report.keys,
                    bytes = report.bytes,
                    elapsed_us = report.elapsed.as_micros() as u64,
                    requests = stats.requests_total,
                    errors = stats.errors_total,
                    connections = stats.connections_active,
                    latency_samples = stats.latency.samples,
                    latency_mean_us = stats.latency.mean_us(),
                    latency_p99_us = ?stats.latency.quantile_bound_us(0.99),
                    "snapshot saved"
                );
            }
            Err(err) => {
                warn!(
                    path = ?self.file.path(),
                    error = %err,
                    "snapshot save failed, retrying next interval"
                );
            }
        }
    }

    fn join_error(&self, err: JoinError) -> SnapshotError {
        SnapshotError::Io {
            context: "running snapshot task",
            path: self.file.path().to_path_buf(),
            source: io::Error::other(err),
        }
    }
}

/// Handle to the background save loop.
///
/// Dropping the handle also ends the loop, after any save in progress.
pub struct SnapshotterHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SnapshotterHandle {
    /// Stops the loop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(err) = self.task.await {
            warn!(error = %err, "snapshot loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mkv_engine::MemoryEngine;

    fn persistence_in(dir: &tempfile::TempDir) -> Arc<Persistence<MemoryEngine>> {
        Arc::new(Persistence::new(
            Arc::new(MemoryEngine::new()),
            SnapshotFile::new(dir.path().join("store.db")),
            Arc::new(Metrics::new()),
        ))
    }

    #[tokio::test]
    async fn load_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = persistence_in(&dir);
        assert_eq!(persistence.load().await.unwrap(), 0);
        assert!(persistence.engine.is_empty());
    }

    #[tokio::test]
    async fn save_then_reload_into_fresh_engine() {
        let dir = tempfile::tempdir().unwrap();
        let first = persistence_in(&dir);
        first.engine.set("x".into(), "y".into());
        first.engine.set("empty".into(), String::new());

        let report = first.save_once().await.unwrap();
        assert_eq!(report.keys, 2);
        assert!(report.bytes > 0);
        assert_eq!(first.metrics.snapshot().snapshots.saved, 1);

        let second = persistence_in(&dir);
        assert_eq!(second.load().await.unwrap(), 2);
        assert_eq!(second.engine.get("x").as_deref(), Some("y"));
        assert_eq!(second.engine.get("empty").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn corrupt_file_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("store.db"), b"not a snapshot").unwrap();

        let persistence = persistence_in(&dir);
        let err = persistence.load().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
        assert!(persistence.engine.is_empty());
    }

    #[tokio::test]
    async fn failed_save_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Persistence::new(
            Arc::new(MemoryEngine::new()),
            SnapshotFile::new(dir.path().join("no-such-dir").join("store.db")),
            Arc::new(Metrics::new()),
        );

        assert!(persistence.save_once().await.is_err());
        let stats = persistence.metrics.snapshot().snapshots;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.saved, 0);
    }

    #[tokio::test]
    async fn snapshotter_retries_after_failed_save() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("later");
        let persistence = Arc::new(Persistence::new(
            Arc::new(MemoryEngine::new()),
            SnapshotFile::new(data_dir.join("store.db")),
            Arc::new(Metrics::new()),
        ));
        persistence.engine.set("kept".into(), "yes".into());

        let handle = persistence.start_snapshotter(Duration::from_millis(20));
        time::sleep(Duration::from_millis(80)).await;
        assert!(persistence.metrics.snapshot().snapshots.failed >= 1);

        std::fs::create_dir(&data_dir).unwrap();
        time::sleep(Duration::from_millis(120)).await;
        handle.stop().await;

        let stats = persistence.metrics.snapshot().snapshots;
        assert!(stats.failed >= 1);
        assert!(stats.saved >= 1);

        let reloaded = persistence.file().load().unwrap();
        assert_eq!(reloaded.get("kept"), Some("yes"));
    }

    #[tokio::test]
    async fn oversized_interval_keeps_loop_alive() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = persistence_in(&dir);

        let handle = persistence.start_snapshotter(Duration::MAX);
        time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.task.is_finished());
        handle.stop().await;

        assert_eq!(persistence.metrics.snapshot().snapshots.saved, 0);
    }

    #[tokio::test]
    async fn snapshotter_saves_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = persistence_in(&dir);
        persistence.engine.set("tick".into(), "1".into());

        let handle = persistence.start_snapshotter(Duration::from_millis(20));
        time::sleep(Duration::from_millis(150)).await;
        handle.stop().await;

        assert!(persistence.metrics.snapshot().snapshots.saved >= 1);
        let reloaded = persistence_in(&dir);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.engine.get("tick").as_deref(), Some("1"));
    }
}
