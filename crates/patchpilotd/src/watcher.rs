//! Enforcement directory watcher
//!
//! Forwards the path of every created or modified file in the enforcement
//! directory. The watcher is supervised: when setup or the event stream
//! fails it is restarted after a fixed back-off, forever, and each failure
//! is counted.

use notify::{Event, EventKind, RecursiveMode, Watcher as NotifyWatcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("could not create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watcher setup failed: {0}")]
    Setup(#[from] notify::Error),

    #[error("watch stream failed: {0}")]
    Stream(#[source] notify::Error),
}

/// Watch `dir` until the stream fails or `out` is closed.
///
/// The directory is created first if it does not exist.
pub async fn watch_directory(dir: &Path, out: &mpsc::Sender<PathBuf>) -> Result<(), WatchError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| WatchError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = raw_tx.send(res);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!("Watching {} for enforcement changes", dir.display());

    while let Some(res) = raw_rx.recv().await {
        let event = res.map_err(WatchError::Stream)?;
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }
        for path in event.paths {
            debug!("Enforcement file changed: {}", path.display());
            if out.send(path).await.is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Keeps a directory watcher alive.
pub struct WatcherSupervisor {
    dir: PathBuf,
    retry: Duration,
    failures: Arc<AtomicU64>,
}

impl WatcherSupervisor {
    pub fn new(dir: impl Into<PathBuf>, retry: Duration) -> Self {
        Self {
            dir: dir.into(),
            retry,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared count of watcher failures so far.
    pub fn failure_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.failures)
    }

    pub fn spawn(self, out: mpsc::Sender<PathBuf>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(out).await })
    }

    /// Restart loop. Returns once the receiving side is gone.
    pub async fn run(self, out: mpsc::Sender<PathBuf>) {
        while !out.is_closed() {
            match watch_directory(&self.dir, &out).await {
                Ok(()) if out.is_closed() => break,
                Ok(()) => warn!("Enforcement watcher stopped, restarting in {:?}", self.retry),
                Err(e) => {
                    let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                    error!(
                        "Enforcement watcher failed ({} failures so far), retrying in {:?}: {}",
                        failures, self.retry, e
                    );
                }
            }
            tokio::time::sleep(self.retry).await;
        }
        debug!("Enforcement watcher supervisor exiting");
    }
}
