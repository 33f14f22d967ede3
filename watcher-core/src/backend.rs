//! Watch backend abstraction over the platform notification facility.
//!
//! The rest of the core depends only on [`WatchBackend`]: start a recursive
//! subscription that delivers [`WatchSignal`]s into a channel, stop it and
//! release OS watch resources. [`NotifyBackend`] adapts the `notify` crate's
//! recommended per-platform watcher (inotify, FSEvents, ReadDirectoryChanges)
//! to that contract; tests substitute scripted backends.

use crate::error::WatchError;
use crate::event::RawFsEvent;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Message from a backend to the watcher loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    /// A raw filesystem event under the monitored root.
    Event(RawFsEvent),
    /// The OS subscription broke; the reason is advisory. After sending this
    /// the backend stops delivering events.
    Lost(String),
}

/// Abstract filesystem subscription capability.
pub trait WatchBackend: Send {
    /// Begin observing `root` recursively, delivering signals into `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Unavailable`] when the OS subscription cannot be
    /// established: missing root, permission denied, or watch-descriptor
    /// limits.
    fn start(&mut self, root: &Path, tx: mpsc::Sender<WatchSignal>) -> Result<(), WatchError>;

    /// Cease observation and release OS watch resources. Idempotent.
    fn stop(&mut self);
}

/// `notify`-backed implementation of [`WatchBackend`].
#[derive(Default)]
pub struct NotifyBackend {
    watcher: Option<RecommendedWatcher>,
    root: Option<PathBuf>,
}

impl NotifyBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatchBackend for NotifyBackend {
    fn start(&mut self, root: &Path, tx: mpsc::Sender<WatchSignal>) -> Result<(), WatchError> {
        if !root.exists() {
            return Err(WatchError::Unavailable {
                path: root.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "monitored root does not exist",
                ),
            });
        }

        // The handler runs on notify's worker thread, so blocking on a full
        // channel applies backpressure without touching the async runtime.
        let handler_tx = tx;
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    for raw in RawFsEvent::from_notify(event) {
                        if handler_tx.blocking_send(WatchSignal::Event(raw)).is_err() {
                            return;
                        }
                    }
                }
                Err(error) => {
                    warn!(error = %error, "watch backend error callback");
                    let _ = handler_tx.blocking_send(WatchSignal::Lost(error.to_string()));
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| WatchError::unavailable(root.to_path_buf(), e))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::unavailable(root.to_path_buf(), e))?;

        debug!(root = %root.display(), "filesystem watch established");
        self.watcher = Some(watcher);
        self.root = Some(root.to_path_buf());
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Some(root) = self.root.take() {
                // The root may already be gone; dropping the watcher releases
                // the descriptors either way.
                let _ = watcher.unwatch(&root);
                debug!(root = %root.display(), "filesystem watch released");
            }
        }
    }
}

impl Drop for NotifyBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_root_is_unavailable() {
        let (tx, _rx) = mpsc::channel(8);
        let mut backend = NotifyBackend::new();
        let result = backend.start(Path::new("/nonexistent/canary/root"), tx);
        assert!(matches!(result, Err(WatchError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let mut backend = NotifyBackend::new();
        backend.start(dir.path(), tx).unwrap();
        backend.stop();
        backend.stop();
    }
}
