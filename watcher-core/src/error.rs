//! Watch error taxonomy.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the filesystem watch subsystem.
///
/// `Unavailable` is fatal at start: the OS subscription could not be
/// established and monitoring does not proceed. `Lost` is recoverable: the
/// subscription broke while running and the supervisor decides retry policy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatchError {
    /// The OS-level subscription could not be established (root missing,
    /// permission denied, watch-descriptor limits).
    #[error("cannot watch {path}: {source}")]
    Unavailable {
        /// Path the subscription was attempted on.
        path: PathBuf,
        /// Root cause.
        #[source]
        source: std::io::Error,
    },

    /// The subscription was silently terminated while running.
    #[error("watch subscription lost: {0}")]
    Lost(String),

    /// The backend event channel closed without a stop request.
    #[error("watch event channel closed")]
    Closed,
}

impl WatchError {
    /// Wrap a `notify` setup failure as `Unavailable`, preserving the IO
    /// cause when there is one.
    #[must_use]
    pub fn unavailable(path: PathBuf, error: notify::Error) -> Self {
        let source = match error.kind {
            notify::ErrorKind::Io(io) => io,
            other => std::io::Error::other(format!("{other:?}")),
        };
        Self::Unavailable { path, source }
    }

    /// Whether the supervisor may retry after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(*self, Self::Lost(_))
    }
}
