//! Event coalescing.
//!
//! Atomic-write patterns (temp-file-then-rename, editors saving in place)
//! produce bursts of raw OS notifications for the same file. The coalescer
//! collapses repeats of the same (path, kind) inside a short window into one
//! detection so a single access never becomes an alert storm.

use canaryd_lib::models::EventKind;
use std::collections::HashMap;
use std::mem::Discriminant;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Suppresses repeated (path, kind) events inside a fixed window.
#[derive(Debug)]
pub struct Coalescer {
    window: Duration,
    seen: HashMap<(PathBuf, Discriminant<EventKind>), Instant>,
}

impl Coalescer {
    /// Recommended default window.
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(500);

    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Whether an event for (path, kind) should be emitted now.
    ///
    /// The first event in a window passes and arms the window; repeats within
    /// it are suppressed. Events spaced beyond the window each pass.
    pub fn admit(&mut self, path: &Path, kind: &EventKind) -> bool {
        self.admit_at(path, kind, Instant::now())
    }

    fn admit_at(&mut self, path: &Path, kind: &EventKind, now: Instant) -> bool {
        self.prune(now);
        let key = (path.to_path_buf(), std::mem::discriminant(kind));
        match self.seen.get(&key) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                self.seen.insert(key, now);
                true
            }
        }
    }

    /// Drop entries whose window has elapsed, bounding memory to the set of
    /// recently-active paths.
    fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, last| now.duration_since(*last) < window);
    }
}
