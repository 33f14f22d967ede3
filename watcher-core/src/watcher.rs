//! The filesystem event watcher: consumption loop from backend to sink.
//!
//! [`FileWatcher`] owns a running backend subscription and turns its raw
//! signals into alerts: normalize, filter against the path registry, coalesce,
//! classify, persist. The loop suspends on the next OS notification rather
//! than polling, probes the monitored root on a heartbeat so a silently dead
//! subscription is detected, and exits promptly on the cooperative stop
//! signal.
//!
//! Rename handling: platforms report a rename as a source-only event followed
//! by a paired event carrying both ends. A source-only move is held for a
//! short grace period; if the paired event arrives it wins (the alert carries
//! the destination), otherwise the held move is emitted without one. Either
//! way a single rename produces a single alert.

use crate::backend::{WatchBackend, WatchSignal};
use crate::coalesce::Coalescer;
use crate::error::WatchError;
use crate::event::{RawEventKind, RawFsEvent};
use crate::registry::RegistryHandle;
use canaryd_lib::alerting::{AlertLog, Notifier, RecordOutcome};
use canaryd_lib::classify::classify;
use canaryd_lib::models::{Alert, DecoyPath, DetectionEvent, EventKind, HostContext};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, trace, warn};

/// How long a source-only move waits for its paired event.
const RENAME_GRACE: Duration = Duration::from_millis(250);

/// Cooperative shutdown signal shared between the supervisor and the watcher.
///
/// Triggering is idempotent and wakes the watcher out of its blocking wait
/// with bounded latency.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    triggered: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Safe to call from any task, any number of times.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Suspend until the signal is triggered.
    pub async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register as a waiter before checking the flag: `notify_waiters`
        // only wakes futures that are already enrolled, so checking first
        // would leave a window where a concurrent trigger is lost.
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

/// Watcher runtime configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Root observed recursively.
    pub root: PathBuf,
    /// Coalescing window for repeated (path, kind) events.
    pub coalesce_window: Duration,
    /// Interval between liveness probes of the monitored root.
    pub heartbeat: Duration,
    /// Capacity of the backend-to-watcher channel.
    pub channel_capacity: usize,
}

impl WatcherConfig {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            coalesce_window: Coalescer::DEFAULT_WINDOW,
            heartbeat: Duration::from_secs(5),
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug)]
struct PendingMove {
    decoy: DecoyPath,
    since: Instant,
}

/// The running watcher: a started backend plus the consumption state.
pub struct FileWatcher {
    config: WatcherConfig,
    backend: Box<dyn WatchBackend>,
    rx: mpsc::Receiver<WatchSignal>,
    registry: RegistryHandle,
    sink: Arc<AlertLog>,
    notifier: Arc<dyn Notifier>,
    coalescer: Coalescer,
    host: HostContext,
    pending_moves: HashMap<PathBuf, PendingMove>,
}

impl FileWatcher {
    /// Establish the OS subscription and return a watcher ready to run.
    ///
    /// # Errors
    ///
    /// Propagates [`WatchError::Unavailable`] from the backend when the
    /// subscription cannot be established.
    pub fn start(
        mut backend: Box<dyn WatchBackend>,
        config: WatcherConfig,
        registry: RegistryHandle,
        sink: Arc<AlertLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        backend.start(&config.root, tx)?;
        info!(
            root = %config.root.display(),
            decoys = registry.snapshot().len(),
            "file watcher started"
        );
        Ok(Self {
            coalescer: Coalescer::new(config.coalesce_window),
            host: HostContext::capture(),
            config,
            backend,
            rx,
            registry,
            sink,
            notifier,
            pending_moves: HashMap::new(),
        })
    }

    /// Consume events until the stop signal fires or the subscription breaks.
    ///
    /// Returns `Ok(())` on cooperative stop. Returns [`WatchError::Lost`]
    /// when the subscription silently terminated (backend error callback, or
    /// the monitored root disappeared between heartbeats); the supervisor
    /// decides retry policy. In every exit path the backend is stopped first,
    /// so no further alerts are recorded after this returns.
    pub async fn run(&mut self, stop: &StopSignal) -> Result<(), WatchError> {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut rename_flush = tokio::time::interval(RENAME_GRACE / 2);

        loop {
            if stop.is_triggered() {
                self.backend.stop();
                return Ok(());
            }
            tokio::select! {
                () = stop.wait() => {
                    debug!("watcher stopping on request");
                    self.backend.stop();
                    return Ok(());
                }
                signal = self.rx.recv() => match signal {
                    None => {
                        self.backend.stop();
                        return Err(WatchError::Closed);
                    }
                    Some(WatchSignal::Lost(reason)) => {
                        self.backend.stop();
                        return Err(WatchError::Lost(reason));
                    }
                    Some(WatchSignal::Event(raw)) => self.handle_raw(raw).await,
                },
                _ = rename_flush.tick() => self.flush_pending_moves().await,
                _ = heartbeat.tick() => {
                    if !self.config.root.exists() {
                        self.backend.stop();
                        return Err(WatchError::Lost(
                            "monitored root disappeared".to_owned(),
                        ));
                    }
                }
            }
        }
    }

    /// Normalize, filter, and route one raw event.
    async fn handle_raw(&mut self, raw: RawFsEvent) {
        let registry = self.registry.snapshot();

        // Exact-match policy: the path itself, or either end of a move.
        if let Some(decoy) = registry.lookup(&raw.path) {
            let decoy = decoy.clone();
            if raw.kind == RawEventKind::Moved {
                self.pending_moves.remove(&decoy.path);
                if raw.dest.is_none() {
                    // Half a rename; hold briefly for the paired event.
                    self.pending_moves.insert(
                        decoy.path.clone(),
                        PendingMove {
                            decoy,
                            since: Instant::now(),
                        },
                    );
                    return;
                }
            }
            let kind = canonical_kind(&raw);
            self.emit(decoy, kind).await;
        } else if raw.kind == RawEventKind::Moved {
            if let Some(decoy) = raw.dest.as_deref().and_then(|dest| registry.lookup(dest)) {
                // Something landed on a decoy path; report the move against
                // the registered destination.
                self.emit(decoy.clone(), EventKind::Moved(None)).await;
            }
        }
    }

    /// Emit held source-only moves whose grace period has elapsed.
    async fn flush_pending_moves(&mut self) {
        if self.pending_moves.is_empty() {
            return;
        }
        let now = Instant::now();
        let due: Vec<PathBuf> = self
            .pending_moves
            .iter()
            .filter(|(_, pending)| now.duration_since(pending.since) >= RENAME_GRACE)
            .map(|(path, _)| path.clone())
            .collect();
        for path in due {
            if let Some(pending) = self.pending_moves.remove(&path) {
                self.emit(pending.decoy, EventKind::Moved(None)).await;
            }
        }
    }

    /// Coalesce, classify, and deliver one detection.
    async fn emit(&mut self, decoy: DecoyPath, kind: EventKind) {
        if !self.coalescer.admit(&decoy.path, &kind) {
            trace!(path = %decoy.path.display(), kind = %kind, "coalesced repeat event");
            return;
        }

        let event = DetectionEvent::new(decoy, kind, self.host.clone());
        let severity = classify(&event.kind, event.decoy.category);
        let alert = Alert::from_detection(&event, severity);

        warn!(
            severity = %severity,
            path = %event.decoy.path.display(),
            event = %event.kind,
            "canary triggered"
        );

        match self.sink.record(alert.clone()) {
            Ok(RecordOutcome::Persisted) => {}
            Ok(RecordOutcome::Queued) => {
                warn!(path = %event.decoy.path.display(), "alert sink degraded, alert queued");
            }
            Err(e) => error!(error = %e, "failed to record alert"),
        }

        // Best-effort side channel; never blocks or fails the record above.
        self.notifier.notify(&alert.message, &alert.details).await;
    }

    /// Monitored root.
    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.config.root
    }
}

/// Collapse backend kinds into the canonical detection kind.
///
/// A create on a registered path reports as a modification: the decoy was
/// overwritten via an atomic-write pattern, not newly planted.
fn canonical_kind(raw: &RawFsEvent) -> EventKind {
    match raw.kind {
        RawEventKind::Opened => EventKind::Opened,
        RawEventKind::Created | RawEventKind::Modified => EventKind::Modified,
        RawEventKind::Metadata => EventKind::Metadata,
        RawEventKind::Moved => EventKind::Moved(raw.dest.clone()),
        RawEventKind::Deleted => EventKind::Deleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_reports_as_modification() {
        let raw = RawFsEvent::new(RawEventKind::Created, PathBuf::from("/tokens/aws.txt"));
        assert_eq!(canonical_kind(&raw), EventKind::Modified);
    }

    #[test]
    fn move_keeps_destination() {
        let raw = RawFsEvent::moved(
            PathBuf::from("/tokens/aws.txt"),
            Some(PathBuf::from("/tmp/exfil")),
        );
        assert_eq!(
            canonical_kind(&raw),
            EventKind::Moved(Some(PathBuf::from("/tmp/exfil")))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_signal_wait_never_misses_a_concurrent_trigger() {
        // Race wait() against trigger() repeatedly; a waiter that enrolls
        // after checking the flag would hang here with no other wakeup
        // source to rescue it.
        for _ in 0..200 {
            let stop = StopSignal::new();
            let waiter = {
                let stop = stop.clone();
                tokio::spawn(async move { stop.wait().await })
            };
            let trigger = {
                let stop = stop.clone();
                tokio::spawn(async move { stop.trigger() })
            };
            trigger.await.expect("trigger task should not panic");
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("wait() lost a concurrent trigger")
                .expect("waiter task should not panic");
        }
    }

    #[tokio::test]
    async fn stop_signal_is_idempotent_and_wakes_waiters() {
        let stop = StopSignal::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.wait().await })
        };
        stop.trigger();
        stop.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake promptly")
            .expect("waiter task should not panic");
        assert!(stop.is_triggered());
    }
}
