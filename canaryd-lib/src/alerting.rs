//! Durable alert delivery: append-only structured log plus rolling summary.
//!
//! [`AlertLog`] is the terminal consumer of all detections. Each alert is one
//! JSON object per line in an append-only file; a successful
//! [`AlertLog::record`] means the line reached stable storage (flushed and
//! synced), so a crash immediately after cannot lose the detection.
//!
//! When the underlying storage is unwritable the sink enters degraded mode:
//! alerts are accepted into a bounded in-memory backup queue (oldest-drop on
//! overflow) and the queue is drained ahead of the next successful write.
//! Detection must survive logging outages, so `record` never propagates a
//! storage failure to the watcher.
//!
//! Desktop notifications are a separate best-effort side channel behind the
//! [`Notifier`] capability; their failures are swallowed at that boundary and
//! never touch the structured-log write.

use crate::models::{Alert, Severity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Alert sink errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AlertingError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a recorded alert was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The alert reached stable storage before `record` returned.
    Persisted,
    /// Storage is unwritable; the alert sits in the bounded backup queue and
    /// will be flushed ahead of the next successful write.
    Queued,
}

/// Rolling per-severity counts plus degraded-mode visibility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    /// Alerts accepted in total (persisted and queued).
    pub total: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    /// Alerts currently waiting in the backup queue.
    pub queued: usize,
    /// Alerts dropped from the backup queue on overflow.
    pub dropped: u64,
    /// Whether the sink is currently in degraded mode.
    pub degraded: bool,
    /// Epoch of the most recently accepted alert, if any.
    pub last_epoch: Option<f64>,
}

#[derive(Debug, Default)]
struct SinkState {
    high: u64,
    medium: u64,
    low: u64,
    backlog: VecDeque<Alert>,
    dropped: u64,
    degraded: bool,
    last_epoch: f64,
    accepted: u64,
}

impl SinkState {
    fn bump(&mut self, severity: Severity) {
        self.accepted = self.accepted.saturating_add(1);
        match severity {
            Severity::High => self.high = self.high.saturating_add(1),
            Severity::Medium => self.medium = self.medium.saturating_add(1),
            Severity::Low => self.low = self.low.saturating_add(1),
        }
    }
}

/// Append-only structured alert log with an in-memory rolling summary.
///
/// Safe under concurrent invocation: `record`, `export`, and `summary` may be
/// called from different tasks; the append-and-count operation is serialized
/// internally.
pub struct AlertLog {
    path: PathBuf,
    capacity: usize,
    state: Mutex<SinkState>,
}

impl AlertLog {
    /// Open the alert log at `path`.
    ///
    /// Existing records are replayed to seed the summary counters and the
    /// monotonic epoch floor, so counts survive process restarts. A missing
    /// file or parent directory is fine: nothing is created until the first
    /// record is written, so read-only consumers leave no trace.
    pub fn open(path: impl Into<PathBuf>, backup_capacity: usize) -> Result<Self, AlertingError> {
        let path = path.into();
        let mut state = SinkState::default();
        if path.exists() {
            for alert in read_alerts(&path)? {
                state.bump(alert.severity);
                if alert.epoch > state.last_epoch {
                    state.last_epoch = alert.epoch;
                }
            }
        }

        Ok(Self {
            path,
            capacity: backup_capacity,
            state: Mutex::new(state),
        })
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an alert to the log.
    ///
    /// On success the alert is flushed and synced before this returns. On a
    /// storage failure the alert is queued (bounded, oldest-drop) and
    /// `Ok(RecordOutcome::Queued)` is returned; the sink keeps retrying the
    /// backlog on subsequent calls. The alert's epoch is clamped so epochs in
    /// the log are non-decreasing across consecutive writes.
    pub fn record(&self, mut alert: Alert) -> Result<RecordOutcome, AlertingError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if alert.epoch < state.last_epoch {
            alert.epoch = state.last_epoch;
        } else {
            state.last_epoch = alert.epoch;
        }
        state.bump(alert.severity);

        // Drain the backlog first so the on-disk order matches acceptance order.
        while let Some(queued) = state.backlog.front() {
            let line = serde_json::to_string(queued)?;
            match self.append_line(&line) {
                Ok(()) => {
                    state.backlog.pop_front();
                }
                Err(e) => {
                    debug!(error = %e, "alert log still unwritable, backlog retained");
                    self.enqueue(&mut state, alert);
                    return Ok(RecordOutcome::Queued);
                }
            }
        }

        let line = serde_json::to_string(&alert)?;
        match self.append_line(&line) {
            Ok(()) => {
                if state.degraded {
                    state.degraded = false;
                    info!(path = %self.path.display(), "alert sink recovered, backlog flushed");
                }
                debug!(alert = %line, "alert persisted");
                Ok(RecordOutcome::Persisted)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %self.path.display(),
                    "alert log unwritable, queueing alert in memory"
                );
                self.enqueue(&mut state, alert);
                Ok(RecordOutcome::Queued)
            }
        }
    }

    /// All persisted alerts with `epoch >= since`, ascending by epoch.
    ///
    /// A missing log file is an empty result, not an error. Unparseable lines
    /// are skipped.
    pub fn export(&self, since: f64) -> Result<Vec<Alert>, AlertingError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut alerts: Vec<Alert> = read_alerts(&self.path)?
            .into_iter()
            .filter(|a| a.epoch >= since)
            .collect();
        alerts.sort_by(|a, b| a.epoch.total_cmp(&b.epoch));
        Ok(alerts)
    }

    /// Current rolling summary.
    #[must_use]
    pub fn summary(&self) -> AlertSummary {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        AlertSummary {
            total: state.accepted,
            high: state.high,
            medium: state.medium,
            low: state.low,
            queued: state.backlog.len(),
            dropped: state.dropped,
            degraded: state.degraded,
            last_epoch: (state.accepted > 0).then_some(state.last_epoch),
        }
    }

    fn enqueue(&self, state: &mut SinkState, alert: Alert) {
        if state.backlog.len() >= self.capacity {
            state.backlog.pop_front();
            state.dropped = state.dropped.saturating_add(1);
            warn!(
                capacity = self.capacity,
                dropped = state.dropped,
                "alert backup queue full, dropped oldest queued alert"
            );
        }
        state.backlog.push_back(alert);
        state.degraded = true;
    }

    fn append_line(&self, line: &str) -> Result<(), AlertingError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        // Durability commit: a successful record must survive an immediate crash.
        file.sync_data()?;
        Ok(())
    }
}

fn read_alerts(path: &Path) -> Result<Vec<Alert>, AlertingError> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut alerts = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Alert>(&line) {
            Ok(alert) => alerts.push(alert),
            Err(e) => debug!(error = %e, "skipping unparseable alert log line"),
        }
    }
    Ok(alerts)
}

/// Best-effort notification capability, decoupled from alert persistence.
///
/// Implementations must never block the detection path and must swallow
/// their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Surface an alert to a human. Infallible by contract; implementations
    /// log their own failures at low severity.
    async fn notify(&self, summary: &str, body: &str);
}

/// Default notifier: does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _summary: &str, _body: &str) {}
}

/// Native desktop notification via the platform notification command.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    title: String,
}

impl DesktopNotifier {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new("canaryd security alert")
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, summary: &str, _body: &str) {
        let mut command = if cfg!(target_os = "macos") {
            let mut cmd = std::process::Command::new("osascript");
            cmd.arg("-e").arg(format!(
                "display notification \"{}\" with title \"{}\"",
                summary.replace('"', "'"),
                self.title.replace('"', "'")
            ));
            cmd
        } else if cfg!(target_os = "linux") {
            let mut cmd = std::process::Command::new("notify-send");
            cmd.arg(&self.title).arg(summary);
            cmd
        } else {
            debug!("desktop notifications not supported on this platform");
            return;
        };

        command
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        match command.spawn() {
            Ok(mut child) => {
                // Reap the child off the detection path.
                tokio::task::spawn_blocking(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => debug!(error = %e, "desktop notification failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecoyPath, DetectionEvent, EventKind, HostContext, TokenCategory};
    use std::path::PathBuf;

    fn sample_alert(epoch_offset: f64) -> Alert {
        let host = HostContext {
            hostname: "h".to_owned(),
            os: "os".to_owned(),
            user: "u".to_owned(),
            pid: 1,
        };
        let decoy = DecoyPath::new(PathBuf::from("/tokens/aws.txt"), TokenCategory::Aws);
        let mut event = DetectionEvent::new(decoy, EventKind::Modified, host);
        event.epoch += epoch_offset;
        Alert::from_detection(&event, Severity::High)
    }

    #[test]
    fn record_then_export_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::open(dir.path().join("alerts.log"), 8).unwrap();

        let alert = sample_alert(0.0);
        let outcome = log.record(alert.clone()).unwrap();
        assert_eq!(outcome, RecordOutcome::Persisted);

        let exported = log.export(0.0).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0], alert);
    }

    #[test]
    fn export_honors_since_filter() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::open(dir.path().join("alerts.log"), 8).unwrap();

        let early = sample_alert(0.0);
        let late = sample_alert(100.0);
        let cutoff = late.epoch;
        log.record(early).unwrap();
        log.record(late.clone()).unwrap();

        let exported = log.export(cutoff).unwrap();
        assert_eq!(exported.len(), 1);
        for alert in &exported {
            assert!(alert.epoch >= cutoff);
        }
    }

    #[test]
    fn epochs_are_non_decreasing_in_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::open(dir.path().join("alerts.log"), 8).unwrap();

        let newer = sample_alert(50.0);
        let older = sample_alert(0.0);
        log.record(newer).unwrap();
        // An alert stamped earlier than the last write gets clamped forward.
        log.record(older).unwrap();

        let exported = log.export(0.0).unwrap();
        assert_eq!(exported.len(), 2);
        assert!(exported[0].epoch <= exported[1].epoch);
        let raw = std::fs::read_to_string(log.path()).unwrap();
        let epochs: Vec<f64> = raw
            .lines()
            .map(|l| serde_json::from_str::<Alert>(l).unwrap().epoch)
            .collect();
        assert!(epochs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn summary_counts_by_severity_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.log");

        {
            let log = AlertLog::open(&path, 8).unwrap();
            let mut medium = sample_alert(1.0);
            medium.severity = Severity::Medium;
            log.record(sample_alert(0.0)).unwrap();
            log.record(medium).unwrap();

            let summary = log.summary();
            assert_eq!(summary.total, 2);
            assert_eq!(summary.high, 1);
            assert_eq!(summary.medium, 1);
            assert!(!summary.degraded);
        }

        // Durability: a fresh process sees the same records and counts.
        let reopened = AlertLog::open(&path, 8).unwrap();
        let summary = reopened.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.high, 1);
        assert_eq!(reopened.export(0.0).unwrap().len(), 2);
    }

    #[test]
    fn open_is_read_only_until_the_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let path = log_dir.join("alerts.log");

        let log = AlertLog::open(&path, 8).unwrap();
        assert_eq!(log.summary().total, 0);
        assert!(log.export(0.0).unwrap().is_empty());
        // A query-only consumer must not leave directories behind.
        assert!(!log_dir.exists());

        log.record(sample_alert(0.0)).unwrap();
        assert!(path.exists());
        assert_eq!(log.export(0.0).unwrap().len(), 1);
    }

    #[test]
    fn unwritable_storage_queues_then_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.log");
        let log = AlertLog::open(&path, 8).unwrap();

        // Make the log path unwritable by occupying it with a directory.
        std::fs::create_dir(&path).unwrap();

        let outcome = log.record(sample_alert(0.0)).unwrap();
        assert_eq!(outcome, RecordOutcome::Queued);
        let summary = log.summary();
        assert!(summary.degraded);
        assert_eq!(summary.queued, 1);
        assert_eq!(summary.total, 1);

        // Restore writability; the next record drains the backlog first.
        std::fs::remove_dir(&path).unwrap();
        let outcome = log.record(sample_alert(1.0)).unwrap();
        assert_eq!(outcome, RecordOutcome::Persisted);

        let summary = log.summary();
        assert!(!summary.degraded);
        assert_eq!(summary.queued, 0);
        assert_eq!(log.export(0.0).unwrap().len(), 2);
    }

    #[test]
    fn backup_queue_drops_oldest_on_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.log");
        let log = AlertLog::open(&path, 2).unwrap();
        std::fs::create_dir(&path).unwrap();

        log.record(sample_alert(0.0)).unwrap();
        log.record(sample_alert(1.0)).unwrap();
        log.record(sample_alert(2.0)).unwrap();

        let summary = log.summary();
        assert_eq!(summary.queued, 2);
        assert_eq!(summary.dropped, 1);

        std::fs::remove_dir(&path).unwrap();
        log.record(sample_alert(3.0)).unwrap();
        // Oldest queued alert was dropped; the remaining three made it to disk.
        assert_eq!(log.export(0.0).unwrap().len(), 3);
    }
}
