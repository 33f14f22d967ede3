//! Core data models for decoy paths, detection events, and alerts.
//!
//! The types here form the canonical, platform-independent representation of
//! a canary trigger: a [`DecoyPath`] registered at generation time, the
//! [`DetectionEvent`] the watcher constructs when that path is touched, and
//! the [`Alert`] record the sink persists one-to-one from it.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Logical category of a generated decoy credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum TokenCategory {
    /// AWS access key material (`~/.aws/credentials` style)
    Aws,
    /// SSH private key material
    Ssh,
    /// Database connection configuration
    Database,
    /// Generic API key / `.env` material
    Api,
}

impl std::fmt::Display for TokenCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Aws => write!(f, "aws"),
            Self::Ssh => write!(f, "ssh"),
            Self::Database => write!(f, "db"),
            Self::Api => write!(f, "api"),
        }
    }
}

/// Alert severity. Ordered so that escalation can be expressed (`Low < Medium < High`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// One level up, saturating at [`Severity::High`].
    #[must_use]
    pub const fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Canonical, platform-independent filesystem event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "dest")]
pub enum EventKind {
    /// File was opened for reading.
    Opened,
    /// File content was written or the file was replaced in place.
    Modified,
    /// File was moved or renamed; destination is present when the OS
    /// reported both ends of the rename.
    Moved(Option<PathBuf>),
    /// File was deleted.
    Deleted,
    /// Permissions, ownership, or timestamps changed; content untouched.
    Metadata,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Opened => write!(f, "opened"),
            Self::Modified => write!(f, "modified"),
            Self::Moved(_) => write!(f, "moved"),
            Self::Deleted => write!(f, "deleted"),
            Self::Metadata => write!(f, "metadata"),
        }
    }
}

/// An absolute filesystem path registered as a canary.
///
/// Immutable once registered. The path is canonical at registration time;
/// the registry guarantees the file physically existed when the entry was
/// constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoyPath {
    /// Canonical absolute path of the decoy file.
    pub path: PathBuf,
    /// Credential category the decoy imitates.
    pub category: TokenCategory,
    /// When the decoy was registered for monitoring.
    pub registered_at: DateTime<Utc>,
}

impl DecoyPath {
    /// Create a decoy entry registered now.
    pub fn new(path: PathBuf, category: TokenCategory) -> Self {
        Self {
            path,
            category,
            registered_at: Utc::now(),
        }
    }

    /// File name component, for human-readable alert text.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// Host context captured once per process and attached to every detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostContext {
    /// Hostname of the monitored machine.
    pub hostname: String,
    /// Operating system name and version.
    pub os: String,
    /// User the monitoring process runs as.
    pub user: String,
    /// Monitoring process id.
    pub pid: u32,
}

impl HostContext {
    /// Capture host context from the running system.
    ///
    /// Every field degrades to `"unknown"` rather than failing; an alert with
    /// partial host context is still an alert.
    #[must_use]
    pub fn capture() -> Self {
        let os = match (sysinfo::System::name(), sysinfo::System::os_version()) {
            (Some(name), Some(version)) => format!("{name} {version}"),
            (Some(name), None) => name,
            _ => "unknown".to_owned(),
        };
        Self {
            hostname: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_owned()),
            os,
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_owned()),
            pid: std::process::id(),
        }
    }
}

/// Normalized record of a single decoy access, derived from one or more raw
/// OS events. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// The decoy that was triggered.
    pub decoy: DecoyPath,
    /// Canonical event kind.
    pub kind: EventKind,
    /// Wall-clock detection time.
    pub timestamp: DateTime<Local>,
    /// Seconds since the Unix epoch at detection time.
    pub epoch: f64,
    /// Host context at detection time.
    pub host: HostContext,
}

impl DetectionEvent {
    /// Construct a detection stamped with the current time.
    pub fn new(decoy: DecoyPath, kind: EventKind, host: HostContext) -> Self {
        let now = Local::now();
        let epoch = epoch_seconds(&now);
        Self {
            decoy,
            kind,
            timestamp: now,
            epoch,
            host,
        }
    }
}

/// Fractional seconds since the Unix epoch for a local timestamp.
fn epoch_seconds(ts: &DateTime<Local>) -> f64 {
    let micros = ts.timestamp_micros();
    micros as f64 / 1_000_000.0
}

/// The persisted alert record, one JSON object per line in the alerts log.
///
/// Append-only: alerts are never mutated or deleted after being written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// ISO-8601 local timestamp.
    pub timestamp: String,
    /// Alert severity.
    pub severity: Severity,
    /// Record type discriminator, always `"SECURITY_ALERT"`.
    #[serde(rename = "type")]
    pub record_type: String,
    /// Human-readable summary.
    pub message: String,
    /// Multi-line details blob (File, Full Path, Event, Time, System, OS, User).
    pub details: String,
    /// Seconds since the Unix epoch; non-decreasing across consecutive
    /// writes from one process.
    pub epoch: f64,
}

impl Alert {
    /// Record type for all security alerts.
    pub const TYPE_SECURITY: &'static str = "SECURITY_ALERT";

    /// Derive the persisted alert from a detection, one-to-one.
    #[must_use]
    pub fn from_detection(event: &DetectionEvent, severity: Severity) -> Self {
        let message = match event.kind {
            EventKind::Opened => "CANARY TRIGGERED - File Access Detected!".to_owned(),
            ref kind => format!("Canary file {kind} - {}", event.decoy.file_name()),
        };
        Self {
            timestamp: event.timestamp.to_rfc3339(),
            severity,
            record_type: Self::TYPE_SECURITY.to_owned(),
            message,
            details: Self::details_blob(event),
            epoch: event.epoch,
        }
    }

    fn details_blob(event: &DetectionEvent) -> String {
        let full_path = match event.kind {
            EventKind::Moved(Some(ref dest)) => {
                format!("{} -> {}", event.decoy.path.display(), dest.display())
            }
            _ => event.decoy.path.display().to_string(),
        };
        format!(
            "File: {}\nFull Path: {}\nEvent: {}\nTime: {}\nSystem: {}\nOS: {}\nUser: {}",
            event.decoy.file_name(),
            full_path,
            event.kind,
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.host.hostname,
            event.host.os,
            event.host.user,
        )
    }
}

/// Lexical path cleanup for comparison against registered decoys.
///
/// Resolves `.` and `..` components without touching the filesystem, so it
/// also works for paths that no longer exist (deleted or moved-away decoys).
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
