//! Raw filesystem event normalization.
//!
//! [`RawFsEvent`] is the ephemeral, backend-level notification: produced from
//! the OS subsystem, consumed immediately by the watcher, never persisted.
//! One `notify` event can fan out into several raw events (one per reported
//! path); rename pairs collapse into a single move with both ends attached.

use notify::event::{AccessKind, AccessMode, EventKind as NotifyKind, ModifyKind, RenameMode};
use std::path::PathBuf;

/// Backend-level event kind before canonical normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    /// File opened for reading.
    Opened,
    /// File created. On a registered decoy this reports as a modification:
    /// atomic-write patterns recreate the file in place.
    Created,
    /// File content written.
    Modified,
    /// Permissions, ownership, or timestamp change.
    Metadata,
    /// File moved or renamed.
    Moved,
    /// File deleted.
    Deleted,
}

/// An operating-system-level notification: kind, path, and an optional
/// destination for moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFsEvent {
    pub kind: RawEventKind,
    pub path: PathBuf,
    /// Destination path when the OS reported both ends of a rename.
    pub dest: Option<PathBuf>,
}

impl RawFsEvent {
    /// New event without a destination.
    #[must_use]
    pub const fn new(kind: RawEventKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            dest: None,
        }
    }

    /// New move event carrying both ends.
    #[must_use]
    pub const fn moved(path: PathBuf, dest: Option<PathBuf>) -> Self {
        Self {
            kind: RawEventKind::Moved,
            path,
            dest,
        }
    }

    /// Normalize a heterogeneous `notify` event into zero or more raw events.
    ///
    /// Kinds with no security meaning (close-without-write, unclassified
    /// `Other` events) are dropped here so non-matching noise never reaches
    /// the watcher loop.
    #[must_use]
    pub fn from_notify(event: notify::Event) -> Vec<Self> {
        let kind = match event.kind {
            NotifyKind::Access(AccessKind::Open(_) | AccessKind::Read) => RawEventKind::Opened,
            NotifyKind::Access(AccessKind::Close(AccessMode::Write)) => RawEventKind::Modified,
            NotifyKind::Create(_) => RawEventKind::Created,
            NotifyKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => {
                RawEventKind::Modified
            }
            NotifyKind::Modify(ModifyKind::Metadata(_)) => RawEventKind::Metadata,
            NotifyKind::Modify(ModifyKind::Name(mode)) => {
                return Self::from_rename(mode, event.paths);
            }
            NotifyKind::Remove(_) => RawEventKind::Deleted,
            _ => return Vec::new(),
        };
        event
            .paths
            .into_iter()
            .map(|path| Self::new(kind, path))
            .collect()
    }

    fn from_rename(mode: RenameMode, mut paths: Vec<PathBuf>) -> Vec<Self> {
        match mode {
            // Both ends reported in one event: [source, destination].
            RenameMode::Both | RenameMode::Any if paths.len() >= 2 => {
                let dest = paths.pop();
                let src = paths.swap_remove(0);
                vec![Self::moved(src, dest)]
            }
            RenameMode::From | RenameMode::To | RenameMode::Any | RenameMode::Both => paths
                .into_iter()
                .map(|path| Self::moved(path, None))
                .collect(),
            RenameMode::Other => Vec::new(),
        }
    }
}
