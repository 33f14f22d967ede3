#![forbid(unsafe_code)]

//! # Watcher Core
//!
//! The filesystem monitoring runtime for canaryd: observes OS-level change
//! notifications under a monitored root, normalizes them into canonical
//! detection events, filters them against the registered decoy paths, and
//! delivers classified alerts to the alert sink.
//!
//! ## Architecture
//!
//! ```text
//! OS notifications ──> WatchBackend ──> FileWatcher ──> AlertLog
//!                      (notify)         - normalize     (canaryd-lib)
//!                                       - registry filter
//!                                       - coalesce
//!                                       - classify
//!                          ▲
//!                          │ start / stop / restart-on-loss
//!                     Supervisor
//! ```
//!
//! The [`Supervisor`] owns the watcher lifecycle: it starts the watcher,
//! holds it running, restarts it with bounded exponential backoff when the
//! OS subscription is lost, and exposes a cooperative, idempotent stop.

pub mod backend;
pub mod coalesce;
pub mod error;
pub mod event;
pub mod registry;
pub mod supervisor;
pub mod watcher;

pub use backend::{NotifyBackend, WatchBackend, WatchSignal};
pub use coalesce::Coalescer;
pub use error::WatchError;
pub use event::{RawEventKind, RawFsEvent};
pub use registry::{PathRegistry, RegistryHandle};
pub use supervisor::{BackendFactory, RestartPolicy, Supervisor, SupervisorState};
pub use watcher::{FileWatcher, StopSignal, WatcherConfig};
