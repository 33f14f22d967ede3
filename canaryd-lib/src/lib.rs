#![forbid(unsafe_code)]

//! canaryd-lib: Shared library for canaryd components.
//!
//! This library provides the functionality shared across the canaryd daemon
//! and the watcher runtime:
//! - Configuration management with hierarchical overrides
//! - Core data models for decoy paths, detection events, and alerts
//! - Pure severity classification
//! - Durable append-only alert delivery with degraded-mode queueing
//! - Best-effort desktop notification capability

pub mod alerting;
pub mod classify;
pub mod config;
pub mod models;
