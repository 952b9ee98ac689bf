// src/errors.rs

//! Crate-wide error types.
//!
//! Configuration problems are rejected synchronously, before any thread
//! starts; watcher errors are partitioned into recoverable (recrawl / retry)
//! and fatal (cancels the root); sync errors surface to the blocking caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use anyhow::{Error, Result};

/// A trigger definition that cannot be accepted.
///
/// These never escape to a background thread: `TriggerCommand::new` performs
/// all validation up front and a failed definition is never partially
/// applied.
#[derive(Error, Debug)]
pub enum TriggerConfigError {
    #[error("invalid or missing name")]
    MissingName,

    #[error("invalid command array")]
    InvalidCommand,

    #[error("invalid stdin value {0}")]
    InvalidStdin(String),

    #[error("max_files_stdin must be >= 0")]
    NegativeMaxFiles,

    #[error("{label}: must be prefixed with either > or >>, got {value}")]
    BadRedirect { label: String, value: String },

    #[error("append mode (>>) is not supported on Windows")]
    AppendUnsupported,

    #[error("invalid glob pattern {pattern}: {source}")]
    BadPattern {
        pattern: String,
        source: globset::Error,
    },
}

/// Errors from a watcher backend.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to initialize watcher: {reason}")]
    Init { reason: String },

    #[error("all watcher backends failed: {reasons}")]
    NoUsableBackend { reasons: String },
}

/// Errors from the cookie synchronization round-trip.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("timed out waiting {waited:?} for cookie {cookie}")]
    Timeout { cookie: PathBuf, waited: Duration },

    #[error("root was cancelled: {reason}")]
    RootCancelled { reason: String },

    #[error("failed to create cookie {cookie}: {source}")]
    CreateFailed {
        cookie: PathBuf,
        source: std::io::Error,
    },
}
