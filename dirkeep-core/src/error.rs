//! Error types surfaced by the core pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or missing startup configuration. Fatal before any task starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no {0} specified")]
    Missing(&'static str),
    #[error("invalid time unit {0:?}, expected seconds, minutes or hours")]
    UnknownUnit(String),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("{0} is too large")]
    IntervalTooLarge(&'static str),
    #[error("invalid glob pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// The recursive subscription under the backup root could not be established.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("backup directory {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to watch {path}: {source}")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Failures of the local durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid collection name {0:?}")]
    InvalidCollection(String),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failure applying a single durable record against the remote store. The record is kept
/// and retried on the next cycle.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("local file {0} no longer exists")]
    MissingFile(PathBuf),
    #[error("{path} is outside the backup directory {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("unknown action {action:?} recorded for {path}")]
    UnknownAction { path: String, action: String },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("walking {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("remote {op} for {key} failed: {cause:#}")]
    Remote {
        op: &'static str,
        key: String,
        cause: anyhow::Error,
    },
    #[error("shutdown requested before {0} was fully applied")]
    Interrupted(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
}
