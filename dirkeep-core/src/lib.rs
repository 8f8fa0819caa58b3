//! Core library for dirkeep – watches a directory tree and backs it up to an object store.

mod aggregator;
mod config;
mod error;
mod file_op;
mod filter;
mod queue;
mod reconcile;
mod remote;
mod rename;
mod router;
mod storage;
mod supervisor;
mod watcher;

#[cfg(test)]
mod testing;

pub use aggregator::ChangeAggregator;
pub use config::{ConfigLayer, DaemonConfig, IntervalUnit, Pattern};
pub use error::{ConfigError, ReconcileError, StoreError, WatchError};
pub use file_op::{event_to_raw, Action, CorrelationId, FileChangeIntent, RawEvent, RawKind};
pub use filter::PathFilter;
pub use queue::DurableQueue;
pub use reconcile::{object_key, CycleReport, Reconciler};
pub use remote::{ListPage, ObjectStore};
pub use rename::{PendingMove, RenameCorrelator};
pub use router::{classify, handle_regular_events, handle_rename_events, EventRouter, Route};
pub use storage::{path_key, IntentStore, INTENT_COLLECTION};
pub use supervisor::{RunningDaemon, ShutdownOutcome, Supervisor};
pub use watcher::{NotifyWatchService, WatchService};
