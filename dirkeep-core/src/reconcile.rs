//! Sync stage: drains the durable store against the object store.
//!
//! Every record is applied on its own. A record is deleted only after its remote operation
//! succeeded; a failed record is logged and left for the next cycle while the rest of the
//! cycle carries on. Once cancellation is observed no new remote call is started; a record
//! whose calls were cut short stays in the store.

use crate::config::DaemonConfig;
use crate::error::{ReconcileError, StoreError};
use crate::file_op::Action;
use crate::filter::PathFilter;
use crate::remote::ObjectStore;
use crate::storage::IntentStore;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

/// Outcome of one reconciliation cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub applied: usize,
    pub failed: usize,
    /// Records not attempted because cancellation was observed.
    pub skipped: usize,
}

pub struct Reconciler {
    cfg: Arc<DaemonConfig>,
    /// Applied to files found by walking a directory record.
    filter: PathFilter,
    store: Arc<IntentStore>,
    remote: Arc<dyn ObjectStore>,
}

impl Reconciler {
    pub fn new(
        cfg: Arc<DaemonConfig>,
        filter: PathFilter,
        store: Arc<IntentStore>,
        remote: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            cfg,
            filter,
            store,
            remote,
        }
    }

    /// Apply every record currently in the store. Only a failure to read the store aborts
    /// the cycle; per-record failures are counted in the report.
    pub async fn run_cycle(&self, token: &CancellationToken) -> Result<CycleReport, StoreError> {
        let store = self.store.clone();
        let records = tokio::task::spawn_blocking(move || store.entries()).await??;
        let mut report = CycleReport::default();
        let total = records.len();

        for (done, (path, action)) in records.into_iter().enumerate() {
            if token.is_cancelled() {
                report.skipped = total - done;
                info!(remaining = report.skipped, "reconciliation interrupted by shutdown");
                break;
            }
            let result = match self.apply(&path, &action, token).await {
                Ok(()) => self.clear(&path).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    debug!(%path, %action, "reconciled");
                    report.applied += 1;
                }
                Err(ReconcileError::Interrupted(_)) => {
                    report.skipped = total - done;
                    info!(%path, remaining = report.skipped, "reconciliation interrupted by shutdown");
                    break;
                }
                Err(e) => {
                    warn!(%path, %action, "reconciling failed, will retry next cycle: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn apply(
        &self,
        path: &str,
        action: &str,
        token: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let action: Action = action
            .parse()
            .map_err(|action| ReconcileError::UnknownAction {
                path: path.to_string(),
                action,
            })?;
        let local = PathBuf::from(path);
        match action {
            Action::Add => self.upload(&local, token).await,
            Action::Remove => self.remove(&local, token).await,
        }
    }

    async fn clear(&self, path: &str) -> Result<(), ReconcileError> {
        let store = self.store.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || store.delete(&path))
            .await
            .map_err(StoreError::from)??;
        Ok(())
    }

    async fn upload(&self, local: &Path, token: &CancellationToken) -> Result<(), ReconcileError> {
        let meta = match tokio::fs::metadata(local).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ReconcileError::MissingFile(local.to_path_buf()))
            }
            Err(source) => {
                return Err(ReconcileError::Io {
                    path: local.to_path_buf(),
                    source,
                })
            }
        };
        let files = if meta.is_dir() {
            let dir = local.to_path_buf();
            let filter = self.filter.clone();
            tokio::task::spawn_blocking(move || files_under(&dir, &filter))
                .await
                .map_err(StoreError::from)??
        } else {
            vec![local.to_path_buf()]
        };
        for file in files {
            if token.is_cancelled() {
                return Err(ReconcileError::Interrupted(local.to_path_buf()));
            }
            let key = self.object_key(&file)?;
            self.remote
                .put(&key, &file)
                .await
                .map_err(|cause| ReconcileError::Remote {
                    op: "put",
                    key: key.clone(),
                    cause,
                })?;
            info!(path = %file.display(), bucket = %self.cfg.bucket, %key, "uploaded");
        }
        Ok(())
    }

    /// Delete the object for `local` and everything stored beneath it as a directory.
    async fn remove(&self, local: &Path, token: &CancellationToken) -> Result<(), ReconcileError> {
        let key = self.object_key(local)?;
        let dir_prefix = format!("{key}/");
        let mut continuation = None;
        let mut deleted = 0usize;
        loop {
            if token.is_cancelled() {
                return Err(ReconcileError::Interrupted(local.to_path_buf()));
            }
            let page = self
                .remote
                .list_by_prefix(&key, continuation.take())
                .await
                .map_err(|cause| ReconcileError::Remote {
                    op: "list",
                    key: key.clone(),
                    cause,
                })?;
            for object in page.keys {
                if object != key && !object.starts_with(&dir_prefix) {
                    continue;
                }
                if token.is_cancelled() {
                    return Err(ReconcileError::Interrupted(local.to_path_buf()));
                }
                self.remote
                    .delete(&object)
                    .await
                    .map_err(|cause| ReconcileError::Remote {
                        op: "delete",
                        key: object.clone(),
                        cause,
                    })?;
                deleted += 1;
            }
            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation = Some(token),
                _ => break,
            }
        }
        info!(path = %local.display(), %key, deleted, "removed from remote");
        Ok(())
    }

    fn object_key(&self, path: &Path) -> Result<String, ReconcileError> {
        object_key(&self.cfg.prefix, &self.cfg.backup_dir, path)
    }

    pub async fn run(self, period: Duration, token: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    info!("starting reconciliation");
                    match self.run_cycle(&token).await {
                        Ok(report) if report.failed == 0 => info!(
                            applied = report.applied,
                            "reconciliation complete"
                        ),
                        Ok(report) => warn!(
                            applied = report.applied,
                            failed = report.failed,
                            "reconciliation finished with failures"
                        ),
                        Err(e) => error!("reading durable queue failed, cycle skipped: {e}"),
                    }
                }
            }
        }
        debug!("reconciler stopped");
    }
}

/// Object key for `path`: `prefix` joined with the path relative to `root`, `/`-separated.
pub fn object_key(prefix: &str, root: &Path, path: &Path) -> Result<String, ReconcileError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| ReconcileError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;
    let parts: Vec<_> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect();
    let prefix = prefix.trim_end_matches('/');
    if parts.is_empty() {
        Ok(prefix.to_string())
    } else {
        Ok(format!("{prefix}/{}", parts.join("/")))
    }
}

/// Regular files under `dir` that pass `filter`.
fn files_under(dir: &Path, filter: &PathFilter) -> Result<Vec<PathBuf>, ReconcileError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|source| ReconcileError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if filter.check(entry.path()) {
            files.push(entry.into_path());
        } else {
            trace!(path = %entry.path().display(), "filtered out of directory upload");
        }
    }
    Ok(files)
}
