use crate::error::WatchError;
use crate::file_op::{event_to_raw, RawEvent};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Source of raw change notifications for a directory tree.
pub trait WatchService: Send + 'static {
    /// Start delivering events for everything under `root` into `tx`.
    fn subscribe(&mut self, root: &Path, tx: mpsc::Sender<RawEvent>) -> Result<(), WatchError>;
    fn unsubscribe(&mut self);
}

/// `notify`-backed watch service using the platform's recommended backend.
#[derive(Default)]
pub struct NotifyWatchService {
    active: Option<(RecommendedWatcher, PathBuf)>,
}

impl NotifyWatchService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatchService for NotifyWatchService {
    fn subscribe(&mut self, root: &Path, tx: mpsc::Sender<RawEvent>) -> Result<(), WatchError> {
        if !root.is_dir() {
            return Err(WatchError::NotADirectory(root.to_path_buf()));
        }
        let subscribe_err = |source| WatchError::Subscribe {
            path: root.to_path_buf(),
            source,
        };
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for ev in event_to_raw(event) {
                        // receiver gone means the daemon is shutting down
                        if tx.blocking_send(ev).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => tracing::error!("watch error: {e}"),
            },
            notify::Config::default(),
        )
        .map_err(subscribe_err)?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(subscribe_err)?;
        self.active = Some((watcher, root.to_path_buf()));
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some((mut watcher, path)) = self.active.take() {
            if let Err(e) = watcher.unwatch(&path) {
                tracing::warn!("unwatch {}: {e}", path.display());
            }
        }
    }
}
