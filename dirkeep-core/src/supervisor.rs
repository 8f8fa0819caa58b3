use crate::aggregator::ChangeAggregator;
use crate::config::DaemonConfig;
use crate::error::{ConfigError, WatchError};
use crate::filter::PathFilter;
use crate::queue::DurableQueue;
use crate::reconcile::Reconciler;
use crate::remote::ObjectStore;
use crate::rename::RenameCorrelator;
use crate::router::{handle_regular_events, handle_rename_events, EventRouter};
use crate::storage::IntentStore;
use crate::watcher::WatchService;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const RAW_EVENT_BUFFER: usize = 1000;
const ROUTED_EVENT_BUFFER: usize = 64;

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every task exited within the bound.
    Graceful,
    /// The bound expired first; remaining tasks were aborted.
    TimedOut,
    /// A second shutdown request arrived first; remaining tasks were aborted.
    Forced,
}

/// Wires the pipeline together and starts it.
pub struct Supervisor {
    cfg: Arc<DaemonConfig>,
    store: Arc<IntentStore>,
    remote: Arc<dyn ObjectStore>,
    filter: PathFilter,
}

impl Supervisor {
    pub fn new(
        cfg: Arc<DaemonConfig>,
        store: Arc<IntentStore>,
        remote: Arc<dyn ObjectStore>,
    ) -> Result<Self, ConfigError> {
        let filter = PathFilter::for_config(&cfg)?;
        Ok(Self {
            cfg,
            store,
            remote,
            filter,
        })
    }

    /// Subscribe to the backup root and spawn every task. A failed subscription is returned
    /// before anything is spawned.
    pub fn start<W: WatchService>(self, mut watch: W) -> Result<RunningDaemon, WatchError> {
        let cfg = self.cfg;
        let token = CancellationToken::new();
        let aggregator = ChangeAggregator::new();

        let (raw_tx, raw_rx) = mpsc::channel(RAW_EVENT_BUFFER);
        watch.subscribe(&cfg.backup_dir, raw_tx)?;
        info!(root = %cfg.backup_dir.display(), "watching for changes");

        let (regular_tx, regular_rx) = mpsc::channel(ROUTED_EVENT_BUFFER);
        let (rename_tx, rename_rx) = mpsc::channel(ROUTED_EVENT_BUFFER);
        let router = EventRouter::new(self.filter.clone(), regular_tx, rename_tx);

        let mut tasks = Vec::new();
        {
            let token = token.clone();
            tasks.push(tokio::spawn(async move {
                router.run(raw_rx, token).await;
                watch.unsubscribe();
            }));
        }
        tasks.push(tokio::spawn(handle_regular_events(
            aggregator.clone(),
            regular_rx,
            token.clone(),
        )));
        {
            let rename = handle_rename_events(
                aggregator.clone(),
                RenameCorrelator::new(cfg.rename_ttl),
                rename_rx,
                token.clone(),
            );
            tasks.push(tokio::spawn(async move {
                rename.await;
            }));
        }

        let queue = DurableQueue::new(aggregator.clone(), self.store.clone());
        tasks.push(tokio::spawn(queue.run(cfg.persist_interval, token.clone())));

        let reconciler = Reconciler::new(cfg.clone(), self.filter, self.store, self.remote);
        tasks.push(tokio::spawn(reconciler.run(cfg.reconcile_interval, token.clone())));

        info!(
            persist_every = ?cfg.persist_interval,
            reconcile_every = ?cfg.reconcile_interval,
            bucket = %cfg.bucket,
            prefix = %cfg.prefix,
            "backup daemon started"
        );
        Ok(RunningDaemon {
            token,
            tasks,
            aggregator,
            cfg,
        })
    }
}

/// Handle on a started daemon.
#[derive(Debug)]
pub struct RunningDaemon {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    aggregator: ChangeAggregator,
    cfg: Arc<DaemonConfig>,
}

impl RunningDaemon {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn aggregator(&self) -> &ChangeAggregator {
        &self.aggregator
    }

    /// Cancel every task and wait for them, for at most the configured bound. If `force`
    /// completes first the wait is abandoned.
    pub async fn shutdown<F>(self, force: F) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        info!(timeout = ?self.cfg.shutdown_timeout, "shutting down");
        self.token.cancel();
        let aborts: Vec<_> = self.tasks.iter().map(JoinHandle::abort_handle).collect();
        let outcome = tokio::select! {
            results = join_all(self.tasks) => {
                for res in results {
                    if let Err(e) = res {
                        warn!("task ended abnormally: {e}");
                    }
                }
                ShutdownOutcome::Graceful
            }
            _ = tokio::time::sleep(self.cfg.shutdown_timeout) => ShutdownOutcome::TimedOut,
            _ = force => ShutdownOutcome::Forced,
        };
        if outcome != ShutdownOutcome::Graceful {
            warn!(?outcome, "tasks still running, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_op::{Action, RawEvent, RawKind};
    use crate::storage::{path_key, INTENT_COLLECTION};
    use crate::testing::{config_for, ChannelWatch, MemoryObjectStore};
    use std::path::Path;
    use std::time::Duration;

    struct Harness {
        dir: tempfile::TempDir,
        store: Arc<IntentStore>,
        remote: Arc<MemoryObjectStore>,
        watch: ChannelWatch,
        daemon: RunningDaemon,
    }

    fn start(remote: MemoryObjectStore, tune: impl FnOnce(&mut DaemonConfig)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut cfg = config_for(&root);
        tune(&mut cfg);
        let store = Arc::new(IntentStore::open(&cfg.store_path, INTENT_COLLECTION).unwrap());
        let remote = Arc::new(remote);
        let watch = ChannelWatch::default();
        let daemon = Supervisor::new(Arc::new(cfg), store.clone(), remote.clone())
            .unwrap()
            .start(watch.clone())
            .unwrap();
        Harness {
            dir,
            store,
            remote,
            watch,
            daemon,
        }
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn created_file_reaches_the_bucket() {
        let h = start(MemoryObjectStore::new(), |cfg| {
            cfg.persist_interval = Duration::from_millis(100);
            cfg.reconcile_interval = Duration::from_millis(400);
        });
        let root = h.watch.root().unwrap();
        let file = root.join("a.txt");
        std::fs::write(&file, b"contents").unwrap();

        h.watch
            .sender()
            .send(RawEvent::new(RawKind::Create, file.clone()))
            .await
            .unwrap();
        eventually("aggregated intent", || {
            h.daemon.aggregator().get(&file) == Some(Action::Add)
                || h.store.get(&path_key(&file)).unwrap().is_some()
                || !h.remote.puts().is_empty()
        })
        .await;
        eventually("persisted record", || {
            h.store.get(&path_key(&file)).unwrap().as_deref() == Some("add")
                || !h.remote.puts().is_empty()
        })
        .await;
        eventually("upload", || h.remote.puts() == vec!["prefix/a.txt".to_string()]).await;
        eventually("record cleared", || h.store.is_empty().unwrap()).await;
        assert_eq!(h.remote.object("prefix/a.txt").as_deref(), Some(&b"contents"[..]));

        let outcome = h.daemon.shutdown(std::future::pending()).await;
        assert_eq!(outcome, ShutdownOutcome::Graceful);
        assert!(h.watch.unsubscribed());
        drop(h.dir);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn store_file_changes_are_ignored() {
        let h = start(MemoryObjectStore::new(), |cfg| {
            cfg.persist_interval = Duration::from_secs(3600);
        });
        let root = h.watch.root().unwrap();
        let tx = h.watch.sender();
        tx.send(RawEvent::new(RawKind::Write, root.join("dirkeep.db")))
            .await
            .unwrap();
        tx.send(RawEvent::new(RawKind::Write, root.join("dirkeep.db-journal")))
            .await
            .unwrap();
        tx.send(RawEvent::new(RawKind::Write, root.join("real.txt")))
            .await
            .unwrap();
        eventually("real file intent", || {
            h.daemon.aggregator().get(&root.join("real.txt")).is_some()
        })
        .await;
        assert_eq!(h.daemon.aggregator().len(), 1);
        h.daemon.shutdown(std::future::pending()).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_lets_the_inflight_item_finish() {
        let (remote, gate) = MemoryObjectStore::new().gated();
        let started = remote.put_started();
        let h = start(remote, |cfg| {
            cfg.reconcile_interval = Duration::from_millis(50);
            cfg.shutdown_timeout = Duration::from_secs(5);
        });
        let root = h.watch.root().unwrap();
        for name in ["a.txt", "b.txt"] {
            let file = root.join(name);
            std::fs::write(&file, name.as_bytes()).unwrap();
            h.store.put(&path_key(&file), Action::Add).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), started.notified())
            .await
            .unwrap();
        let release = {
            let gate = gate.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                gate.add_permits(10);
            })
        };
        let outcome = h.daemon.shutdown(std::future::pending()).await;
        release.await.unwrap();

        assert_eq!(outcome, ShutdownOutcome::Graceful);
        assert_eq!(h.remote.puts(), vec!["prefix/a.txt".to_string()]);
        assert_eq!(
            h.store.entries().unwrap(),
            vec![(path_key(&root.join("b.txt")), "add".to_string())]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stuck_task_hits_the_bound() {
        let (remote, _gate) = MemoryObjectStore::new().gated();
        let started = remote.put_started();
        let h = start(remote, |cfg| {
            cfg.reconcile_interval = Duration::from_millis(50);
            cfg.shutdown_timeout = Duration::from_millis(200);
        });
        let file = h.watch.root().unwrap().join("a.txt");
        std::fs::write(&file, b"a").unwrap();
        h.store.put(&path_key(&file), Action::Add).unwrap();
        tokio::time::timeout(Duration::from_secs(5), started.notified())
            .await
            .unwrap();

        let outcome = h.daemon.shutdown(std::future::pending()).await;
        assert_eq!(outcome, ShutdownOutcome::TimedOut);
        assert_eq!(h.store.len().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_signal_forces() {
        let (remote, _gate) = MemoryObjectStore::new().gated();
        let started = remote.put_started();
        let h = start(remote, |cfg| {
            cfg.reconcile_interval = Duration::from_millis(50);
            cfg.shutdown_timeout = Duration::from_secs(30);
        });
        let file = h.watch.root().unwrap().join("a.txt");
        std::fs::write(&file, b"a").unwrap();
        h.store.put(&path_key(&file), Action::Add).unwrap();
        tokio::time::timeout(Duration::from_secs(5), started.notified())
            .await
            .unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            h.daemon.shutdown(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ShutdownOutcome::Forced);
    }

    #[test]
    fn failed_subscription_is_fatal() {
        struct Broken;
        impl WatchService for Broken {
            fn subscribe(
                &mut self,
                root: &Path,
                _tx: mpsc::Sender<RawEvent>,
            ) -> Result<(), WatchError> {
                Err(WatchError::NotADirectory(root.to_path_buf()))
            }
            fn unsubscribe(&mut self) {}
        }
        let dir = tempfile::tempdir().unwrap();
        let cfg = Arc::new(config_for(dir.path()));
        let store = Arc::new(IntentStore::open_in_memory(INTENT_COLLECTION).unwrap());
        let sup = Supervisor::new(cfg, store, Arc::new(MemoryObjectStore::new())).unwrap();
        assert!(matches!(sup.start(Broken), Err(WatchError::NotADirectory(_))));
    }
}
