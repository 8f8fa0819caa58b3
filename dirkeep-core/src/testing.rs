//! Fakes shared by the unit tests.

use crate::config::DaemonConfig;
use crate::error::WatchError;
use crate::file_op::RawEvent;
use crate::remote::{ListPage, ObjectStore};
use crate::watcher::WatchService;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};

pub fn config_for(root: &Path) -> DaemonConfig {
    DaemonConfig {
        backup_dir: root.to_path_buf(),
        bucket: "bucket".into(),
        prefix: "prefix".into(),
        reconcile_interval: Duration::from_secs(3600),
        persist_interval: Duration::from_secs(600),
        store_path: root.join("dirkeep.db"),
        shutdown_timeout: Duration::from_secs(5),
        rename_ttl: Duration::from_secs(60),
        include: Vec::new(),
        exclude: Vec::new(),
        endpoint: None,
        region: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Put { key: String },
    List { prefix: String, continuation: Option<String> },
    Delete { key: String },
}

/// Bucket held in a sorted map. Continuation tokens are the last key of the previous page.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    calls: Mutex<Vec<Call>>,
    failing_puts: HashSet<String>,
    page_size: Option<usize>,
    gate: Option<Arc<Semaphore>>,
    put_started: Arc<Notify>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, n: usize) -> Self {
        self.page_size = Some(n);
        self
    }

    pub fn fail_put(mut self, key: &str) -> Self {
        self.failing_puts.insert(key.to_string());
        self
    }

    /// Every put waits for a permit on the returned semaphore.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Notified each time a put begins.
    pub fn put_started(&self) -> Arc<Notify> {
        self.put_started.clone()
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn puts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Put { key } => Some(key),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, local: &Path) -> Result<()> {
        self.put_started.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        self.calls.lock().unwrap().push(Call::Put {
            key: key.to_string(),
        });
        if self.failing_puts.contains(key) {
            return Err(anyhow!("injected failure for {key}"));
        }
        let data = tokio::fs::read(local).await?;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage> {
        self.calls.lock().unwrap().push(Call::List {
            prefix: prefix.to_string(),
            continuation: continuation.clone(),
        });
        let objects = self.objects.lock().unwrap();
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation.as_ref().map_or(true, |after| k.as_str() > after.as_str()))
            .cloned()
            .collect();
        let limit = self.page_size.unwrap_or(1000);
        let is_truncated = keys.len() > limit;
        keys.truncate(limit);
        let next_token = if is_truncated { keys.last().cloned() } else { None };
        Ok(ListPage {
            keys,
            is_truncated,
            next_token,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Delete {
            key: key.to_string(),
        });
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Watch service whose events are injected by the test.
#[derive(Debug, Clone, Default)]
pub struct ChannelWatch {
    tx: Arc<Mutex<Option<mpsc::Sender<RawEvent>>>>,
    root: Arc<Mutex<Option<PathBuf>>>,
    unsubscribed: Arc<Mutex<bool>>,
}

impl ChannelWatch {
    pub fn sender(&self) -> mpsc::Sender<RawEvent> {
        self.tx
            .lock()
            .unwrap()
            .clone()
            .expect("subscribe was not called")
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.root.lock().unwrap().clone()
    }

    pub fn unsubscribed(&self) -> bool {
        *self.unsubscribed.lock().unwrap()
    }
}

impl WatchService for ChannelWatch {
    fn subscribe(&mut self, root: &Path, tx: mpsc::Sender<RawEvent>) -> Result<(), WatchError> {
        *self.tx.lock().unwrap() = Some(tx);
        *self.root.lock().unwrap() = Some(root.to_path_buf());
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.tx.lock().unwrap().take();
        *self.unsubscribed.lock().unwrap() = true;
    }
}
