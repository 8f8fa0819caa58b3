//! Persistence stage: periodically moves the aggregator's contents into the durable store.

use crate::aggregator::ChangeAggregator;
use crate::error::StoreError;
use crate::storage::IntentStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct DurableQueue {
    aggregator: ChangeAggregator,
    store: Arc<IntentStore>,
}

impl DurableQueue {
    pub fn new(aggregator: ChangeAggregator, store: Arc<IntentStore>) -> Self {
        Self { aggregator, store }
    }

    /// Snapshot-and-clear the aggregator, then write every path that has no record yet.
    /// On error the snapshot is gone; only the store survives a failed tick.
    pub async fn persist_tick(&self) -> Result<usize, StoreError> {
        if self.aggregator.is_empty() {
            return Ok(0);
        }
        let snapshot = self.aggregator.snapshot_and_clear();
        let seen = snapshot.len();
        let store = self.store.clone();
        let written = tokio::task::spawn_blocking(move || store.merge_absent(&snapshot)).await??;
        info!(seen, written, skipped = seen - written, "persisted pending changes");
        if tracing::enabled!(tracing::Level::DEBUG) {
            self.dump().await;
        }
        Ok(written)
    }

    async fn dump(&self) {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.entries()).await {
            Ok(Ok(entries)) => {
                for (path, action) in entries {
                    debug!(%path, %action, "queued");
                }
            }
            Ok(Err(e)) => debug!("reading queue failed: {e}"),
            Err(e) => debug!("reading queue failed: {e}"),
        }
    }

    pub async fn run(self, period: Duration, token: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.persist_tick().await {
                        error!("persisting changes failed, tick abandoned: {e}");
                    }
                }
            }
        }
        debug!("durable queue stopped");
    }
}
