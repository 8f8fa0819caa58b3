//! Routes raw watch events onto the regular and rename streams, and the two handler loops
//! that turn those streams into intents.

use crate::aggregator::ChangeAggregator;
use crate::file_op::{FileChangeIntent, RawEvent, RawKind};
use crate::filter::PathFilter;
use crate::rename::RenameCorrelator;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Which internal stream an event belongs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Regular,
    Rename,
}

pub fn classify(kind: RawKind) -> Route {
    match kind {
        RawKind::Create | RawKind::Write | RawKind::Remove => Route::Regular,
        RawKind::MovedFrom | RawKind::MovedTo => Route::Rename,
    }
}

pub struct EventRouter {
    filter: PathFilter,
    regular_tx: mpsc::Sender<RawEvent>,
    rename_tx: mpsc::Sender<RawEvent>,
}

impl EventRouter {
    pub fn new(
        filter: PathFilter,
        regular_tx: mpsc::Sender<RawEvent>,
        rename_tx: mpsc::Sender<RawEvent>,
    ) -> Self {
        Self {
            filter,
            regular_tx,
            rename_tx,
        }
    }

    /// Forward events until the raw stream closes or the token is cancelled.
    pub async fn run(self, mut raw_rx: mpsc::Receiver<RawEvent>, token: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                ev = raw_rx.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
            };
            if !self.filter.check(&event.path) {
                trace!(path = %event.path.display(), "filtered out");
                continue;
            }
            let tx = match classify(event.kind) {
                Route::Regular => &self.regular_tx,
                Route::Rename => &self.rename_tx,
            };
            let sent = tokio::select! {
                _ = token.cancelled() => break,
                res = tx.send(event) => res,
            };
            if sent.is_err() {
                break;
            }
        }
        debug!("event router stopped");
    }
}

/// Translate create/write/remove events into aggregator intents.
pub async fn handle_regular_events(
    aggregator: ChangeAggregator,
    mut rx: mpsc::Receiver<RawEvent>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            ev = rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
        };
        let intent = match event.kind {
            RawKind::Create | RawKind::Write => FileChangeIntent::add(event.path),
            RawKind::Remove => FileChangeIntent::remove(event.path),
            RawKind::MovedFrom | RawKind::MovedTo => continue,
        };
        debug!(path = %intent.path.display(), action = %intent.action, "regular file change");
        aggregator.record(intent);
    }
    debug!("regular event handler stopped");
}

/// Feed move halves through the correlator, sweeping expired halves on a timer. The
/// correlator is handed back when the loop ends.
pub async fn handle_rename_events(
    aggregator: ChangeAggregator,
    mut correlator: RenameCorrelator,
    mut rx: mpsc::Receiver<RawEvent>,
    token: CancellationToken,
) -> RenameCorrelator {
    let sweep_every = sweep_period(correlator.ttl());
    let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + sweep_every, sweep_every);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = sweep.tick() => {
                let evicted = correlator.evict_expired();
                if evicted > 0 {
                    debug!(evicted, "dropped unpaired move halves");
                }
            }
            ev = rx.recv() => match ev {
                Some(ev) => {
                    if let Some(intent) = correlator.handle(ev) {
                        debug!(path = %intent.path.display(), action = %intent.action, "move half");
                        aggregator.record(intent);
                    }
                }
                None => break,
            },
        }
    }
    debug!(unpaired = correlator.len(), "rename event handler stopped");
    correlator
}

fn sweep_period(ttl: Duration) -> Duration {
    (ttl / 2).max(Duration::from_secs(1))
}
