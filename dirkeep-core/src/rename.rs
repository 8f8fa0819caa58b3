//! Pairs moved-from / moved-to halves sharing a correlation id.
//!
//! Each half yields its own intent immediately (Remove for the source, Add for the
//! destination); the table only records which paths belonged to the same move so the pair can
//! be logged. Entries whose partner never shows up are dropped by [`RenameCorrelator::evict_expired`].

use crate::file_op::{CorrelationId, FileChangeIntent, RawEvent, RawKind};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub from: Option<PathBuf>,
    pub to: Option<PathBuf>,
    first_seen: Instant,
}

#[derive(Debug)]
pub struct RenameCorrelator {
    moves: HashMap<CorrelationId, PendingMove>,
    ttl: Duration,
}

impl RenameCorrelator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            moves: HashMap::new(),
            ttl,
        }
    }

    /// Handle one half of a move and return the intent it implies. Non-move events yield `None`.
    pub fn handle(&mut self, event: RawEvent) -> Option<FileChangeIntent> {
        let intent = match event.kind {
            RawKind::MovedFrom => FileChangeIntent::remove(event.path.clone()),
            RawKind::MovedTo => FileChangeIntent::add(event.path.clone()),
            _ => return None,
        };
        if let Some(token) = event.correlation {
            self.track(token, event.kind, event.path);
        }
        Some(intent)
    }

    fn track(&mut self, token: CorrelationId, kind: RawKind, path: PathBuf) {
        let now = Instant::now();
        let entry = self.moves.entry(token).or_insert_with(|| PendingMove {
            from: None,
            to: None,
            first_seen: now,
        });
        if kind == RawKind::MovedFrom {
            entry.from = Some(path);
        } else {
            entry.to = Some(path);
        }
        if entry.from.is_none() || entry.to.is_none() {
            return;
        }
        if let Some(PendingMove {
            from: Some(from),
            to: Some(to),
            ..
        }) = self.moves.remove(&token)
        {
            debug!(%token, from = %from.display(), to = %to.display(), "file moved");
        }
    }

    /// Drop half-completed moves older than the configured TTL. Returns how many were dropped.
    pub fn evict_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.moves.len();
        self.moves.retain(|token, pending| {
            let keep = pending.first_seen.elapsed() < ttl;
            if !keep {
                trace!(%token, ?pending.from, ?pending.to, "evicting unpaired move");
            }
            keep
        });
        before - self.moves.len()
    }

    pub fn pending(&self, token: CorrelationId) -> Option<&PendingMove> {
        self.moves.get(&token)
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_yields_remove_and_add() {
        let mut c = RenameCorrelator::new(Duration::from_secs(60));
        let a = c.handle(RawEvent::moved(RawKind::MovedFrom, "/r/p1", 9));
        assert_eq!(c.len(), 1);
        assert_eq!(
            c.pending(CorrelationId(9)).and_then(|m| m.from.clone()),
            Some(PathBuf::from("/r/p1"))
        );
        let b = c.handle(RawEvent::moved(RawKind::MovedTo, "/r/p2", 9));
        assert_eq!(a, Some(FileChangeIntent::remove("/r/p1")));
        assert_eq!(b, Some(FileChangeIntent::add("/r/p2")));
        assert!(c.is_empty());
    }

    #[test]
    fn halves_without_token_still_emit() {
        let mut c = RenameCorrelator::new(Duration::from_secs(60));
        let a = c.handle(RawEvent::new(RawKind::MovedTo, "/r/x"));
        assert_eq!(a, Some(FileChangeIntent::add("/r/x")));
        assert!(c.is_empty());
        assert_eq!(c.handle(RawEvent::new(RawKind::Write, "/r/x")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unpaired_halves_expire() {
        let mut c = RenameCorrelator::new(Duration::from_secs(60));
        c.handle(RawEvent::moved(RawKind::MovedFrom, "/r/old", 1));
        tokio::time::advance(Duration::from_secs(30)).await;
        c.handle(RawEvent::moved(RawKind::MovedTo, "/r/new", 2));
        assert_eq!(c.evict_expired(), 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(c.evict_expired(), 1);
        assert!(c.pending(CorrelationId(1)).is_none());
        assert!(c.pending(CorrelationId(2)).is_some());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(c.evict_expired(), 1);
        assert!(c.is_empty());
    }
}
