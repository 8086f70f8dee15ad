//! Requests parked while a language server is initializing or indexing.
//!
//! Raw editor lines go into a bounded FIFO and are replayed through the
//! normal line handler once the blockage clears. The queue caps both depth
//! (oldest evicted) and age (stale entries dropped at flush time): an
//! editor that waited ten seconds for "goto definition" has moved on.

use crate::connection::ClientId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_CAPACITY: usize = 50;
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct DeferredRequest {
    pub client_id: ClientId,
    pub line: String,
    pub queued_at: Instant,
}

pub struct DeferredQueue {
    entries: VecDeque<DeferredRequest>,
    capacity: usize,
    ttl: Duration,
}

impl DeferredQueue {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            ttl,
        }
    }

    pub fn push(&mut self, client_id: ClientId, line: String) -> Option<DeferredRequest> {
        self.push_at(client_id, line, Instant::now())
    }

    fn push_at(
        &mut self,
        client_id: ClientId,
        line: String,
        queued_at: Instant,
    ) -> Option<DeferredRequest> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(DeferredRequest {
            client_id,
            line,
            queued_at,
        });
        evicted
    }

    /// Empties the queue, returning still-fresh entries in arrival order.
    pub fn drain_fresh(&mut self) -> Vec<DeferredRequest> {
        let ttl = self.ttl;
        let now = Instant::now();
        self.entries
            .drain(..)
            .filter(|entry| now.duration_since(entry.queued_at) <= ttl)
            .collect()
    }

    pub fn purge_client(&mut self, client_id: ClientId) {
        self.entries.retain(|entry| entry.client_id != client_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_evicts_the_oldest() {
        let mut queue = DeferredQueue::new(2, DEFAULT_TTL);
        assert!(queue.push(1, "a".into()).is_none());
        assert!(queue.push(1, "b".into()).is_none());
        let evicted = queue.push(1, "c".into()).unwrap();
        assert_eq!(evicted.line, "a");

        let lines: Vec<_> = queue.drain_fresh().into_iter().map(|e| e.line).collect();
        assert_eq!(lines, ["b", "c"]);
    }

    #[test]
    fn flush_drops_entries_past_the_ttl() {
        let mut queue = DeferredQueue::new(8, Duration::from_secs(10));
        let stale = Instant::now() - Duration::from_secs(30);
        queue.push_at(1, "old".into(), stale);
        queue.push(1, "fresh".into());

        let lines: Vec<_> = queue.drain_fresh().into_iter().map(|e| e.line).collect();
        assert_eq!(lines, ["fresh"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn purge_removes_only_that_client() {
        let mut queue = DeferredQueue::new(8, DEFAULT_TTL);
        queue.push(1, "a".into());
        queue.push(2, "b".into());
        queue.purge_client(1);

        let lines: Vec<_> = queue.drain_fresh().into_iter().map(|e| e.line).collect();
        assert_eq!(lines, ["b"]);
    }
}
