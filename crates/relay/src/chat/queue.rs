// Matching queue for connections waiting on a partner.
//
// Pairing is greedy earliest-available: a caller is matched with the
// oldest other entry in the queue, regardless of its own position.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::registry::ConnectionId;

/// Default age after which a waiting entry is evicted.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub connection_id: ConnectionId,
    pub joined_at: Instant,
}

#[derive(Debug, Default)]
pub struct MatchingQueue {
    entries: VecDeque<QueueEntry>,
}

impl MatchingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` unless it is already queued. Returns true when added.
    pub fn enqueue(&mut self, id: ConnectionId, now: Instant) -> bool {
        if self.contains(id) {
            return false;
        }
        self.entries.push_back(QueueEntry { connection_id: id, joined_at: now });
        true
    }

    pub fn dequeue(&mut self, id: ConnectionId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Pair `id` with the earliest other waiting entry, removing both.
    ///
    /// Returns `None` and leaves the queue untouched when `id` is not
    /// queued or nobody else is waiting.
    pub fn try_match(&mut self, id: ConnectionId) -> Option<ConnectionId> {
        self.position(id)?;
        let partner_index = self.entries.iter().position(|entry| entry.connection_id != id)?;
        let partner = self.entries.remove(partner_index)?.connection_id;
        self.dequeue(id);
        Some(partner)
    }

    /// Remove every entry that has waited longer than `max_age`, oldest first.
    pub fn evict_stale(&mut self, now: Instant, max_age: Duration) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        self.entries.retain(|entry| {
            let stale = now.saturating_duration_since(entry.joined_at) > max_age;
            if stale {
                evicted.push(entry.connection_id);
            }
            !stale
        });
        evicted
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.position(id).is_some()
    }

    pub fn joined_at(&self, id: ConnectionId) -> Option<Instant> {
        self.entries.iter().find(|entry| entry.connection_id == id).map(|entry| entry.joined_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: ConnectionId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.connection_id == id)
    }
}
