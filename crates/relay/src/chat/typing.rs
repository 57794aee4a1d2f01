// Typing-indicator expiry.
//
// A relayed `typing: true` arms a deadline for the sender. If the sender
// goes quiet past the deadline, the partner is sent `typing: false` so a
// stale indicator never sticks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::registry::ConnectionId;
use super::MAX_TIMER_DURATION;

pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct TypingTimers {
    timeout: Duration,
    deadlines: HashMap<ConnectionId, Instant>,
}

impl TypingTimers {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout: timeout.min(MAX_TIMER_DURATION), deadlines: HashMap::new() }
    }

    /// Start or extend the typing deadline for `id`.
    pub fn arm(&mut self, id: ConnectionId, now: Instant) {
        if let Some(deadline) = now.checked_add(self.timeout) {
            self.deadlines.insert(id, deadline);
        }
    }

    pub fn disarm(&mut self, id: ConnectionId) -> bool {
        self.deadlines.remove(&id).is_some()
    }

    pub fn is_armed(&self, id: ConnectionId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Remove and return every sender whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<ConnectionId> {
        let mut expired = Vec::new();
        self.deadlines.retain(|id, deadline| {
            if now >= *deadline {
                expired.push(*id);
                false
            } else {
                true
            }
        });
        expired.sort();
        expired
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }
}
