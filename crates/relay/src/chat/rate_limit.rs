// Fixed-window message rate limiting per connection.
//
// The window restarts on the first message after it expires, so a burst
// straddling a boundary can admit up to twice the nominal rate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::registry::ConnectionId;
use super::MAX_TIMER_DURATION;

pub const DEFAULT_MAX_MESSAGES: u32 = 30;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_messages: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_messages: DEFAULT_MAX_MESSAGES, window: DEFAULT_WINDOW }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub reset_at: Instant,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: HashMap<ConnectionId, RateWindow>,
}

impl RateLimiter {
    /// Windows longer than [`MAX_TIMER_DURATION`] are cut down to it.
    pub fn new(config: RateLimitConfig) -> Self {
        let config = RateLimitConfig { window: config.window.min(MAX_TIMER_DURATION), ..config };
        Self { config, windows: HashMap::new() }
    }

    /// Count one message for `id` at `now`. Rejected messages do not count.
    pub fn allow(&mut self, id: ConnectionId, now: Instant) -> bool {
        let window = self.windows.entry(id).or_insert(RateWindow { count: 0, reset_at: now });
        if window.count == 0 || now > window.reset_at {
            let reset_at = now.checked_add(self.config.window).unwrap_or(now);
            *window = RateWindow { count: 1, reset_at };
            return true;
        }

        if window.count < self.config.max_messages {
            window.count += 1;
            return true;
        }

        false
    }

    pub fn window(&self, id: ConnectionId) -> Option<RateWindow> {
        self.windows.get(&id).copied()
    }

    pub fn forget(&mut self, id: ConnectionId) -> bool {
        self.windows.remove(&id).is_some()
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirtieth_message_passes_and_thirty_first_is_rejected() {
        let mut limiter = RateLimiter::default();
        let id = ConnectionId::new();
        let start = Instant::now();

        for n in 0..30 {
            assert!(limiter.allow(id, start + Duration::from_secs(n)), "message {} should pass", n + 1);
        }
        assert!(!limiter.allow(id, start + Duration::from_secs(59)));
        assert_eq!(limiter.window(id).map(|w| w.count), Some(30));
    }

    #[test]
    fn rejection_does_not_move_the_window() {
        let mut limiter = RateLimiter::new(RateLimitConfig { max_messages: 1, window: DEFAULT_WINDOW });
        let id = ConnectionId::new();
        let start = Instant::now();

        assert!(limiter.allow(id, start));
        let before = limiter.window(id);
        assert!(!limiter.allow(id, start + Duration::from_secs(30)));
        assert_eq!(limiter.window(id), before);
    }

    #[test]
    fn message_after_window_restarts_it() {
        let mut limiter = RateLimiter::default();
        let id = ConnectionId::new();
        let start = Instant::now();
        for _ in 0..30 {
            assert!(limiter.allow(id, start));
        }
        assert!(!limiter.allow(id, start + DEFAULT_WINDOW));

        let later = start + DEFAULT_WINDOW + Duration::from_millis(1);
        assert!(limiter.allow(id, later));
        assert_eq!(
            limiter.window(id),
            Some(RateWindow { count: 1, reset_at: later + DEFAULT_WINDOW })
        );
    }

    #[test]
    fn windows_are_per_connection() {
        let mut limiter = RateLimiter::new(RateLimitConfig { max_messages: 1, window: DEFAULT_WINDOW });
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        let now = Instant::now();

        assert!(limiter.allow(a, now));
        assert!(!limiter.allow(a, now));
        assert!(limiter.allow(b, now));
    }

    #[test]
    fn oversized_window_is_capped() {
        let mut limiter = RateLimiter::new(RateLimitConfig { max_messages: 1, window: Duration::MAX });
        let id = ConnectionId::new();
        let now = Instant::now();

        assert!(limiter.allow(id, now));
        assert_eq!(limiter.window(id).map(|w| w.reset_at), Some(now + MAX_TIMER_DURATION));
        assert!(!limiter.allow(id, now + Duration::from_secs(60)));
    }

    #[test]
    fn forget_drops_window() {
        let mut limiter = RateLimiter::default();
        let id = ConnectionId::new();
        limiter.allow(id, Instant::now());

        assert_eq!(limiter.tracked(), 1);
        assert!(limiter.forget(id));
        assert!(!limiter.forget(id));
        assert_eq!(limiter.tracked(), 0);
    }
}
