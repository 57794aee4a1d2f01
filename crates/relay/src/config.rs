// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Chat tuning knobs live here too and are handed to the
// dispatcher as a `DispatchConfig`.

use std::net::SocketAddr;
use std::time::Duration;

use duet_common::filter::{WordListFilter, DEFAULT_TERMS};

use crate::chat::dispatcher::{DispatchConfig, DEFAULT_QUEUE_SWEEP_INTERVAL, DEFAULT_TYPING_SWEEP_INTERVAL};
use crate::chat::queue::DEFAULT_MAX_WAIT;
use crate::chat::rate_limit::{RateLimitConfig, DEFAULT_MAX_MESSAGES, DEFAULT_WINDOW};
use crate::chat::typing::DEFAULT_TYPING_TIMEOUT;
use crate::chat::MAX_TIMER_DURATION;

const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `duet_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    pub rate_limit_messages: u32,
    pub rate_limit_window: Duration,
    pub queue_max_wait: Duration,
    pub queue_sweep_interval: Duration,
    pub typing_timeout: Duration,
    /// Filtered terms; the built-in list when unset.
    pub filter_terms: Vec<String>,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `DUET_RELAY_HOST` | `0.0.0.0` |
    /// | `DUET_RELAY_PORT` (then `PORT`) | `3000` |
    /// | `DUET_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `DUET_RELAY_LOG_FILTER` | `info` |
    /// | `DUET_RELAY_LOG_FORMAT` | `text` |
    /// | `DUET_RELAY_RATE_LIMIT_MESSAGES` | `30` |
    /// | `DUET_RELAY_RATE_LIMIT_WINDOW_SECS` | `60` |
    /// | `DUET_RELAY_QUEUE_MAX_WAIT_SECS` | `300` |
    /// | `DUET_RELAY_QUEUE_SWEEP_SECS` | `60` |
    /// | `DUET_RELAY_TYPING_TIMEOUT_MS` | `5000` |
    /// | `DUET_RELAY_FILTER_TERMS` | built-in word list |
    ///
    /// Unparseable, zero, or longer-than-a-day durations fall back to the default.
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("DUET_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = env("DUET_RELAY_PORT")
            .or_else(|_| env("PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let cors_origins = env("DUET_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("DUET_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("DUET_RELAY_LOG_FORMAT") {
            Ok(value) if value.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let positive = |key: &str| env(key).ok().and_then(|v| v.trim().parse::<u64>().ok()).filter(|v| *v > 0);
        let rate_limit_messages = positive("DUET_RELAY_RATE_LIMIT_MESSAGES")
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(DEFAULT_MAX_MESSAGES);
        let bounded = |value: Option<Duration>| value.filter(|d| *d <= MAX_TIMER_DURATION);
        let rate_limit_window = bounded(positive("DUET_RELAY_RATE_LIMIT_WINDOW_SECS").map(Duration::from_secs))
            .unwrap_or(DEFAULT_WINDOW);
        let queue_max_wait = bounded(positive("DUET_RELAY_QUEUE_MAX_WAIT_SECS").map(Duration::from_secs))
            .unwrap_or(DEFAULT_MAX_WAIT);
        let queue_sweep_interval = bounded(positive("DUET_RELAY_QUEUE_SWEEP_SECS").map(Duration::from_secs))
            .unwrap_or(DEFAULT_QUEUE_SWEEP_INTERVAL);
        let typing_timeout = bounded(positive("DUET_RELAY_TYPING_TIMEOUT_MS").map(Duration::from_millis))
            .unwrap_or(DEFAULT_TYPING_TIMEOUT);

        let filter_terms = env("DUET_RELAY_FILTER_TERMS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|term| !term.is_empty())
                    .map(ToOwned::to_owned)
                    .collect::<Vec<_>>()
            })
            .filter(|terms| !terms.is_empty())
            .unwrap_or_else(|| DEFAULT_TERMS.iter().map(|term| term.to_string()).collect());

        Self {
            listen_addr,
            cors_origins,
            log_filter,
            log_format,
            rate_limit_messages,
            rate_limit_window,
            queue_max_wait,
            queue_sweep_interval,
            typing_timeout,
            filter_terms,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            rate_limit: RateLimitConfig {
                max_messages: self.rate_limit_messages,
                window: self.rate_limit_window,
            },
            max_queue_wait: self.queue_max_wait,
            queue_sweep_interval: self.queue_sweep_interval,
            typing_timeout: self.typing_timeout,
            typing_sweep_interval: DEFAULT_TYPING_SWEEP_INTERVAL,
        }
    }

    pub fn content_filter(&self) -> WordListFilter {
        WordListFilter::new(self.filter_terms.iter().map(String::as_str))
    }
}
