use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use crate::error::ErrorCode;

const KNOWN_HTTP_PATHS: [&str; 4] = ["/", "/ws", "/api/health", "/metrics"];
const OTHER_PATH_LABEL: &str = "other";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct HttpMetricKey {
    path: String,
    status_class: String,
}

/// Relay counters, shared through an `Arc` and rendered on `/metrics`.
#[derive(Default)]
pub struct RelayMetrics {
    http_requests_total: Mutex<HashMap<HttpMetricKey, u64>>,
    ws_events_total: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    connections_opened_total: AtomicU64,
    connections_closed_total: AtomicU64,
    sessions_matched_total: AtomicU64,
    messages_relayed_total: AtomicU64,
    messages_dropped_total: AtomicU64,
    queue_evictions_total: AtomicU64,
    reports_total: AtomicU64,
}

impl RelayMetrics {
    pub fn record_http_request(&self, path: &str, status_code: u16) {
        let key = HttpMetricKey {
            path: normalize_path(path),
            status_class: format!("{}xx", status_code / 100),
        };
        increment_counter(&self.http_requests_total, key, 1);
    }

    pub fn record_ws_event(&self, event: &str) {
        increment_counter(&self.ws_events_total, event.to_string(), 1);
    }

    pub fn record_ws_error(&self, code: ErrorCode) {
        increment_counter(&self.ws_errors_total, code.as_str().to_string(), 1);
    }

    pub fn increment_connections_opened(&self) {
        self.connections_opened_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_connections_closed(&self) {
        self.connections_closed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_sessions_matched(&self) {
        self.sessions_matched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_messages_relayed(&self) {
        self.messages_relayed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_messages_dropped(&self) {
        self.messages_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_queue_evictions(&self, count: u64) {
        self.queue_evictions_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_reports(&self) {
        self.reports_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sessions_matched(&self) -> u64 {
        self.sessions_matched_total.load(Ordering::Relaxed)
    }

    pub fn messages_relayed(&self) -> u64 {
        self.messages_relayed_total.load(Ordering::Relaxed)
    }

    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_total.load(Ordering::Relaxed)
    }

    pub fn queue_evictions(&self) -> u64 {
        self.queue_evictions_total.load(Ordering::Relaxed)
    }

    pub fn ws_errors(&self, code: ErrorCode) -> u64 {
        self.ws_errors_total
            .lock()
            .map(|guard| guard.get(code.as_str()).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP duet_http_requests_total Total HTTP requests by path and status class.\n");
        output.push_str("# TYPE duet_http_requests_total counter\n");
        if let Ok(guard) = self.http_requests_total.lock() {
            let sorted: BTreeMap<_, _> = guard.iter().collect();
            for (key, value) in sorted {
                output.push_str(&format!(
                    "duet_http_requests_total{{path=\"{}\",status=\"{}\"}} {}\n",
                    escape_label_value(&key.path),
                    key.status_class,
                    value
                ));
            }
        }

        output.push_str("# HELP duet_ws_events_total Inbound websocket messages by type.\n");
        output.push_str("# TYPE duet_ws_events_total counter\n");
        append_label_counter_lines(&mut output, "duet_ws_events_total", "type", &self.ws_events_total);

        output.push_str("# HELP duet_ws_errors_total Error frames sent to clients by code.\n");
        output.push_str("# TYPE duet_ws_errors_total counter\n");
        append_label_counter_lines(&mut output, "duet_ws_errors_total", "code", &self.ws_errors_total);

        for (name, help, counter) in [
            ("duet_connections_opened_total", "Websocket connections registered.", &self.connections_opened_total),
            ("duet_connections_closed_total", "Websocket connections removed.", &self.connections_closed_total),
            ("duet_sessions_matched_total", "Chat sessions established.", &self.sessions_matched_total),
            ("duet_messages_relayed_total", "Chat messages delivered to a partner.", &self.messages_relayed_total),
            (
                "duet_messages_dropped_total",
                "Chat messages dropped because the partner transport was closed.",
                &self.messages_dropped_total,
            ),
            ("duet_queue_evictions_total", "Waiting connections evicted as stale.", &self.queue_evictions_total),
            ("duet_reports_total", "Reports received from clients.", &self.reports_total),
        ] {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name} {}\n", counter.load(Ordering::Relaxed)));
        }

        output
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    let path = if trimmed.is_empty() { "/" } else { trimmed };
    if KNOWN_HTTP_PATHS.contains(&path) {
        path.to_string()
    } else {
        OTHER_PATH_LABEL.to_string()
    }
}

fn increment_counter<K>(map: &Mutex<HashMap<K, u64>>, key: K, delta: u64)
where
    K: std::hash::Hash + Eq,
{
    if let Ok(mut guard) = map.lock() {
        let value = guard.entry(key).or_insert(0);
        *value = value.saturating_add(delta);
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let Ok(guard) = map.lock() else {
        return;
    };
    let sorted: BTreeMap<_, _> = guard.iter().collect();
    for (value_label, value) in sorted {
        output.push_str(&format!(
            "{metric_name}{{{label}=\"{}\"}} {value}\n",
            escape_label_value(value_label)
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}
