// Connection event dispatcher.
//
// One task owns every piece of chat state and handles inbound frames,
// transport lifecycle events and timer sweeps strictly one at a time.
// Socket tasks only ever talk to it through a `DispatcherHandle`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use duet_common::filter::ContentFilter;
use duet_common::protocol::ws::{
    decode_client_message, ClientMessage, ServerMessage, StatusKind, REPORT_RECEIVED_TEXT,
    TIMEOUT_TEXT, WAITING_TEXT, WELCOME_TEXT,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::queue::{MatchingQueue, DEFAULT_MAX_WAIT};
use super::rate_limit::{RateLimitConfig, RateLimiter};
use super::registry::{ConnectionId, ConnectionStatus, Outbound, Registry};
use super::router::{Delivery, MessageRouter};
use super::session::{DissolveReason, SessionCoordinator};
use super::typing::{TypingTimers, DEFAULT_TYPING_TIMEOUT};
use super::MAX_TIMER_DURATION;
use crate::error::ChatError;
use crate::metrics::RelayMetrics;

pub const DEFAULT_QUEUE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_TYPING_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// `tokio::time::interval` panics on a zero period.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub rate_limit: RateLimitConfig,
    pub max_queue_wait: Duration,
    pub queue_sweep_interval: Duration,
    pub typing_timeout: Duration,
    pub typing_sweep_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            max_queue_wait: DEFAULT_MAX_WAIT,
            queue_sweep_interval: DEFAULT_QUEUE_SWEEP_INTERVAL,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            typing_sweep_interval: DEFAULT_TYPING_SWEEP_INTERVAL,
        }
    }
}

impl DispatchConfig {
    /// Clamp every duration into the range the timers can schedule.
    pub fn bounded(self) -> Self {
        let sweep = |period: Duration| period.clamp(MIN_SWEEP_INTERVAL, MAX_TIMER_DURATION);
        Self {
            rate_limit: RateLimitConfig {
                window: self.rate_limit.window.min(MAX_TIMER_DURATION),
                ..self.rate_limit
            },
            max_queue_wait: self.max_queue_wait.min(MAX_TIMER_DURATION),
            queue_sweep_interval: sweep(self.queue_sweep_interval),
            typing_timeout: self.typing_timeout.min(MAX_TIMER_DURATION),
            typing_sweep_interval: sweep(self.typing_sweep_interval),
        }
    }
}

/// Why a socket task ended. Every variant gets the same cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    TransportFailure,
    HeartbeatTimeout,
    FrameTooLarge,
}

impl CloseReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportFailure => "transport_failure",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::FrameTooLarge => "frame_too_large",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub waiting: usize,
    pub chatting: usize,
}

pub enum DispatchEvent {
    Connected { outbound: Outbound, reply: oneshot::Sender<ConnectionId> },
    Frame { id: ConnectionId, raw: String },
    Closed { id: ConnectionId, reason: CloseReason },
    Stats { reply: oneshot::Sender<HubStats> },
}

/// Cloneable entry point into the dispatcher task.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    events: mpsc::UnboundedSender<DispatchEvent>,
}

impl DispatcherHandle {
    /// Register a new connection. `None` once the dispatcher has stopped.
    pub async fn connect(&self, outbound: Outbound) -> Option<ConnectionId> {
        let (reply, response) = oneshot::channel();
        self.events.send(DispatchEvent::Connected { outbound, reply }).ok()?;
        response.await.ok()
    }

    pub fn frame(&self, id: ConnectionId, raw: String) -> bool {
        self.events.send(DispatchEvent::Frame { id, raw }).is_ok()
    }

    pub fn closed(&self, id: ConnectionId, reason: CloseReason) {
        let _ = self.events.send(DispatchEvent::Closed { id, reason });
    }

    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, response) = oneshot::channel();
        self.events.send(DispatchEvent::Stats { reply }).ok()?;
        response.await.ok()
    }

    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }
}

pub struct Dispatcher {
    registry: Registry,
    queue: MatchingQueue,
    sessions: SessionCoordinator,
    router: MessageRouter,
    typing: TypingTimers,
    config: DispatchConfig,
    metrics: Arc<RelayMetrics>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        filter: Box<dyn ContentFilter>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let config = config.bounded();
        Self {
            registry: Registry::new(),
            queue: MatchingQueue::new(),
            sessions: SessionCoordinator::new(),
            router: MessageRouter::new(RateLimiter::new(config.rate_limit), filter),
            typing: TypingTimers::new(config.typing_timeout),
            config,
            metrics,
        }
    }

    pub fn with_sessions(mut self, sessions: SessionCoordinator) -> Self {
        self.sessions = sessions;
        self
    }

    /// Move the dispatcher onto its own task and return a handle to it.
    pub fn spawn(self) -> DispatcherHandle {
        let (events, receiver) = mpsc::unbounded_channel();
        tokio::spawn(self.run(receiver));
        DispatcherHandle { events }
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<DispatchEvent>) {
        let mut queue_sweep = tokio::time::interval(self.config.queue_sweep_interval);
        queue_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        queue_sweep.reset();
        let mut typing_sweep = tokio::time::interval(self.config.typing_sweep_interval);
        typing_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        typing_sweep.reset();

        info!("dispatcher started");
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        break;
                    };
                    self.handle(event, Instant::now());
                }
                _ = queue_sweep.tick() => {
                    self.sweep_stale(Instant::now());
                }
                _ = typing_sweep.tick() => {
                    self.sweep_typing(Instant::now());
                }
            }
        }
        info!("dispatcher stopped");
    }

    pub fn handle(&mut self, event: DispatchEvent, now: Instant) {
        match event {
            DispatchEvent::Connected { outbound, reply } => {
                let id = self.connect(outbound, now);
                if reply.send(id).is_err() {
                    // The socket task gave up before learning its id.
                    self.close(id, CloseReason::TransportFailure, now);
                }
            }
            DispatchEvent::Frame { id, raw } => self.handle_frame(id, &raw, now),
            DispatchEvent::Closed { id, reason } => {
                self.close(id, reason, now);
            }
            DispatchEvent::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    pub fn connect(&mut self, outbound: Outbound, now: Instant) -> ConnectionId {
        let id = self.registry.register(outbound, now);
        self.registry.send(
            id,
            ServerMessage::Welcome { client_id: id.to_string(), message: WELCOME_TEXT.to_string() },
        );
        self.metrics.increment_connections_opened();
        info!(connection_id = %id, connections = self.registry.len(), "client connected");
        id
    }

    pub fn handle_frame(&mut self, id: ConnectionId, raw: &str, now: Instant) {
        if !self.registry.contains(id) {
            debug!(connection_id = %id, "frame for unknown connection ignored");
            return;
        }

        match decode_client_message(raw) {
            Ok(message) => self.handle_message(id, message, now),
            Err(error) => {
                debug!(connection_id = %id, error = ?error, "rejected inbound frame");
                self.reject(id, error.into());
            }
        }
    }

    pub fn handle_message(&mut self, id: ConnectionId, message: ClientMessage, now: Instant) {
        self.metrics.record_ws_event(message.tag());
        match message {
            ClientMessage::FindPartner => self.find_partner(id, now),
            ClientMessage::Message { content } => self.chat(id, content, now),
            ClientMessage::Typing { is_typing } => self.typing(id, is_typing, now),
            ClientMessage::Disconnect => self.end_session(id, DissolveReason::Requested),
            ClientMessage::Report { reason } => self.report(id, reason),
        }
    }

    /// Transport is gone: dissolve, then purge every trace of `id`.
    ///
    /// This is the only path that drops a registry entry. Returns how long
    /// the connection was open, or `None` if it was already gone.
    pub fn close(&mut self, id: ConnectionId, reason: CloseReason, now: Instant) -> Option<Duration> {
        if !self.registry.contains(id) {
            return None;
        }
        self.end_session(id, DissolveReason::TransportClosed);
        self.queue.dequeue(id);
        self.router.forget(id);
        self.typing.disarm(id);
        let connection = self.registry.remove(id)?;
        let open_for = now.saturating_duration_since(connection.connected_at);
        self.metrics.increment_connections_closed();
        info!(
            connection_id = %id,
            reason = reason.as_str(),
            open_secs = open_for.as_secs(),
            connections = self.registry.len(),
            "client disconnected"
        );
        Some(open_for)
    }

    /// Evict queue entries older than the configured max wait.
    pub fn sweep_stale(&mut self, now: Instant) -> usize {
        let evicted = self.queue.evict_stale(now, self.config.max_queue_wait);
        for id in &evicted {
            if let Some(connection) = self.registry.get_mut(*id) {
                if connection.status == ConnectionStatus::Waiting {
                    connection.status = ConnectionStatus::Idle;
                }
                connection.send(ServerMessage::status(StatusKind::Timeout, TIMEOUT_TEXT));
            }
            info!(connection_id = %id, "removed stale queue entry");
        }
        self.metrics.add_queue_evictions(evicted.len() as u64);
        evicted.len()
    }

    /// Clear typing indicators whose sender went quiet.
    pub fn sweep_typing(&mut self, now: Instant) {
        for id in self.typing.expire(now) {
            self.router.relay_typing(&self.registry, id, false);
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            waiting: self.queue.len(),
            chatting: self.registry.count_with_status(ConnectionStatus::Chatting),
        }
    }

    fn find_partner(&mut self, id: ConnectionId, now: Instant) {
        let Some(status) = self.registry.status_of(id) else {
            return;
        };
        if status == ConnectionStatus::Chatting {
            self.reject(id, ChatError::AlreadyChatting);
            return;
        }
        if let Some(connection) = self.registry.get_mut(id) {
            connection.status = ConnectionStatus::Waiting;
        }

        self.queue.enqueue(id, now);
        self.registry.send(id, ServerMessage::status(StatusKind::Waiting, WAITING_TEXT));
        debug!(connection_id = %id, queue_size = self.queue.len(), "client waiting for partner");

        let Some(partner_id) = self.queue.try_match(id) else {
            return;
        };
        match self.sessions.establish(&mut self.registry, &mut self.queue, id, partner_id, now) {
            Ok(()) => self.metrics.increment_sessions_matched(),
            Err(error) => {
                warn!(connection_id = %id, partner_id = %partner_id, error = %error, "pairing aborted");
            }
        }
    }

    fn chat(&mut self, id: ConnectionId, content: Value, now: Instant) {
        match self.router.relay_chat(&mut self.registry, id, content, now) {
            Ok(Delivery::Delivered) => {
                self.typing.disarm(id);
                self.metrics.increment_messages_relayed();
            }
            Ok(Delivery::PeerUnavailable) => {
                self.typing.disarm(id);
                self.metrics.increment_messages_dropped();
                debug!(connection_id = %id, "partner transport closed, message dropped");
            }
            Err(error) => self.reject(id, error),
        }
    }

    fn typing(&mut self, id: ConnectionId, is_typing: bool, now: Instant) {
        let forwarded = self.router.relay_typing(&self.registry, id, is_typing);
        if forwarded && is_typing {
            self.typing.arm(id, now);
        } else {
            self.typing.disarm(id);
        }
    }

    fn report(&mut self, id: ConnectionId, reason: Option<String>) {
        let Some(connection) = self.registry.get(id) else {
            return;
        };
        let chatting = connection.is_chatting();
        let reported = connection.partner;

        // Reports are not persisted; the log line is the record.
        warn!(
            reporter_id = %id,
            reported_id = ?reported.map(|partner| partner.to_string()),
            reason = reason.as_deref().unwrap_or("unspecified"),
            "report received"
        );
        self.metrics.increment_reports();
        self.registry
            .send(id, ServerMessage::ReportReceived { message: REPORT_RECEIVED_TEXT.to_string() });

        if chatting {
            self.end_session(id, DissolveReason::Reported);
        }
    }

    fn end_session(&mut self, id: ConnectionId, reason: DissolveReason) {
        let outcome = self.sessions.dissolve(&mut self.registry, &mut self.queue, id, reason);
        self.typing.disarm(id);
        if let Some(partner_id) = outcome.partner {
            self.typing.disarm(partner_id);
            info!(
                connection_id = %id,
                partner_id = %partner_id,
                reason = reason.as_str(),
                "session ended"
            );
        }
    }

    fn reject(&self, id: ConnectionId, error: ChatError) {
        self.metrics.record_ws_error(error.code());
        self.registry.send(id, error.to_message());
    }
}
