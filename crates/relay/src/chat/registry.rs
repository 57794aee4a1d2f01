// Connection registry: per-connection chat state keyed by opaque id.
//
// Partners are referenced by id only. Whether a partner's transport is
// still open is checked at send time through its outbound handle.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use duet_common::protocol::ws::ServerMessage;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Transport handle: frames pushed here are written to the socket by the
/// connection's own task.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Waiting,
    Chatting,
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    pub status: ConnectionStatus,
    pub partner: Option<ConnectionId>,
    pub display_name: Option<String>,
    pub connected_at: Instant,
    pub last_message_at: Option<Instant>,
    outbound: Outbound,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_chatting(&self) -> bool {
        self.status == ConnectionStatus::Chatting
    }

    /// Whether the socket task behind this connection is still reading frames.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Best-effort send. Returns false when the transport is gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.outbound.send(message).is_ok()
    }

    /// Back to Idle with no partner and no session name.
    pub fn reset(&mut self) {
        self.status = ConnectionStatus::Idle;
        self.partner = None;
        self.display_name = None;
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, Connection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new Idle connection and return its id.
    pub fn register(&mut self, outbound: Outbound, now: Instant) -> ConnectionId {
        let mut id = ConnectionId::new();
        while self.connections.contains_key(&id) {
            id = ConnectionId::new();
        }
        self.connections.insert(
            id,
            Connection {
                id,
                status: ConnectionStatus::Idle,
                partner: None,
                display_name: None,
                connected_at: now,
                last_message_at: None,
                outbound,
            },
        );
        id
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Drop the connection entry. Only `Dispatcher::close` calls this, since
    /// queue, rate-limit and typing state must be purged in the same step.
    pub(super) fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Best-effort send to a connection by id.
    pub fn send(&self, id: ConnectionId, message: ServerMessage) -> bool {
        self.connections.get(&id).is_some_and(|connection| connection.send(message))
    }

    pub fn status_of(&self, id: ConnectionId) -> Option<ConnectionStatus> {
        self.connections.get(&id).map(|connection| connection.status)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Count of connections currently in `status`.
    pub fn count_with_status(&self, status: ConnectionStatus) -> usize {
        self.connections.values().filter(|connection| connection.status == status).count()
    }

    /// Every Chatting connection whose partner does not point back at it.
    pub fn asymmetric_pairs(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|connection| {
                let Some(partner_id) = connection.partner else {
                    return connection.is_chatting();
                };
                match self.connections.get(&partner_id) {
                    Some(partner) => partner.partner != Some(connection.id) || !connection.is_chatting(),
                    None => true,
                }
            })
            .map(|connection| connection.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (Outbound, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_creates_idle_connection() {
        let mut registry = Registry::new();
        let (tx, _rx) = channel();
        let id = registry.register(tx, Instant::now());

        let connection = registry.get(id).expect("registered connection should exist");
        assert_eq!(connection.id(), id);
        assert_eq!(connection.status, ConnectionStatus::Idle);
        assert!(connection.partner.is_none());
        assert!(connection.display_name.is_none());
        assert!(connection.last_message_at.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn ids_are_unique() {
        let mut registry = Registry::new();
        let mut receivers = Vec::new();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..64 {
            let (tx, rx) = channel();
            receivers.push(rx);
            assert!(ids.insert(registry.register(tx, Instant::now())));
        }
        assert_eq!(registry.len(), 64);
    }

    #[test]
    fn remove_deletes_entry() {
        let mut registry = Registry::new();
        let (tx, _rx) = channel();
        let id = registry.register(tx, Instant::now());

        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn send_reports_closed_transport() {
        let mut registry = Registry::new();
        let (tx, rx) = channel();
        let id = registry.register(tx, Instant::now());

        assert!(registry.get(id).is_some_and(Connection::is_open));
        assert!(registry.send(id, ServerMessage::partner_disconnected()));

        drop(rx);
        assert!(!registry.get(id).is_some_and(Connection::is_open));
        assert!(!registry.send(id, ServerMessage::partner_disconnected()));
        assert!(!registry.send(ConnectionId::new(), ServerMessage::partner_disconnected()));
    }

    #[test]
    fn reset_clears_session_fields() {
        let mut registry = Registry::new();
        let (tx, _rx) = channel();
        let id = registry.register(tx, Instant::now());
        let connection = registry.get_mut(id).expect("connection should exist");
        connection.status = ConnectionStatus::Chatting;
        connection.partner = Some(ConnectionId::new());
        connection.display_name = Some("BraveOwl3".to_string());

        connection.reset();
        assert_eq!(connection.status, ConnectionStatus::Idle);
        assert!(connection.partner.is_none());
        assert!(connection.display_name.is_none());
    }

    #[test]
    fn asymmetric_pairs_detects_one_sided_links() {
        let mut registry = Registry::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        let a = registry.register(tx_a, Instant::now());
        let b = registry.register(tx_b, Instant::now());

        for (id, partner) in [(a, b), (b, a)] {
            let connection = registry.get_mut(id).expect("connection should exist");
            connection.status = ConnectionStatus::Chatting;
            connection.partner = Some(partner);
        }
        assert!(registry.asymmetric_pairs().is_empty());

        registry.get_mut(b).expect("connection should exist").reset();
        assert_eq!(registry.asymmetric_pairs(), vec![a]);
    }
}
