// Session coordination: linking two waiting connections into a chat and
// tearing that link down again.

use duet_common::protocol::ws::{
    ServerMessage, StatusKind, DISCONNECTED_TEXT, MATCHED_TEXT,
};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use super::queue::MatchingQueue;
use super::registry::{ConnectionId, ConnectionStatus, Registry};

const ADJECTIVES: &[&str] = &[
    "Happy", "Sleepy", "Grumpy", "Sneezy", "Bashful", "Dopey", "Doc", "Clever", "Brave", "Swift",
];
const NOUNS: &[&str] =
    &["Panda", "Tiger", "Eagle", "Dolphin", "Wolf", "Fox", "Bear", "Hawk", "Owl", "Lion"];

/// Random `AdjectiveNounNN` pseudonym. Collisions are possible and allowed.
pub fn generate_display_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Quiet");
    let noun = NOUNS.choose(rng).copied().unwrap_or("Stranger");
    let number: u8 = rng.gen_range(0..100);
    format!("{adjective}{noun}{number}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EstablishError {
    #[error("connection {0} is no longer registered")]
    Vanished(ConnectionId),

    #[error("connection {0} is already chatting")]
    AlreadyChatting(ConnectionId),

    #[error("a connection cannot be paired with itself")]
    SelfPairing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DissolveReason {
    /// Client sent `disconnect`.
    Requested,
    /// Client reported its partner.
    Reported,
    /// Transport closed or failed.
    TransportClosed,
}

impl DissolveReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Reported => "reported",
            Self::TransportClosed => "transport_closed",
        }
    }

    /// Whether the connection itself gets a `status: disconnected` ack.
    const fn acknowledges(self) -> bool {
        !matches!(self, Self::TransportClosed)
    }
}

/// What a dissolve did, for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dissolved {
    /// Former partner, demoted to Idle and notified.
    pub partner: Option<ConnectionId>,
    /// Whether a waiting queue entry was removed.
    pub left_queue: bool,
}

pub struct SessionCoordinator {
    rng: StdRng,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCoordinator {
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// Link `a` and `b` as partners and send each side its `matched` frame.
    ///
    /// If either side is gone or already chatting nothing is linked, and a
    /// surviving side that is still Waiting goes back into the queue.
    pub fn establish(
        &mut self,
        registry: &mut Registry,
        queue: &mut MatchingQueue,
        a: ConnectionId,
        b: ConnectionId,
        now: Instant,
    ) -> Result<(), EstablishError> {
        if a == b {
            return Err(EstablishError::SelfPairing);
        }

        if let Err(error) = check_pairable(registry, a).and_then(|()| check_pairable(registry, b)) {
            for id in [a, b] {
                if registry.status_of(id) == Some(ConnectionStatus::Waiting) {
                    queue.enqueue(id, now);
                }
            }
            return Err(error);
        }

        let name_a = generate_display_name(&mut self.rng);
        let name_b = generate_display_name(&mut self.rng);

        for (id, partner, own_name) in [(a, b, &name_a), (b, a, &name_b)] {
            if let Some(connection) = registry.get_mut(id) {
                connection.status = ConnectionStatus::Chatting;
                connection.partner = Some(partner);
                connection.display_name = Some(own_name.clone());
            }
        }

        for (id, partner, own_name, partner_name) in
            [(a, b, &name_a, &name_b), (b, a, &name_b, &name_a)]
        {
            registry.send(
                id,
                ServerMessage::Matched {
                    partner_id: partner.to_string(),
                    your_name: own_name.clone(),
                    partner_name: partner_name.clone(),
                    message: MATCHED_TEXT.to_string(),
                },
            );
        }

        info!(connection_a = %a, connection_b = %b, "session established");
        Ok(())
    }

    /// End whatever `id` is doing and return it to Idle.
    ///
    /// A Chatting connection's partner is demoted to Idle and told its
    /// partner left; a Waiting connection leaves the queue. Safe to call on
    /// an Idle connection.
    pub fn dissolve(
        &mut self,
        registry: &mut Registry,
        queue: &mut MatchingQueue,
        id: ConnectionId,
        reason: DissolveReason,
    ) -> Dissolved {
        let Some(connection) = registry.get(id) else {
            return Dissolved::default();
        };
        let status = connection.status;
        let partner_id = connection.partner;

        let mut outcome = Dissolved::default();
        if let Some(partner_id) = partner_id {
            if let Some(partner) = registry.get_mut(partner_id) {
                if partner.partner == Some(id) {
                    partner.reset();
                    partner.send(ServerMessage::partner_disconnected());
                    outcome.partner = Some(partner_id);
                }
            }
        }
        // Queue membership is checked even when not Waiting so a stray entry
        // can never outlive its connection's Waiting state.
        outcome.left_queue = queue.dequeue(id);

        if let Some(connection) = registry.get_mut(id) {
            connection.reset();
            if reason.acknowledges() {
                connection.send(ServerMessage::status(StatusKind::Disconnected, DISCONNECTED_TEXT));
            }
        }

        debug!(
            connection_id = %id,
            previous_status = ?status,
            partner_id = ?outcome.partner.map(|partner| partner.to_string()),
            reason = reason.as_str(),
            "connection dissolved"
        );
        outcome
    }
}

fn check_pairable(registry: &Registry, id: ConnectionId) -> Result<(), EstablishError> {
    match registry.get(id) {
        None => Err(EstablishError::Vanished(id)),
        Some(connection) if connection.is_chatting() => Err(EstablishError::AlreadyChatting(id)),
        Some(_) => Ok(()),
    }
}
