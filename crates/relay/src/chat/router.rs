// Message routing between partners: session checks, rate limiting and
// content filtering for chat, plain forwarding for typing signals.

use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use duet_common::filter::ContentFilter;
use duet_common::protocol::ws::{ServerMessage, FALLBACK_SENDER_NAME};
use serde_json::Value;

use super::rate_limit::RateLimiter;
use super::registry::{ConnectionId, Registry};
use crate::error::ChatError;

/// Result of a chat relay that passed every check.
///
/// `PeerUnavailable` is not reported to the sender: the message is dropped
/// silently when the partner's transport is not open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    PeerUnavailable,
}

pub struct MessageRouter {
    limiter: RateLimiter,
    filter: Box<dyn ContentFilter>,
}

impl MessageRouter {
    pub fn new(limiter: RateLimiter, filter: Box<dyn ContentFilter>) -> Self {
        Self { limiter, filter }
    }

    pub fn relay_chat(
        &mut self,
        registry: &mut Registry,
        sender_id: ConnectionId,
        content: Value,
        now: Instant,
    ) -> Result<Delivery, ChatError> {
        let (partner_id, sender_name) = match registry.get(sender_id) {
            Some(sender) if sender.is_chatting() => match sender.partner {
                Some(partner_id) => (partner_id, sender.display_name.clone()),
                None => return Err(ChatError::NotPaired),
            },
            _ => return Err(ChatError::NotPaired),
        };

        if !self.limiter.allow(sender_id, now) {
            return Err(ChatError::RateLimited);
        }

        let content = self.filter.filter_value(content);
        let delivery = match registry.get(partner_id) {
            Some(partner) if partner.is_open() => {
                let sent = partner.send(ServerMessage::Message {
                    content,
                    sender: sender_name.unwrap_or_else(|| FALLBACK_SENDER_NAME.to_string()),
                    timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                });
                if sent {
                    Delivery::Delivered
                } else {
                    Delivery::PeerUnavailable
                }
            }
            _ => Delivery::PeerUnavailable,
        };

        if let Some(sender) = registry.get_mut(sender_id) {
            sender.last_message_at = Some(now);
        }
        Ok(delivery)
    }

    /// Forward a typing signal to the partner. Returns true when forwarded;
    /// unpaired senders are ignored without error.
    pub fn relay_typing(&self, registry: &Registry, sender_id: ConnectionId, is_typing: bool) -> bool {
        let Some(sender) = registry.get(sender_id) else {
            return false;
        };
        if !sender.is_chatting() {
            return false;
        }
        let Some(partner) = sender.partner.and_then(|partner_id| registry.get(partner_id)) else {
            return false;
        };
        partner.is_open() && partner.send(ServerMessage::Typing { is_typing })
    }

    /// Drop per-connection rate-limit state.
    pub fn forget(&mut self, id: ConnectionId) {
        self.limiter.forget(id);
    }

    pub fn rate_limited_connections(&self) -> usize {
        self.limiter.tracked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::rate_limit::{RateLimitConfig, DEFAULT_WINDOW};
    use crate::chat::registry::ConnectionStatus;
    use duet_common::filter::WordListFilter;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

    struct Pair {
        registry: Registry,
        a: ConnectionId,
        b: ConnectionId,
        rx_a: UnboundedReceiver<ServerMessage>,
        rx_b: UnboundedReceiver<ServerMessage>,
    }

    fn pair() -> Pair {
        let mut registry = Registry::new();
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a, Instant::now());
        let b = registry.register(tx_b, Instant::now());
        for (id, partner, name) in [(a, b, "HappyPanda1"), (b, a, "SwiftLion2")] {
            let connection = registry.get_mut(id).expect("connection should exist");
            connection.status = ConnectionStatus::Chatting;
            connection.partner = Some(partner);
            connection.display_name = Some(name.to_string());
        }
        Pair { registry, a, b, rx_a, rx_b }
    }

    fn router() -> MessageRouter {
        MessageRouter::new(RateLimiter::default(), Box::new(WordListFilter::default()))
    }

    #[test]
    fn chat_is_filtered_and_forwarded_to_partner() {
        let mut pair = pair();
        let mut router = router();
        let now = Instant::now();

        let delivery = router
            .relay_chat(&mut pair.registry, pair.a, json!("what a curse"), now)
            .expect("paired sender should relay");
        assert_eq!(delivery, Delivery::Delivered);

        match pair.rx_b.try_recv().expect("partner should receive the message") {
            ServerMessage::Message { content, sender, timestamp } => {
                assert_eq!(content, json!("what a *****"));
                assert_eq!(sender, "HappyPanda1");
                assert!(chrono::DateTime::parse_from_rfc3339(&timestamp).is_ok());
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(pair.rx_a.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(pair.registry.get(pair.a).and_then(|c| c.last_message_at), Some(now));
    }

    #[test]
    fn non_string_content_is_relayed_unchanged() {
        let mut pair = pair();
        let mut router = router();

        router
            .relay_chat(&mut pair.registry, pair.a, json!({"curse": 1}), Instant::now())
            .expect("paired sender should relay");
        assert!(matches!(
            pair.rx_b.try_recv(),
            Ok(ServerMessage::Message { content, .. }) if content == json!({"curse": 1})
        ));
    }

    #[test]
    fn unpaired_sender_gets_not_paired() {
        let mut pair = pair();
        pair.registry.get_mut(pair.a).expect("a should exist").reset();
        let mut router = router();

        assert_eq!(
            router.relay_chat(&mut pair.registry, pair.a, json!("hi"), Instant::now()),
            Err(ChatError::NotPaired)
        );
        assert_eq!(
            router.relay_chat(&mut pair.registry, ConnectionId::new(), json!("hi"), Instant::now()),
            Err(ChatError::NotPaired)
        );
        assert_eq!(pair.rx_b.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(router.rate_limited_connections(), 0);
    }

    #[test]
    fn thirty_first_message_in_window_is_dropped() {
        let mut pair = pair();
        let mut router = router();
        let start = Instant::now();

        for n in 0..30 {
            let at = start + Duration::from_secs(n);
            assert_eq!(
                router.relay_chat(&mut pair.registry, pair.a, json!(format!("m{n}")), at),
                Ok(Delivery::Delivered)
            );
        }
        assert_eq!(
            router.relay_chat(&mut pair.registry, pair.a, json!("too many"), start + Duration::from_secs(59)),
            Err(ChatError::RateLimited)
        );

        let mut received = 0;
        while pair.rx_b.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 30);

        let after = start + DEFAULT_WINDOW + Duration::from_secs(1);
        assert_eq!(
            router.relay_chat(&mut pair.registry, pair.a, json!("again"), after),
            Ok(Delivery::Delivered)
        );
    }

    #[test]
    fn rate_limit_is_per_sender() {
        let mut pair = pair();
        let mut router = MessageRouter::new(
            RateLimiter::new(RateLimitConfig { max_messages: 1, window: DEFAULT_WINDOW }),
            Box::new(WordListFilter::default()),
        );
        let now = Instant::now();

        assert!(router.relay_chat(&mut pair.registry, pair.a, json!("1"), now).is_ok());
        assert_eq!(
            router.relay_chat(&mut pair.registry, pair.a, json!("2"), now),
            Err(ChatError::RateLimited)
        );
        assert!(router.relay_chat(&mut pair.registry, pair.b, json!("1"), now).is_ok());
    }

    // The sender is deliberately not told when its partner's transport is
    // gone. Changing that must show up here.
    #[test]
    fn closed_partner_transport_drops_message_silently() {
        let Pair { mut registry, a, rx_b, mut rx_a, .. } = pair();
        drop(rx_b);
        let mut router = router();

        assert_eq!(
            router.relay_chat(&mut registry, a, json!("anyone there?"), Instant::now()),
            Ok(Delivery::PeerUnavailable)
        );
        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn typing_is_forwarded_only_when_paired() {
        let mut pair = pair();
        let router = router();

        assert!(router.relay_typing(&pair.registry, pair.a, true));
        assert_eq!(pair.rx_b.try_recv(), Ok(ServerMessage::Typing { is_typing: true }));

        pair.registry.get_mut(pair.a).expect("a should exist").reset();
        assert!(!router.relay_typing(&pair.registry, pair.a, false));
        assert_eq!(pair.rx_b.try_recv(), Err(TryRecvError::Empty));
        assert!(!router.relay_typing(&pair.registry, ConnectionId::new(), true));
    }

    #[test]
    fn typing_is_not_rate_limited() {
        let pair = pair();
        let router = MessageRouter::new(
            RateLimiter::new(RateLimitConfig { max_messages: 1, window: DEFAULT_WINDOW }),
            Box::new(WordListFilter::default()),
        );
        for _ in 0..100 {
            assert!(router.relay_typing(&pair.registry, pair.a, true));
        }
    }
}
