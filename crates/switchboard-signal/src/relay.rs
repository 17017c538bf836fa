//! Offer/answer/ICE relay
//!
//! Fire-and-forget: a message for an unreachable target is dropped and the
//! sender is not told.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::messages::{ServerMessage, SignalKind};
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct MessageRelay {
    registry: Arc<ConnectionRegistry>,
}

impl MessageRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Forward `payload` unchanged to `target`; returns whether it was queued
    pub fn relay(&self, kind: SignalKind, target: &str, payload: Value) -> bool {
        let delivered = self
            .registry
            .send_to(target, ServerMessage::new(kind.server_event(), payload));

        if delivered {
            debug!(kind = kind.name(), %target, "Relayed signal");
        } else {
            debug!(kind = kind.name(), %target, "Target unreachable, signal dropped");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ServerEvent;
    use crate::registry::ConnectionHandle;
    use serde_json::json;
    use switchboard_core::ParticipantId;

    #[test]
    fn test_relay_delivers_verbatim() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (bob, mut bob_rx) = ConnectionHandle::channel(registry.next_connection_id());
        registry.register(ParticipantId::new("bob").unwrap(), bob);
        let _ = bob_rx.try_recv();

        let relay = MessageRelay::new(registry);
        let payload = json!({ "calleeId": "bob", "offer": { "type": "offer", "sdp": "v=0\r\n" } });
        assert!(relay.relay(SignalKind::Offer, "bob", payload.clone()));

        let msg = bob_rx.try_recv().unwrap();
        assert_eq!(msg.event, ServerEvent::Offer);
        assert_eq!(msg.data, payload);
        assert!(msg.session.is_none());
    }

    #[test]
    fn test_relay_to_unreachable_is_dropped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = MessageRelay::new(registry);

        assert!(!relay.relay(SignalKind::IceCandidate, "nobody", json!({ "target": "nobody" })));
    }

    #[test]
    fn test_relay_after_disconnect_is_dropped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (bob, bob_rx) = ConnectionHandle::channel(registry.next_connection_id());
        registry.register(ParticipantId::new("bob").unwrap(), bob);
        registry.deregister("bob");
        drop(bob_rx);

        let relay = MessageRelay::new(registry);
        assert!(!relay.relay(SignalKind::Answer, "bob", json!({ "callerId": "bob" })));
    }
}
