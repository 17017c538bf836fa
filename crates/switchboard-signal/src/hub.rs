//! Signal hub
//!
//! Single top-level dispatcher shared by all connection tasks. Owns the
//! connection lifecycle (register on connect, deregister and notify the
//! account directory on disconnect) and routes every inbound event by kind.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error};

use switchboard_core::{ConnectionId, ErrorCode, ParticipantId, SignalError};

use crate::accounts::AccountDirectory;
use crate::messages::{ClientEvent, ClientMessage, ServerMessage};
use crate::registry::{ConnectionHandle, ConnectionRegistry, WeakConnectionHandle};
use crate::relay::MessageRelay;
use crate::session::CallCoordinator;

/// A registered connection, as seen by its transport task
pub struct Connection {
    pub participant: ParticipantId,
    pub id: ConnectionId,
    /// Everything the hub wants written to this client
    pub outbound: mpsc::Receiver<ServerMessage>,
    /// Queue for direct replies; dead once the registry lets go of the connection
    pub replies: WeakConnectionHandle,
}

pub struct SignalHub {
    registry: Arc<ConnectionRegistry>,
    relay: MessageRelay,
    calls: CallCoordinator,
    directory: Arc<dyn AccountDirectory>,
}

impl SignalHub {
    pub fn new(directory: Arc<dyn AccountDirectory>, call_timeout: Duration) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            relay: MessageRelay::new(registry.clone()),
            calls: CallCoordinator::new(registry.clone(), call_timeout),
            registry,
            directory,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn calls(&self) -> &CallCoordinator {
        &self.calls
    }

    /// Register a new connection for `participant` and broadcast presence
    pub fn connect(&self, participant: ParticipantId) -> Connection {
        let id = self.registry.next_connection_id();
        let (handle, outbound) = ConnectionHandle::channel(id);
        let replies = handle.downgrade();
        self.registry.register(participant.clone(), handle);

        Connection {
            participant,
            id,
            outbound,
            replies,
        }
    }

    /// Deregister a closed connection and tell the account directory
    ///
    /// A connection superseded by a reconnect leaves the participant online,
    /// so the directory is only told when the current connection closes.
    pub async fn disconnect(&self, participant: &ParticipantId, connection: ConnectionId) {
        if !self.registry.deregister_connection(participant.as_str(), connection) {
            return;
        }

        match self.directory.participant_offline(participant).await {
            Ok(outcome) => debug!(%participant, ?outcome, "Account directory notified"),
            Err(e) => error!(%participant, "Failed to mark participant offline: {}", e),
        }
    }

    /// Route one inbound message; returns a reply for the sender, if any
    pub fn handle_message(&self, sender: &ParticipantId, msg: ClientMessage) -> Option<ServerMessage> {
        debug!(%sender, event = msg.event_name(), "Received");

        match self.dispatch(msg) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(%sender, "Rejected message: {}", e);
                Some(ServerMessage::error(ErrorCode::from(&e), e.to_string()))
            }
        }
    }

    /// Parse and route a raw text frame
    pub fn handle_text(&self, sender: &ParticipantId, text: &str) -> Option<ServerMessage> {
        match ClientMessage::from_json(text) {
            Ok(msg) => self.handle_message(sender, msg),
            Err(e) => Some(ServerMessage::error(ErrorCode::from(&e), e.to_string())),
        }
    }

    fn dispatch(&self, msg: ClientMessage) -> Result<Option<ServerMessage>, SignalError> {
        if let Some(kind) = msg.signal_kind() {
            let target = msg.signal_target(kind)?;
            self.relay.relay(kind, target.as_str(), msg.data);
            return Ok(None);
        }

        match msg.event {
            ClientEvent::Call => {
                let route = msg.call_route()?;
                self.calls.call(route, msg.data);
            }
            ClientEvent::CallAccepted => {
                let route = msg.call_route()?;
                self.calls.accept(&route, msg.session, msg.data);
            }
            ClientEvent::CallRejected => {
                let route = msg.call_route()?;
                self.calls.reject(&route, msg.session, msg.data);
            }
            ClientEvent::CallCanceled => {
                let route = msg.call_route()?;
                self.calls.cancel(&route, msg.session, msg.data);
            }
            ClientEvent::Ping => {
                let timestamp = msg
                    .data
                    .get("timestamp")
                    .and_then(|t| t.as_u64())
                    .unwrap_or_default();
                return Ok(Some(ServerMessage::pong(timestamp)));
            }
            ClientEvent::Offer | ClientEvent::Answer | ClientEvent::IceCandidate => {}
        }

        Ok(None)
    }
}
