//! Signal protocol messages
//!
//! Every frame is a JSON envelope `{"event": ..., "data": ..., "session": ...}`.
//! `data` is forwarded verbatim; only the routing fields are read from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchboard_core::{ErrorCode, ParticipantId, SessionId, SignalError};

/// Events a client may send
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientEvent {
    Offer,
    Answer,
    IceCandidate,
    Call,
    CallAccepted,
    CallRejected,
    CallCanceled,
    Ping,
}

/// Events the server sends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerEvent {
    OnlineUsers,
    Offer,
    Answer,
    IceCandidate,
    IncomingCall,
    CallAccepted,
    CallRejected,
    CallCanceled,
    Pong,
    Error,
}

/// Inbound envelope
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientMessage {
    pub event: ClientEvent,

    #[serde(default)]
    pub data: Value,

    /// Call session this event refers to, when the client knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
}

/// Outbound envelope
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub event: ServerEvent,

    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
}

/// Relayed signaling kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Name of the `data` field holding the recipient
    pub fn route_field(self) -> &'static str {
        match self {
            SignalKind::Offer => "calleeId",
            SignalKind::Answer => "callerId",
            SignalKind::IceCandidate => "target",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }

    pub fn server_event(self) -> ServerEvent {
        match self {
            SignalKind::Offer => ServerEvent::Offer,
            SignalKind::Answer => ServerEvent::Answer,
            SignalKind::IceCandidate => ServerEvent::IceCandidate,
        }
    }
}

/// Routing fields of a call handshake event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRoute {
    pub caller: ParticipantId,
    pub callee: ParticipantId,
}

impl ClientMessage {
    pub fn new(event: ClientEvent, data: Value) -> Self {
        Self {
            event,
            data,
            session: None,
        }
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, SignalError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Relay kind for offer/answer/ice-candidate events
    pub fn signal_kind(&self) -> Option<SignalKind> {
        match self.event {
            ClientEvent::Offer => Some(SignalKind::Offer),
            ClientEvent::Answer => Some(SignalKind::Answer),
            ClientEvent::IceCandidate => Some(SignalKind::IceCandidate),
            _ => None,
        }
    }

    /// Recipient of a relayed signal
    pub fn signal_target(&self, kind: SignalKind) -> Result<ParticipantId, SignalError> {
        self.participant_field(kind.name(), kind.route_field())
    }

    /// Caller and callee of a handshake event
    pub fn call_route(&self) -> Result<CallRoute, SignalError> {
        let event = self.event_name();
        Ok(CallRoute {
            caller: self.participant_field(event, "callerId")?,
            callee: self.participant_field(event, "calleeId")?,
        })
    }

    pub fn event_name(&self) -> &'static str {
        match self.event {
            ClientEvent::Offer => "offer",
            ClientEvent::Answer => "answer",
            ClientEvent::IceCandidate => "ice-candidate",
            ClientEvent::Call => "call",
            ClientEvent::CallAccepted => "call-accepted",
            ClientEvent::CallRejected => "call-rejected",
            ClientEvent::CallCanceled => "call-canceled",
            ClientEvent::Ping => "ping",
        }
    }

    fn participant_field(
        &self,
        event: &'static str,
        field: &'static str,
    ) -> Result<ParticipantId, SignalError> {
        self.data
            .get(field)
            .and_then(Value::as_str)
            .and_then(|id| ParticipantId::new(id).ok())
            .ok_or(SignalError::MissingField { event, field })
    }
}

impl ServerMessage {
    pub fn new(event: ServerEvent, data: Value) -> Self {
        Self {
            event,
            data,
            session: None,
        }
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Full reachable set
    pub fn online_users(ids: &[ParticipantId]) -> Self {
        let list = ids.iter().map(|id| Value::from(id.as_str())).collect();
        Self::new(ServerEvent::OnlineUsers, Value::Array(list))
    }

    pub fn pong(timestamp: u64) -> Self {
        Self::new(ServerEvent::Pong, serde_json::json!({ "timestamp": timestamp }))
    }

    /// Create an error message
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            ServerEvent::Error,
            serde_json::json!({ "code": code, "message": message.into() }),
        )
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Identifiers carried by an `online-users` message
    pub fn participants(&self) -> Option<Vec<String>> {
        if self.event != ServerEvent::OnlineUsers {
            return None;
        }
        self.data.as_array().map(|list| {
            list.iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
    }
}
