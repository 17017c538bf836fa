//! Presence broadcasting
//!
//! Sends the full reachable set (never a diff) to every registered
//! connection. Callers hold the registry lock for the duration.

use std::collections::BTreeMap;

use tracing::debug;

use switchboard_core::ParticipantId;

use crate::messages::ServerMessage;
use crate::registry::ConnectionHandle;

/// Sorted list of reachable participants
pub fn snapshot(connections: &BTreeMap<ParticipantId, ConnectionHandle>) -> Vec<ParticipantId> {
    connections.keys().cloned().collect()
}

/// Send `online-users` to every connection; returns how many accepted it
pub fn broadcast(connections: &BTreeMap<ParticipantId, ConnectionHandle>) -> usize {
    let msg = ServerMessage::online_users(&snapshot(connections));

    let delivered = connections
        .values()
        .filter(|handle| handle.send(msg.clone()))
        .count();

    debug!(
        participants = connections.len(),
        delivered, "Presence broadcast"
    );
    delivered
}
