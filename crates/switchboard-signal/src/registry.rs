//! Connection registry
//!
//! Maps each participant id to the handle of its live connection. Every
//! mutation is followed by a presence broadcast issued under the same lock,
//! so the broadcasts observed by clients are totally ordered with the
//! mutations that caused them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use switchboard_core::{ConnectionId, ParticipantId};

use crate::messages::ServerMessage;
use crate::presence;

/// Capacity of each connection's outbound queue
pub const SEND_QUEUE_SIZE: usize = 256;

/// Sending half of one live connection
///
/// The connection's writer task drains the matching receiver. Dropping the
/// last handle closes that queue, which ends the writer.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains
    pub fn channel(id: ConnectionId) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_SIZE);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message without blocking
    ///
    /// Returns `false` if the queue is full (slow reader) or the connection
    /// is already gone; the message is dropped either way.
    pub fn send(&self, msg: ServerMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %self.id, "Outbound queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection = %self.id, "Outbound queue closed, message dropped");
                false
            }
        }
    }

    /// A handle that does not keep the queue open
    pub fn downgrade(&self) -> WeakConnectionHandle {
        WeakConnectionHandle {
            id: self.id,
            tx: self.tx.downgrade(),
        }
    }
}

/// Non-owning counterpart of [`ConnectionHandle`]
#[derive(Clone, Debug)]
pub struct WeakConnectionHandle {
    id: ConnectionId,
    tx: mpsc::WeakSender<ServerMessage>,
}

impl WeakConnectionHandle {
    pub fn upgrade(&self) -> Option<ConnectionHandle> {
        self.tx.upgrade().map(|tx| ConnectionHandle { id: self.id, tx })
    }
}

/// Who is reachable right now
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<BTreeMap<ParticipantId, ConnectionHandle>>,
    next_connection: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a process-unique connection id
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Store `handle` under `id`, replacing any previous connection
    ///
    /// Returns the replaced handle, if any.
    pub fn register(&self, id: ParticipantId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut connections = self.connections.lock();
        let connection = handle.id();
        let replaced = connections.insert(id.clone(), handle);

        match &replaced {
            Some(old) => info!(
                participant = %id,
                %connection,
                replaced = %old.id(),
                "Participant reconnected, previous connection replaced"
            ),
            None => info!(participant = %id, %connection, "Participant online"),
        }

        presence::broadcast(&connections);
        replaced
    }

    /// Remove `id` if present
    pub fn deregister(&self, id: &str) -> Option<ConnectionHandle> {
        let mut connections = self.connections.lock();
        let removed = connections.remove(id);

        if removed.is_some() {
            info!(participant = %id, "Participant offline");
        } else {
            debug!(participant = %id, "Deregister for unknown participant");
        }

        presence::broadcast(&connections);
        removed
    }

    /// Remove `id` only while it still belongs to `connection`
    ///
    /// A connection that was superseded by a reconnect must not evict its
    /// successor. Returns `true` if the entry was removed.
    pub fn deregister_connection(&self, id: &str, connection: ConnectionId) -> bool {
        let mut connections = self.connections.lock();
        let owned = connections
            .get(id)
            .is_some_and(|handle| handle.id() == connection);

        if owned {
            connections.remove(id);
            info!(participant = %id, %connection, "Participant offline");
        } else {
            debug!(participant = %id, %connection, "Stale connection closed");
        }

        presence::broadcast(&connections);
        owned
    }

    /// Current handle for `id`
    pub fn lookup(&self, id: &str) -> Option<ConnectionHandle> {
        self.connections.lock().get(id).cloned()
    }

    /// Deliver `msg` to `id` if reachable
    pub fn send_to(&self, id: &str, msg: ServerMessage) -> bool {
        match self.lookup(id) {
            Some(handle) => handle.send(msg),
            None => false,
        }
    }

    /// Send the reachable set to every connection
    pub fn broadcast_presence(&self) -> usize {
        let connections = self.connections.lock();
        presence::broadcast(&connections)
    }

    /// Sorted snapshot of the reachable set
    pub fn reachable(&self) -> Vec<ParticipantId> {
        presence::snapshot(&self.connections.lock())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}
