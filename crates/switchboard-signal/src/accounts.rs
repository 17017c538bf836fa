//! Account directory boundary
//!
//! The signaling core does not own account records. It only tells the
//! directory when a participant's connection is gone; the directory decides
//! whether that evicts an ephemeral guest or flips a persisted online flag.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use switchboard_core::ParticipantId;

use crate::storage::StorageError;

/// What the directory did with an offline notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfflineOutcome {
    /// Ephemeral guest record deleted
    GuestEvicted,
    /// Registered account marked offline
    MarkedOffline,
    /// No record for this id
    Unknown,
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Called once a participant has no live connection left
    async fn participant_offline(&self, id: &ParticipantId) -> Result<OfflineOutcome, StorageError>;
}

/// In-memory directory, used when no database is configured
#[derive(Default)]
pub struct MemoryDirectory {
    guests: Mutex<HashSet<String>>,
    /// Account id -> online flag
    accounts: Mutex<HashMap<String, bool>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_guest(&self, id: &str) {
        self.guests.lock().insert(id.to_owned());
    }

    pub fn has_guest(&self, id: &str) -> bool {
        self.guests.lock().contains(id)
    }

    pub fn add_account(&self, id: &str, online: bool) {
        self.accounts.lock().insert(id.to_owned(), online);
    }

    pub fn set_online(&self, id: &str, online: bool) -> bool {
        match self.accounts.lock().get_mut(id) {
            Some(flag) => {
                *flag = online;
                true
            }
            None => false,
        }
    }

    pub fn is_online(&self, id: &str) -> Option<bool> {
        self.accounts.lock().get(id).copied()
    }
}

#[async_trait]
impl AccountDirectory for MemoryDirectory {
    async fn participant_offline(&self, id: &ParticipantId) -> Result<OfflineOutcome, StorageError> {
        if self.guests.lock().remove(id.as_str()) {
            return Ok(OfflineOutcome::GuestEvicted);
        }
        if self.set_online(id.as_str(), false) {
            return Ok(OfflineOutcome::MarkedOffline);
        }
        Ok(OfflineOutcome::Unknown)
    }
}
