//! SQLite-backed account directory
//!
//! Persists registered accounts with their online flag and ephemeral guest
//! records. The signaling core only ever asks it to take a participant
//! offline; the remaining operations serve the account front door and tests.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info};

use switchboard_core::ParticipantId;

use crate::accounts::{AccountDirectory, OfflineOutcome};

/// SQLite account store
///
/// The connection is shared with blocking tasks so disconnect handling never
/// runs SQLite on a runtime worker.
pub struct SqliteDirectory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDirectory {
    /// Open or create a new SQLite database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let directory = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        directory.init_schema()?;
        Ok(directory)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let directory = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        directory.init_schema()?;
        Ok(directory)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                is_online INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS guests (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;

        info!("Account schema initialized");
        Ok(())
    }

    /// Insert or update a registered account
    pub fn upsert_account(
        &self,
        id: &str,
        username: &str,
        display_name: &str,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        conn.execute(
            "INSERT INTO accounts (id, username, display_name, is_online) VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username, display_name = excluded.display_name",
            params![id, username, display_name],
        )?;

        debug!("Account stored: {}", id);
        Ok(())
    }

    /// Set an account's online flag; returns false if the account does not exist
    pub fn set_online(&self, id: &str, online: bool) -> Result<bool, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        let changed = conn.execute(
            "UPDATE accounts SET is_online = ?1 WHERE id = ?2",
            params![online as i32, id],
        )?;

        Ok(changed > 0)
    }

    /// Online flag of an account, `None` if unknown
    pub fn is_online(&self, id: &str) -> Result<Option<bool>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        let flag: Option<i32> = conn
            .query_row(
                "SELECT is_online FROM accounts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(flag.map(|f| f != 0))
    }

    /// Record an ephemeral guest
    pub fn add_guest(&self, id: &str, display_name: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        conn.execute(
            "INSERT OR REPLACE INTO guests (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![id, display_name, current_timestamp()],
        )?;

        debug!("Guest stored: {}", id);
        Ok(())
    }

    pub fn has_guest(&self, id: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM guests WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;

        Ok(exists)
    }

    pub fn account_count(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn guest_count(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM guests", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Evict a guest, or else flip an account offline
fn take_offline(conn: &Mutex<Connection>, id: &str) -> Result<OfflineOutcome, StorageError> {
    let conn = conn.lock().map_err(|_| StorageError::LockPoisoned)?;

    if conn.execute("DELETE FROM guests WHERE id = ?1", params![id])? > 0 {
        info!("Guest {} removed", id);
        return Ok(OfflineOutcome::GuestEvicted);
    }

    if conn.execute(
        "UPDATE accounts SET is_online = 0 WHERE id = ?1",
        params![id],
    )? > 0
    {
        debug!("Account {} marked offline", id);
        return Ok(OfflineOutcome::MarkedOffline);
    }

    Ok(OfflineOutcome::Unknown)
}

#[async_trait]
impl AccountDirectory for SqliteDirectory {
    async fn participant_offline(&self, id: &ParticipantId) -> Result<OfflineOutcome, StorageError> {
        let conn = self.conn.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || take_offline(&conn, id.as_str())).await?
    }
}

/// Get current Unix timestamp
fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Mutex lock was poisoned (indicates a panic occurred while holding the lock)
    #[error("Lock poisoned: a thread panicked while holding the lock")]
    LockPoisoned,

    #[error("Blocking database task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}
