//! Switchboard Signal Server
//!
//! Real-time signaling relay for WebRTC call setup. Clients connect via
//! WebSocket with their participant id and exchange call-setup messages.
//!
//! # Protocol
//!
//! 1. Client connects with `?callerId=<id>`; everyone receives `online-users`
//! 2. Caller sends `call`; callee receives `incoming-call`
//! 3. Callee answers with `call-accepted` or `call-rejected`, or the caller
//!    sends `call-canceled`; unanswered calls are canceled after a timeout
//! 4. Peers exchange `offer`, `answer` and `ice-candidate`, relayed verbatim
//! 5. Media flows peer to peer; the relay never sees it

pub mod accounts;
pub mod hub;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod storage;

pub use accounts::{AccountDirectory, MemoryDirectory, OfflineOutcome};
pub use hub::{Connection, SignalHub};
pub use messages::{ClientEvent, ClientMessage, ServerEvent, ServerMessage, SignalKind};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use relay::MessageRelay;
pub use server::SignalServer;
pub use session::{CallCoordinator, CallOutcome};
pub use storage::{SqliteDirectory, StorageError};
