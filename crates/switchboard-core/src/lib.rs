//! Switchboard Core - Shared types, errors, and configuration
//!
//! This crate contains the foundational types used by the Switchboard
//! signaling relay. It has no dependencies on networking code.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AccountsConfig, Config, ConfigError, SignalConfig};
pub use error::*;
pub use types::*;

/// Default WebSocket port
pub const DEFAULT_PORT: u16 = 8080;

/// Unanswered calls are canceled after this many seconds (2 minutes)
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 120;

/// Query parameter carrying the participant id on the WebSocket URL
pub const PARTICIPANT_QUERY_PARAM: &str = "callerId";
