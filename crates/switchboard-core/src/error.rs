//! Error types for the Switchboard signaling protocol

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signaling-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("participant id is required")]
    MissingParticipantId,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("missing required field `{field}` in {event} message")]
    MissingField { event: &'static str, field: &'static str },
}

impl From<serde_json::Error> for SignalError {
    fn from(e: serde_json::Error) -> Self {
        SignalError::InvalidMessage(e.to_string())
    }
}

/// Wire error codes (sent to the offending client)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame was not a valid envelope
    InvalidMessage,

    /// A routing field was absent or not a string
    MissingField,
}

impl From<&SignalError> for ErrorCode {
    fn from(e: &SignalError) -> Self {
        match e {
            SignalError::MissingParticipantId | SignalError::InvalidMessage(_) => {
                ErrorCode::InvalidMessage
            }
            SignalError::MissingField { .. } => ErrorCode::MissingField,
        }
    }
}
