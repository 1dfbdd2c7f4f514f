use crate::codec::CodecError;
use crate::error::ErrorKind;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(#[from] TransportError),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Packet error: {0}")]
    Packet(#[from] CodecError),

    #[error("Connection retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Not connected")]
    NotConnected,

    #[error("No acknowledgment for message {message_id} within {timeout:?}")]
    AckTimeout { message_id: u16, timeout: Duration },

    #[error("Connection ended before message {message_id} was acknowledged")]
    AckAbandoned { message_id: u16 },

    #[error("Subscription {message_id} rejected by server (return codes {return_codes:?})")]
    SubscriptionRejected {
        message_id: u16,
        return_codes: Vec<u8>,
    },

    #[error("Session stopped")]
    Stopped,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Configuration(_) => ErrorKind::Configuration,
            SessionError::Connection(e) if e.is_handshake_rejection() => ErrorKind::Authentication,
            SessionError::Authentication(_) | SessionError::SubscriptionRejected { .. } => {
                ErrorKind::Authentication
            }
            SessionError::Packet(_) => ErrorKind::Packet,
            SessionError::Connection(_)
            | SessionError::RetriesExhausted { .. }
            | SessionError::NotConnected
            | SessionError::AckTimeout { .. }
            | SessionError::AckAbandoned { .. }
            | SessionError::Stopped => ErrorKind::Connection,
        }
    }

    /// Failures of a single connection attempt are retryable; terminal
    /// outcomes and per-request errors are not
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Connection(_) | SessionError::Authentication(_) | SessionError::Packet(_)
        )
    }
}
