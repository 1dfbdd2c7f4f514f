//! Frame transport abstraction
//!
//! The session speaks MQTT over discrete binary frames. A [`Transport`] opens
//! a connection and hands back a [`FrameSink`] / [`FrameStream`] pair so the
//! keepalive ticker and the receive loop can suspend independently.

use bytes::Bytes;
use thiserror::Error;

pub mod websocket;

pub use websocket::WebSocketTransport;

/// Transport failures, typed so handshake rejection can be told apart from
/// ordinary disconnects
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Handshake rejected with HTTP status {status}")]
    HandshakeRejected { status: u16 },

    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    #[error("Invalid connection request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn closed<S: Into<String>>(reason: S) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    pub fn is_handshake_rejection(&self) -> bool {
        matches!(self, TransportError::HandshakeRejected { .. })
    }
}

/// Everything needed to open one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    /// Extra request headers, e.g. Origin, User-Agent, Cookie
    pub headers: Vec<(String, String)>,
    pub subprotocol: String,
}

impl ConnectRequest {
    pub fn new<S: Into<String>>(url: S, subprotocol: S) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            subprotocol: subprotocol.into(),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Outbound half of an open connection
#[async_trait::async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Close the connection; safe to call more than once
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of an open connection
#[async_trait::async_trait]
pub trait FrameStream: Send {
    /// Next complete binary frame; `None` once the peer has gone away
    async fn next_frame(&mut self) -> Option<Result<Bytes, TransportError>>;
}

/// An open connection split into its two halves
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Connection factory used by the session
///
/// Implementations must be reusable: the session calls `connect` once per
/// attempt, including after every reconnect.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connection, TransportError>;
}
