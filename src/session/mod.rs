//! Push session: connection lifecycle, keepalive, acknowledgments, dispatch

pub mod client;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod pending;
pub mod state;

pub use client::{handler_channel, Session};
pub use dispatch::{route_packet, DeliveryOutcome, Dispatcher, PacketRoute};
pub use error::SessionError;
pub use events::{SessionEvent, SessionObserver, TracingObserver};
pub use pending::{AckHandle, AckResult, Acknowledgment, PendingAcks};
pub use state::{ConnectionState, RetryDecision, RetryPolicy};
