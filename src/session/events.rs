//! Structured session events and the observer seam
//!
//! The session reports what it does through an injected [`SessionObserver`]
//! rather than a global logger. [`TracingObserver`] is the default and
//! renders events with `tracing`.

use super::state::ConnectionState;
use crate::codec::PacketType;
use crate::error::sanitize_error_message;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    PacketSent {
        packet_type: PacketType,
        bytes: usize,
    },
    PacketReceived {
        packet_type: PacketType,
        bytes: usize,
    },
    ConnAckReceived {
        session_present: bool,
        return_code: u8,
    },
    SubscribeSent {
        message_id: u16,
        topics: Vec<String>,
    },
    SubAckReceived {
        message_id: u16,
        return_codes: Vec<u8>,
    },
    MessageDelivered {
        command: i64,
        channel_id: String,
    },
    DuplicateSuppressed {
        identity: String,
    },
    MessageDropped {
        reason: String,
    },
    UnhandledPacket {
        packet_type: PacketType,
    },
    ConnectionFailed {
        attempt: u32,
        error: String,
    },
    RetryScheduled {
        attempt: u32,
        delay: Duration,
    },
    RetriesExhausted {
        attempts: u32,
    },
    Stopped,
}

/// Receives every session event; must not block
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Renders events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { from, to } => match to {
                ConnectionState::Connected => info!(%from, %to, "Connection established"),
                ConnectionState::Disconnected if from.is_connected() => {
                    warn!(%from, %to, "Connection lost")
                }
                _ => debug!(%from, %to, "Connection state changed"),
            },
            SessionEvent::PacketSent { packet_type, bytes } => {
                trace!(%packet_type, bytes, "Packet sent")
            }
            SessionEvent::PacketReceived { packet_type, bytes } => {
                trace!(%packet_type, bytes, "Packet received")
            }
            SessionEvent::ConnAckReceived {
                session_present,
                return_code,
            } => {
                if *return_code == 0 {
                    info!(session_present, "CONNACK accepted")
                } else {
                    warn!(return_code, "CONNACK refused")
                }
            }
            SessionEvent::SubscribeSent { message_id, topics } => {
                info!(message_id, ?topics, "Subscribing")
            }
            SessionEvent::SubAckReceived {
                message_id,
                return_codes,
            } => debug!(message_id, ?return_codes, "Subscription acknowledged"),
            SessionEvent::MessageDelivered {
                command,
                channel_id,
            } => debug!(command, channel_id = %channel_id, "Message delivered"),
            SessionEvent::DuplicateSuppressed { identity } => {
                debug!(identity = %identity, "Duplicate message suppressed")
            }
            SessionEvent::MessageDropped { reason } => {
                warn!(reason = %sanitize_error_message(reason), "Message dropped")
            }
            SessionEvent::UnhandledPacket { packet_type } => {
                warn!(%packet_type, "Ignoring unhandled packet type")
            }
            SessionEvent::ConnectionFailed { attempt, error } => {
                warn!(attempt, error = %sanitize_error_message(error), "Connection attempt failed")
            }
            SessionEvent::RetryScheduled { attempt, delay } => {
                info!(attempt, delay_secs = delay.as_secs_f64(), "Reconnecting after backoff")
            }
            SessionEvent::RetriesExhausted { attempts } => {
                error!(attempts, "Giving up after repeated connection failures")
            }
            SessionEvent::Stopped => info!("Session stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_observer_handles_every_event() {
        let observer = TracingObserver;
        let events = [
            SessionEvent::StateChanged {
                from: ConnectionState::Connected,
                to: ConnectionState::Disconnected,
            },
            SessionEvent::PacketSent {
                packet_type: PacketType::PingReq,
                bytes: 2,
            },
            SessionEvent::ConnAckReceived {
                session_present: false,
                return_code: 5,
            },
            SessionEvent::MessageDropped {
                reason: "NEO_SES=secret".to_string(),
            },
            SessionEvent::RetryScheduled {
                attempt: 1,
                delay: Duration::from_secs(5),
            },
            SessionEvent::Stopped,
        ];
        for event in &events {
            observer.on_event(event);
        }
    }
}
