//! Inbound packet routing and message delivery

use super::events::{SessionEvent, SessionObserver};
use crate::codec::{
    parse_connack, parse_puback, parse_publish, parse_suback, CodecError, ConnAck, Packet,
    PacketType, Publish, SubAck,
};
use crate::dedup::{message_identity, DuplicateWindow};
use crate::message::{decode_payload, normalize, WorksMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// What the receive loop should do with one inbound packet
#[derive(Debug, Clone, PartialEq)]
pub enum PacketRoute {
    ConnectionAcknowledged(ConnAck),
    MessageReceived(Publish),
    SubscriptionAcknowledged(SubAck),
    PublishAcknowledged(u16),
    PingResponse,
    /// Known or unknown types this client never expects inbound
    Unhandled(PacketType),
}

/// Decide how to handle a parsed packet (pure function)
///
/// A body that fails to parse is a codec error and ends the connection.
pub fn route_packet(packet: &Packet) -> Result<PacketRoute, CodecError> {
    Ok(match packet.packet_type() {
        PacketType::ConnAck => PacketRoute::ConnectionAcknowledged(parse_connack(packet)?),
        PacketType::Publish => PacketRoute::MessageReceived(parse_publish(packet)?),
        PacketType::SubAck => PacketRoute::SubscriptionAcknowledged(parse_suback(packet)?),
        PacketType::PubAck => PacketRoute::PublishAcknowledged(parse_puback(packet)?),
        PacketType::PingResp => PacketRoute::PingResponse,
        other => PacketRoute::Unhandled(other),
    })
}

/// Result of handling one PUBLISH
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Duplicate,
    /// Payload failed to decode or normalize
    Dropped,
    /// The consumer channel is closed
    ConsumerGone,
}

/// Duplicate suppression, normalization and hand-off to the consumer
pub struct Dispatcher {
    window: DuplicateWindow,
    handler: mpsc::Sender<WorksMessage>,
    observer: Arc<dyn SessionObserver>,
}

impl Dispatcher {
    pub fn new(
        dedup_window: Duration,
        handler: mpsc::Sender<WorksMessage>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            window: DuplicateWindow::new(dedup_window),
            handler,
            observer,
        }
    }

    /// Handle one PUBLISH; never fails the connection
    pub async fn deliver(&mut self, publish: &Publish, now: Instant) -> DeliveryOutcome {
        let value = match decode_payload(&publish.payload) {
            Ok(value) => value,
            Err(e) => return self.drop_message(&publish.topic, e.to_string()),
        };

        if let Some(identity) = message_identity(&value) {
            if self.window.is_duplicate(&identity, now) {
                self.observer
                    .on_event(&SessionEvent::DuplicateSuppressed { identity });
                return DeliveryOutcome::Duplicate;
            }
        }

        let message = match normalize(value) {
            Ok(message) => message,
            Err(e) => return self.drop_message(&publish.topic, e.to_string()),
        };

        let event = SessionEvent::MessageDelivered {
            command: message.command,
            channel_id: message.channel_id.clone(),
        };
        if self.handler.send(message).await.is_err() {
            self.observer.on_event(&SessionEvent::MessageDropped {
                reason: "message handler closed".to_string(),
            });
            return DeliveryOutcome::ConsumerGone;
        }
        self.observer.on_event(&event);
        DeliveryOutcome::Delivered
    }

    fn drop_message(&self, topic: &str, error: String) -> DeliveryOutcome {
        self.observer.on_event(&SessionEvent::MessageDropped {
            reason: format!("{topic}: {error}"),
        });
        DeliveryOutcome::Dropped
    }
}
