//! Payload normalization
//!
//! Upstream payloads arrive in one of three JSON envelope shapes. They are
//! tried in a fixed order: notification (`nType`), then relay
//! (`relayDataList`), then direct (`cmd` / `cid` / `bdy`). A payload matching
//! more than one shape is always read as the first one that matches.

use super::types::{EnvelopeKind, MessageType, StickerInfo, WorksMessage};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

const NOTIFICATION_TYPE: &str = "nType";
const NOTIFICATION_CHANNEL: &str = "chNo";
const RELAY_LIST: &str = "relayDataList";
const RELAY_TYPE_CODE: &str = "msgTypeCode";
const DIRECT_FIELDS: [&str; 3] = ["cmd", "cid", "bdy"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("Message parse error: {0}")]
    MessageParseError(String),
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),
}

/// Decode a PUBLISH payload into JSON
pub fn decode_payload(payload: &[u8]) -> Result<Value, NormalizeError> {
    serde_json::from_slice(payload).map_err(|e| NormalizeError::MessageParseError(e.to_string()))
}

/// Decode and normalize a PUBLISH payload
pub fn parse(payload: &[u8]) -> Result<WorksMessage, NormalizeError> {
    normalize(decode_payload(payload)?)
}

/// Normalize an already-decoded payload
pub fn normalize(value: Value) -> Result<WorksMessage, NormalizeError> {
    let Value::Object(object) = value else {
        return Err(NormalizeError::InvalidMessageFormat(
            "payload is not a JSON object".to_string(),
        ));
    };

    if object.contains_key(NOTIFICATION_TYPE) {
        normalize_notification(object)
    } else if object.contains_key(RELAY_LIST) {
        normalize_relay(object)
    } else {
        normalize_direct(object)
    }
}

fn normalize_notification(object: Map<String, Value>) -> Result<WorksMessage, NormalizeError> {
    let command = object
        .get(NOTIFICATION_TYPE)
        .and_then(as_integer)
        .ok_or_else(|| {
            NormalizeError::InvalidMessageFormat("nType is not an integer".to_string())
        })?;

    let channel_id = object
        .get(NOTIFICATION_CHANNEL)
        .and_then(as_text)
        .ok_or_else(|| {
            NormalizeError::InvalidMessageFormat("notification has no chNo".to_string())
        })?;

    let sticker = if MessageType::from_code(command) == MessageType::NotificationSticker {
        sticker_fields(&object)
    } else {
        None
    };

    let message_id = object.get("messageNo").and_then(as_integer);
    let sender_id = object.get("fromUserNo").and_then(as_integer);
    let timestamp = object.get("createTime").and_then(as_integer);

    let mut message = WorksMessage::new(command, channel_id, object, EnvelopeKind::Notification);
    message.sticker = sticker;
    message.message_id = message_id;
    message.sender_id = sender_id;
    message.timestamp = timestamp;
    Ok(message)
}

/// Sticker data lives in `stkInfo`, in `extras` (object or JSON string), or
/// directly on the notification
fn sticker_fields(object: &Map<String, Value>) -> Option<StickerInfo> {
    if let Some(Value::Object(info)) = object.get("stkInfo") {
        if let Some(sticker) = StickerInfo::from_fields(info) {
            return Some(sticker);
        }
    }

    match object.get("extras") {
        Some(Value::Object(extras)) => {
            if let Some(sticker) = StickerInfo::from_fields(extras) {
                return Some(sticker);
            }
        }
        Some(Value::String(raw)) => {
            if let Ok(Value::Object(extras)) = serde_json::from_str::<Value>(raw) {
                if let Some(sticker) = StickerInfo::from_fields(&extras) {
                    return Some(sticker);
                }
            }
        }
        _ => {}
    }

    StickerInfo::from_fields(object)
}

fn normalize_relay(object: Map<String, Value>) -> Result<WorksMessage, NormalizeError> {
    let first = match object.get(RELAY_LIST) {
        Some(Value::Array(list)) => list.first().cloned().ok_or_else(|| {
            NormalizeError::InvalidMessageFormat("empty relayDataList".to_string())
        })?,
        _ => {
            return Err(NormalizeError::InvalidMessageFormat(
                "relayDataList is not a list".to_string(),
            ))
        }
    };

    let Value::Object(mut relay) = first else {
        return Err(NormalizeError::InvalidMessageFormat(
            "relay entry is not an object".to_string(),
        ));
    };

    let missing: Vec<String> = ["cmd", "bdy"]
        .iter()
        .filter(|key| !relay.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(NormalizeError::MissingRequiredFields(missing));
    }

    let mut body = match relay.remove("bdy") {
        Some(Value::Object(body)) => body,
        _ => {
            return Err(NormalizeError::InvalidMessageFormat(
                "relay bdy is not an object".to_string(),
            ))
        }
    };

    let command = body
        .get(RELAY_TYPE_CODE)
        .and_then(as_integer)
        .or_else(|| relay.get("cmd").and_then(as_integer))
        .ok_or_else(|| NormalizeError::InvalidMessageFormat("relay cmd is not an integer".to_string()))?;

    let channel_id = relay.get("cid").and_then(as_text).unwrap_or_default();

    if let Some(Value::String(raw)) = body.get("extras") {
        match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => {
                body.insert("extras".to_string(), parsed);
            }
            Err(e) => debug!(error = %e, "Leaving unparseable extras as string"),
        }
    }

    Ok(WorksMessage::new(command, channel_id, body, EnvelopeKind::Relay))
}

fn normalize_direct(mut object: Map<String, Value>) -> Result<WorksMessage, NormalizeError> {
    let missing: Vec<String> = DIRECT_FIELDS
        .iter()
        .filter(|key| !object.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(NormalizeError::MissingRequiredFields(missing));
    }

    let command = object
        .get("cmd")
        .and_then(as_integer)
        .ok_or_else(|| NormalizeError::InvalidMessageFormat("cmd is not an integer".to_string()))?;
    let channel_id = object.get("cid").and_then(as_text).unwrap_or_default();

    let body = match object.remove("bdy") {
        Some(Value::Object(body)) => body,
        Some(other) => {
            warn!("Direct message bdy is not an object, wrapping it");
            let mut wrapped = Map::new();
            wrapped.insert("value".to_string(), other);
            wrapped
        }
        None => Map::new(),
    };

    Ok(WorksMessage::new(command, channel_id, body, EnvelopeKind::Direct))
}

/// Integers arrive as numbers or numeric strings
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Channel ids arrive as numbers or strings; both become strings
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
