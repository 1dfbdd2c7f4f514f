//! Works Mobile message records
//!
//! This module defines the normalized [`WorksMessage`] handed to consumers,
//! the catalogue of known command codes, and the sticker sub-record carried
//! by sticker notifications.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Command / notification type codes
///
/// Codes outside the documented set still produce a message, carried as
/// [`MessageType::Unhandled`].
///
/// # Examples
/// ```
/// use wmqtt::message::MessageType;
///
/// assert_eq!(MessageType::from_code(101), MessageType::Normal);
/// assert_eq!(MessageType::from_code(7), MessageType::Unhandled(7));
/// assert_eq!(MessageType::from_code(18).code(), 18);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // channel messages
    Normal,
    Away,
    Leave,
    Invite,
    Kick,
    // commands
    CmdRead,
    // push notifications
    NotificationMessage,
    NotificationSticker,
    NotificationFile,
    NotificationService,
    NotificationEmoji,
    NotificationImage,
    NotificationBadge,
    Unhandled(i64),
}

impl MessageType {
    pub fn from_code(code: i64) -> Self {
        match code {
            101 => MessageType::Normal,
            102 => MessageType::Away,
            202 => MessageType::Leave,
            203 => MessageType::Invite,
            204 => MessageType::Kick,
            93004 => MessageType::CmdRead,
            1 => MessageType::NotificationMessage,
            18 => MessageType::NotificationSticker,
            16 => MessageType::NotificationFile,
            100 => MessageType::NotificationService,
            27 => MessageType::NotificationEmoji,
            11 => MessageType::NotificationImage,
            41 => MessageType::NotificationBadge,
            other => MessageType::Unhandled(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            MessageType::Normal => 101,
            MessageType::Away => 102,
            MessageType::Leave => 202,
            MessageType::Invite => 203,
            MessageType::Kick => 204,
            MessageType::CmdRead => 93004,
            MessageType::NotificationMessage => 1,
            MessageType::NotificationSticker => 18,
            MessageType::NotificationFile => 16,
            MessageType::NotificationService => 100,
            MessageType::NotificationEmoji => 27,
            MessageType::NotificationImage => 11,
            MessageType::NotificationBadge => 41,
            MessageType::Unhandled(code) => code,
        }
    }

    /// Human-readable label used in log output
    pub fn display_name(self) -> String {
        let name = match self {
            MessageType::Normal => "text message",
            MessageType::Away => "away message",
            MessageType::Leave => "channel leave",
            MessageType::Invite => "member invite",
            MessageType::Kick => "member removed",
            MessageType::CmdRead => "read receipt",
            MessageType::NotificationMessage => "text notification",
            MessageType::NotificationSticker => "sticker notification",
            MessageType::NotificationFile => "file notification",
            MessageType::NotificationService => "service notification",
            MessageType::NotificationEmoji => "emoji notification",
            MessageType::NotificationImage => "image notification",
            MessageType::NotificationBadge => "badge update",
            MessageType::Unhandled(code) => return format!("unknown message type ({code})"),
        };
        name.to_string()
    }

    pub fn is_notification(self) -> bool {
        matches!(
            self,
            MessageType::NotificationMessage
                | MessageType::NotificationSticker
                | MessageType::NotificationFile
                | MessageType::NotificationService
                | MessageType::NotificationEmoji
                | MessageType::NotificationImage
                | MessageType::NotificationBadge
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Channel kinds reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Personal,
    Group,
    Other(i64),
}

impl ChannelType {
    pub fn from_code(code: i64) -> Self {
        match code {
            6 => ChannelType::Personal,
            10 => ChannelType::Group,
            other => ChannelType::Other(other),
        }
    }

    pub fn display_name(self) -> String {
        match self {
            ChannelType::Personal => "personal chat".to_string(),
            ChannelType::Group => "group chat".to_string(),
            ChannelType::Other(code) => format!("unknown channel type ({code})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StickerType {
    #[default]
    None,
    Line,
    Works,
}

impl StickerType {
    /// Case-insensitive; unknown or empty values map to `None`
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "line" => StickerType::Line,
            "works" => StickerType::Works,
            _ => StickerType::None,
        }
    }
}

/// Sticker details from a sticker notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerInfo {
    pub sticker_type: StickerType,
    pub package_id: String,
    pub sticker_id: String,
    pub options: Option<String>,
}

impl StickerInfo {
    /// Build from an object carrying `stkType` / `pkgId` / `stkId` / `stkOpt`
    ///
    /// Returns `None` when none of the sticker keys are present. Ids may be
    /// numbers or strings upstream; both are kept as strings.
    pub fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        if !["stkType", "pkgId", "stkId"]
            .iter()
            .any(|key| fields.contains_key(*key))
        {
            return None;
        }

        let text = |key: &str| match fields.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        Some(Self {
            sticker_type: StickerType::parse(&text("stkType")),
            package_id: text("pkgId"),
            sticker_id: text("stkId"),
            options: fields
                .get("stkOpt")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }
}

/// Which upstream payload shape produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Notification,
    Relay,
    Direct,
}

/// Normalized message delivered to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksMessage {
    /// Raw command / type code
    pub command: i64,
    pub channel_id: String,
    pub body: Map<String, Value>,
    pub envelope: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker: Option<StickerInfo>,
    /// `messageNo` of a notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    /// `fromUserNo` of a notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    /// `createTime` (epoch milliseconds) of a notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl WorksMessage {
    pub fn new(
        command: i64,
        channel_id: impl Into<String>,
        body: Map<String, Value>,
        envelope: EnvelopeKind,
    ) -> Self {
        Self {
            command,
            channel_id: channel_id.into(),
            body,
            envelope,
            sticker: None,
            message_id: None,
            sender_id: None,
            timestamp: None,
        }
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_code(self.command)
    }

    /// Text of a notification: the `loc-args1` field, when present
    pub fn text(&self) -> Option<&str> {
        self.body.get("loc-args1").and_then(Value::as_str)
    }

    /// Display name of the sender of a notification (`loc-args0`)
    pub fn sender_name(&self) -> Option<&str> {
        self.body.get("loc-args0").and_then(Value::as_str)
    }

    pub fn channel_title(&self) -> Option<&str> {
        self.body.get("chTitle").and_then(Value::as_str)
    }
}
