//! Time-windowed duplicate suppression
//!
//! Upstream occasionally redelivers the same push over more than one path
//! (notification and relay) or after a reconnect. Identities seen within the
//! window are suppressed; entries past the window are purged before every
//! lookup and never consulted.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Default suppression window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

const NOTIFICATION_ID: &str = "notification-id";

#[derive(Debug)]
pub struct DuplicateWindow {
    window: Duration,
    seen: HashMap<String, Instant>,
}

impl Default for DuplicateWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl DuplicateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Returns true when `identity` was recorded less than one window ago
    ///
    /// A duplicate keeps its original timestamp, so a message repeated
    /// continuously is let through again once per window.
    pub fn is_duplicate(&mut self, identity: &str, now: Instant) -> bool {
        self.purge(now);

        if self.seen.contains_key(identity) {
            trace!(identity, "Suppressing duplicate message");
            return true;
        }

        self.seen.insert(identity.to_string(), now);
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn purge(&mut self, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) <= window);
    }
}

/// Identity used for suppression, if the payload carries one
///
/// Notifications carry an explicit `notification-id`; relay envelopes are
/// identified by channel and sequence number. Payloads with neither are
/// never suppressed.
pub fn message_identity(payload: &Value) -> Option<String> {
    if let Some(id) = payload.get(NOTIFICATION_ID).and_then(scalar_text) {
        return Some(format!("notification:{id}"));
    }

    let relay = payload.get("relayDataList")?.as_array()?.first()?;
    let sequence = relay.get("bdy")?.get("msgSn").and_then(scalar_text)?;
    let channel = relay.get("cid").and_then(scalar_text).unwrap_or_default();
    Some(format!("relay:{channel}:{sequence}"))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
