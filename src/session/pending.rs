//! Acknowledgment correlation
//!
//! SUBSCRIBE and QoS 1 PUBLISH register a oneshot under their message id;
//! the receive loop resolves it when the matching SUBACK / PUBACK arrives.

use super::SessionError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

/// What the server acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgment {
    /// SUBACK with one return code per requested topic
    Subscribed { return_codes: Vec<u8> },
    Published,
}

pub type AckResult = Result<Acknowledgment, SessionError>;

/// Outstanding requests keyed by message id, plus the id allocator
#[derive(Debug, Default)]
pub struct PendingAcks {
    last_id: u16,
    entries: HashMap<u16, oneshot::Sender<AckResult>>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next message id: 1, 2, ... 65535, 1, ...; 0 is never issued
    pub fn next_message_id(&mut self) -> u16 {
        self.last_id = self.last_id.wrapping_add(1);
        if self.last_id == 0 {
            self.last_id = 1;
        }
        self.last_id
    }

    pub fn register(&mut self, message_id: u16) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        if self.entries.insert(message_id, tx).is_some() {
            debug!(message_id, "Replacing stale pending acknowledgment");
        }
        rx
    }

    /// Resolve the entry for `message_id`; false when nothing was waiting
    pub fn resolve(&mut self, message_id: u16, result: AckResult) -> bool {
        match self.entries.remove(&message_id) {
            Some(tx) => {
                // the waiter may have timed out and gone away
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, message_id: u16) -> bool {
        self.entries.remove(&message_id).is_some()
    }

    /// Fail every outstanding entry with `AckAbandoned`; returns how many
    pub fn abandon_all(&mut self) -> usize {
        let count = self.entries.len();
        for (message_id, tx) in self.entries.drain() {
            let _ = tx.send(Err(SessionError::AckAbandoned { message_id }));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: u16) -> bool {
        self.entries.contains_key(&message_id)
    }
}

/// Awaitable acknowledgment for one outbound request
#[derive(Debug)]
pub struct AckHandle {
    message_id: u16,
    receiver: oneshot::Receiver<AckResult>,
    timeout: Duration,
    pending: Arc<Mutex<PendingAcks>>,
}

impl AckHandle {
    pub(crate) fn new(
        message_id: u16,
        receiver: oneshot::Receiver<AckResult>,
        timeout: Duration,
        pending: Arc<Mutex<PendingAcks>>,
    ) -> Self {
        Self {
            message_id,
            receiver,
            timeout,
            pending,
        }
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    /// Wait for the acknowledgment, bounded by the session's ack timeout
    ///
    /// On timeout the pending entry is removed so a late ack is ignored.
    pub async fn wait(self) -> AckResult {
        match tokio::time::timeout(self.timeout, self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::AckAbandoned {
                message_id: self.message_id,
            }),
            Err(_) => {
                self.pending.lock().await.remove(self.message_id);
                Err(SessionError::AckTimeout {
                    message_id: self.message_id,
                    timeout: self.timeout,
                })
            }
        }
    }
}
