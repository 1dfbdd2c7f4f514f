//! In-memory collaborators for tests
//!
//! [`ScriptedTransport`] plays back a queue of connect outcomes. Each
//! accepted connection is backed by channels whose far end is a [`MockPeer`],
//! so a test can read what the session sent and push frames back.

use crate::codec::{parse_packet, Packet};
use crate::session::{ConnectionState, SessionEvent, SessionObserver};
use crate::transport::{
    ConnectRequest, Connection, FrameSink, FrameStream, Transport, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

enum Outcome {
    Accept(Connection),
    Fail(TransportError),
}

/// Transport that replays scripted connect results
///
/// Once the script is exhausted every further `connect` fails with
/// `TransportError::Closed`.
#[derive(Default)]
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<Outcome>>,
    requests: Mutex<Vec<(Instant, ConnectRequest)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful connection and return its far end
    pub async fn push_connection(&self) -> MockPeer {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let connection = Connection {
            sink: Box::new(ChannelSink {
                outbound: outbound_tx,
                closed: closed.clone(),
            }),
            stream: Box::new(ChannelStream {
                inbound: inbound_rx,
            }),
        };
        self.outcomes
            .lock()
            .await
            .push_back(Outcome::Accept(connection));

        MockPeer {
            sent: outbound_rx,
            inbound: Some(inbound_tx),
            closed,
        }
    }

    pub async fn push_failure(&self, error: TransportError) {
        self.outcomes.lock().await.push_back(Outcome::Fail(error));
    }

    /// Every connect call so far, with the time it was made
    pub async fn requests(&self) -> Vec<(Instant, ConnectRequest)> {
        self.requests.lock().await.clone()
    }

    pub async fn connect_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connection, TransportError> {
        self.requests
            .lock()
            .await
            .push((Instant::now(), request.clone()));

        match self.outcomes.lock().await.pop_front() {
            Some(Outcome::Accept(connection)) => Ok(connection),
            Some(Outcome::Fail(error)) => Err(error),
            None => Err(TransportError::closed("no scripted connection")),
        }
    }
}

struct ChannelSink {
    outbound: mpsc::UnboundedSender<Bytes>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::closed("sink closed"));
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::closed("peer gone"))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ChannelStream {
    inbound: mpsc::UnboundedReceiver<Result<Bytes, TransportError>>,
}

#[async_trait]
impl FrameStream for ChannelStream {
    async fn next_frame(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.inbound.recv().await
    }
}

/// Server side of a scripted connection
pub struct MockPeer {
    sent: mpsc::UnboundedReceiver<Bytes>,
    inbound: Option<mpsc::UnboundedSender<Result<Bytes, TransportError>>>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    /// Next frame the session sent, raw
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        self.sent.recv().await
    }

    /// Next frame the session sent, parsed; `None` once the sink is gone
    /// or the frame does not parse
    pub async fn next_packet(&mut self) -> Option<Packet> {
        let frame = self.sent.recv().await?;
        parse_packet(&frame).ok()
    }

    /// Frames already sent and not yet read
    pub fn drain_packets(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            if let Ok(packet) = parse_packet(&frame) {
                packets.push(packet);
            }
        }
        packets
    }

    pub fn send_frame(&self, frame: impl Into<Bytes>) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Ok(frame.into()));
        }
    }

    pub fn send_packet(&self, packet: &Packet) {
        if let Ok(frame) = packet.encode() {
            self.send_frame(frame);
        }
    }

    /// Fail the session's receive loop with `error`
    pub fn fail(&self, error: TransportError) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Err(error));
        }
    }

    /// End the inbound stream, as if the server went away
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Whether the session closed its sink
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Observer that keeps every event for later assertions
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<SessionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Target state of every recorded transition, in order
    pub fn states(&self) -> Vec<ConnectionState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, event: &SessionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
