//! Session state machine
//!
//! One [`Session`] owns the transport for a single logical push session. It
//! connects, keeps the connection alive, correlates acknowledgments, hands
//! normalized messages to the consumer and reconnects with exponential
//! backoff until it is stopped or the retry budget is spent.
//!
//! `run` drives the session and is usually spawned; `subscribe`, `publish`
//! and `stop` may be called concurrently through a shared reference.

use super::dispatch::{route_packet, DeliveryOutcome, Dispatcher, PacketRoute};
use super::events::{SessionEvent, SessionObserver, TracingObserver};
use super::pending::{AckHandle, Acknowledgment, PendingAcks};
use super::state::{ConnectionState, RetryDecision, RetryPolicy};
use super::SessionError;
use crate::codec::{
    build_connect, build_disconnect, build_pingreq, build_puback, build_publish,
    build_subscribe, parse_connack, parse_packet, Packet, QoS,
};
use crate::config::ClientConfig;
use crate::error::{sanitize_error_message, ErrorKind};
use crate::message::WorksMessage;
use crate::transport::{Connection, FrameSink, FrameStream, Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, Instrument};

/// Upper bound for the DISCONNECT write and the transport close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Create the bounded consumer channel sized from the configuration
pub fn handler_channel(
    config: &ClientConfig,
) -> (mpsc::Sender<WorksMessage>, mpsc::Receiver<WorksMessage>) {
    mpsc::channel(config.session.handler_buffer.max(1))
}

pub struct Session<T: Transport> {
    config: ClientConfig,
    client_id: String,
    cookie_header: Option<String>,
    transport: T,
    handler: mpsc::Sender<WorksMessage>,
    observer: Arc<dyn SessionObserver>,
    sink: Mutex<Option<Box<dyn FrameSink>>>,
    pending: Arc<Mutex<PendingAcks>>,
    running: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl<T: Transport> Session<T> {
    pub fn new(config: ClientConfig, transport: T, handler: mpsc::Sender<WorksMessage>) -> Self {
        let client_id = config.client_id();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            client_id,
            cookie_header: None,
            transport,
            handler,
            observer: Arc::new(TracingObserver),
            sink: Mutex::new(None),
            pending: Arc::new(Mutex::new(PendingAcks::new())),
            running: AtomicBool::new(false),
            state_tx,
            shutdown_tx,
        }
    }

    /// Cookie header sent with every handshake
    pub fn with_cookie_header<S: Into<String>>(mut self, cookie_header: S) -> Self {
        self.cookie_header = Some(cookie_header.into());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver observing every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Connect and keep reconnecting until stopped or out of retries
    ///
    /// Returns `Ok(())` after [`Session::stop`]. Returns an error when the
    /// retry budget is exhausted, when a rejected handshake is configured to
    /// be fatal, or when the session was already running. A stopped session
    /// cannot be run again.
    pub async fn run(&self) -> Result<(), SessionError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SessionError::Configuration(
                "session is already running".to_string(),
            ));
        }

        let result = self.retry_loop().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn retry_loop(&self) -> Result<(), SessionError> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let policy = RetryPolicy::new(self.config.retry_interval(), self.config.session.max_retries);
        let mut dispatcher = Dispatcher::new(
            self.config.dedup_window(),
            self.handler.clone(),
            self.observer.clone(),
        );
        let mut failures = 0u32;

        loop {
            if *shutdown_rx.borrow() {
                return Ok(());
            }

            let span = crate::session_span!(attempt = failures + 1);
            let result = self
                .run_connection(&mut dispatcher, &mut failures, shutdown_rx.clone())
                .instrument(span)
                .await;
            self.teardown().await;

            let error = match result {
                Ok(()) => return Ok(()),
                Err(_) if *shutdown_rx.borrow() => return Ok(()),
                Err(error) => error,
            };

            failures += 1;
            self.observer.on_event(&SessionEvent::ConnectionFailed {
                attempt: failures,
                error: error.to_string(),
            });

            if !error.is_retryable() {
                return Err(error);
            }
            if error.kind() == ErrorKind::Authentication && !self.config.session.retry_on_auth_failure
            {
                return Err(error);
            }

            // the watch guard must not live into the backoff sleep
            let stop_requested = *shutdown_rx.borrow();
            match policy.decide(failures, stop_requested) {
                RetryDecision::Proceed { attempt, delay } => {
                    self.observer
                        .on_event(&SessionEvent::RetryScheduled { attempt, delay });
                    if !interruptible_sleep(shutdown_rx.clone(), delay).await {
                        return Ok(());
                    }
                }
                RetryDecision::AbortShutdownRequested => return Ok(()),
                RetryDecision::AbortMaxAttemptsExceeded => {
                    self.observer
                        .on_event(&SessionEvent::RetriesExhausted { attempts: failures });
                    return Err(SessionError::RetriesExhausted {
                        attempts: failures,
                        last_error: sanitize_error_message(&error.to_string()),
                    });
                }
            }
        }
    }

    /// One connection attempt, from Connecting until the connection ends
    ///
    /// `Ok(())` means shutdown was requested.
    async fn run_connection(
        &self,
        dispatcher: &mut Dispatcher,
        failures: &mut u32,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), SessionError> {
        self.set_state(ConnectionState::Connecting);

        let request = self.config.connect_request(self.cookie_header.as_deref());
        let Connection { sink, mut stream } = tokio::select! {
            result = self.transport.connect(&request) => result?,
            _ = wait_for_shutdown(shutdown_rx.clone()) => return Ok(()),
        };
        *self.sink.lock().await = Some(sink);

        tokio::select! {
            result = self.handshake(stream.as_mut()) => result?,
            _ = wait_for_shutdown(shutdown_rx.clone()) => return Ok(()),
        }

        self.set_state(ConnectionState::Connected);
        *failures = 0;

        tokio::select! {
            result = self.send_standing_subscriptions() => result?,
            _ = wait_for_shutdown(shutdown_rx.clone()) => return Ok(()),
        }

        let (pong_tx, _) = watch::channel(0u64);
        tokio::select! {
            result = self.keepalive_loop(&pong_tx) => result,
            result = self.receive_loop(stream.as_mut(), dispatcher, &pong_tx) => result,
            _ = wait_for_shutdown(shutdown_rx) => Ok(()),
        }
    }

    /// Send CONNECT and, when configured, wait for an accepting CONNACK
    async fn handshake(&self, stream: &mut dyn FrameStream) -> Result<(), SessionError> {
        let password = self.config.mqtt_password();
        let connect = build_connect(
            &self.client_id,
            self.config.mqtt.username.as_deref(),
            password.as_deref(),
            self.config.mqtt.keep_alive_secs,
            self.config.mqtt.clean_session,
        )?;
        self.send_packet(&connect).await?;

        if self.config.session.await_connack {
            self.await_connack(stream).await?;
        }
        Ok(())
    }

    /// Standing subscriptions are sent one topic per SUBSCRIBE and not awaited
    async fn send_standing_subscriptions(&self) -> Result<(), SessionError> {
        for topic in &self.config.session.subscriptions {
            self.subscribe_topics(&[(topic.as_str(), QoS::AtMostOnce)])
                .await?;
        }
        Ok(())
    }

    async fn await_connack(&self, stream: &mut dyn FrameStream) -> Result<(), SessionError> {
        let timeout = self.config.connack_timeout();
        let frame = match tokio::time::timeout(timeout, stream.next_frame()).await {
            Err(_) => {
                return Err(TransportError::Other(format!("no CONNACK within {timeout:?}")).into())
            }
            Ok(None) => return Err(TransportError::closed("closed before CONNACK").into()),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(frame))) => frame,
        };

        let packet = parse_packet(&frame)?;
        self.observer.on_event(&SessionEvent::PacketReceived {
            packet_type: packet.packet_type(),
            bytes: frame.len(),
        });

        let ack = parse_connack(&packet)?;
        self.observer.on_event(&SessionEvent::ConnAckReceived {
            session_present: ack.session_present,
            return_code: ack.return_code,
        });
        if !ack.is_accepted() {
            return Err(SessionError::Authentication(format!(
                "CONNACK refused with return code {}",
                ack.return_code
            )));
        }
        Ok(())
    }

    /// PINGREQ every ping interval; optionally fails on a missing PINGRESP
    ///
    /// `pong` counts PINGRESPs; only one arriving after the PINGREQ counts as
    /// its answer.
    async fn keepalive_loop(&self, pong: &watch::Sender<u64>) -> Result<(), SessionError> {
        let interval = self.config.ping_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pongs = pong.subscribe();

        loop {
            ticker.tick().await;
            pongs.borrow_and_update();
            self.send_packet(&build_pingreq()).await?;

            if self.config.mqtt.enforce_ping_timeout {
                let timeout = self.config.ping_timeout();
                if !matches!(tokio::time::timeout(timeout, pongs.changed()).await, Ok(Ok(()))) {
                    return Err(
                        TransportError::Other(format!("no PINGRESP within {timeout:?}")).into(),
                    );
                }
            }
        }
    }

    /// Decode and dispatch every inbound frame until the connection fails
    async fn receive_loop(
        &self,
        stream: &mut dyn FrameStream,
        dispatcher: &mut Dispatcher,
        pong: &watch::Sender<u64>,
    ) -> Result<(), SessionError> {
        loop {
            let frame = match stream.next_frame().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::closed("stream ended").into()),
            };

            let packet = parse_packet(&frame)?;
            self.observer.on_event(&SessionEvent::PacketReceived {
                packet_type: packet.packet_type(),
                bytes: frame.len(),
            });

            match route_packet(&packet)? {
                PacketRoute::ConnectionAcknowledged(ack) => {
                    self.observer.on_event(&SessionEvent::ConnAckReceived {
                        session_present: ack.session_present,
                        return_code: ack.return_code,
                    });
                }
                PacketRoute::MessageReceived(publish) => {
                    if dispatcher.deliver(&publish, Instant::now()).await
                        == DeliveryOutcome::ConsumerGone
                    {
                        debug!(topic = %publish.topic, "No consumer for message");
                    }
                    if publish.qos > 0 {
                        if let Some(message_id) = publish.message_id {
                            self.send_packet(&build_puback(message_id)).await?;
                        }
                    }
                }
                PacketRoute::SubscriptionAcknowledged(suback) => {
                    self.observer.on_event(&SessionEvent::SubAckReceived {
                        message_id: suback.message_id,
                        return_codes: suback.return_codes.clone(),
                    });
                    let result = if suback.is_success() {
                        Ok(Acknowledgment::Subscribed {
                            return_codes: suback.return_codes,
                        })
                    } else {
                        Err(SessionError::SubscriptionRejected {
                            message_id: suback.message_id,
                            return_codes: suback.return_codes,
                        })
                    };
                    if !self.pending.lock().await.resolve(suback.message_id, result) {
                        debug!(message_id = suback.message_id, "SUBACK for unknown message id");
                    }
                }
                PacketRoute::PublishAcknowledged(message_id) => {
                    if !self
                        .pending
                        .lock()
                        .await
                        .resolve(message_id, Ok(Acknowledgment::Published))
                    {
                        debug!(message_id, "PUBACK for unknown message id");
                    }
                }
                PacketRoute::PingResponse => pong.send_modify(|count| *count += 1),
                PacketRoute::Unhandled(packet_type) => {
                    self.observer
                        .on_event(&SessionEvent::UnhandledPacket { packet_type });
                }
            }
        }
    }

    /// Subscribe to one topic at QoS 0
    ///
    /// The returned handle resolves on the matching SUBACK. Unacknowledged
    /// subscriptions are not retried.
    pub async fn subscribe(&self, topic: &str) -> Result<AckHandle, SessionError> {
        self.subscribe_with_qos(topic, QoS::AtMostOnce).await
    }

    pub async fn subscribe_with_qos(&self, topic: &str, qos: QoS) -> Result<AckHandle, SessionError> {
        if !self.state().is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.subscribe_topics(&[(topic, qos)]).await
    }

    async fn subscribe_topics(&self, topics: &[(&str, QoS)]) -> Result<AckHandle, SessionError> {
        let (message_id, receiver) = {
            let mut pending = self.pending.lock().await;
            let message_id = pending.next_message_id();
            (message_id, pending.register(message_id))
        };

        let sent = match build_subscribe(message_id, topics) {
            Ok(packet) => self.send_packet(&packet).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            self.pending.lock().await.remove(message_id);
            return Err(e);
        }

        self.observer.on_event(&SessionEvent::SubscribeSent {
            message_id,
            topics: topics.iter().map(|(topic, _)| topic.to_string()).collect(),
        });
        Ok(AckHandle::new(
            message_id,
            receiver,
            self.config.ack_timeout(),
            self.pending.clone(),
        ))
    }

    /// Publish to `topic`
    ///
    /// QoS 1 returns a handle resolved by the matching PUBACK; QoS 2 is not
    /// supported.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) -> Result<Option<AckHandle>, SessionError> {
        if qos == QoS::ExactlyOnce {
            return Err(crate::codec::CodecError::InvalidQos(qos.as_u8()).into());
        }
        if !self.state().is_connected() {
            return Err(SessionError::NotConnected);
        }

        if qos == QoS::AtMostOnce {
            let packet = build_publish(topic, payload, qos, false, false, 0)?;
            self.send_packet(&packet).await?;
            return Ok(None);
        }

        let (message_id, receiver) = {
            let mut pending = self.pending.lock().await;
            let message_id = pending.next_message_id();
            (message_id, pending.register(message_id))
        };
        let sent = match build_publish(topic, payload, qos, false, false, message_id) {
            Ok(packet) => self.send_packet(&packet).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            self.pending.lock().await.remove(message_id);
            return Err(e);
        }

        Ok(Some(AckHandle::new(
            message_id,
            receiver,
            self.config.ack_timeout(),
            self.pending.clone(),
        )))
    }

    /// Stop the session: interrupt `run`, send DISCONNECT, close the transport
    ///
    /// Idempotent and safe to call from any task, including before `run`.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        let sink = self.sink.lock().await.take();
        if let Some(sink) = sink {
            close_sink(sink, true).await;
        }

        self.set_state(ConnectionState::Disconnected);
        if was_running {
            self.observer.on_event(&SessionEvent::Stopped);
        }
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), SessionError> {
        let frame = packet.encode()?;
        let bytes = frame.len();

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(SessionError::NotConnected)?;
        sink.send(frame).await?;
        drop(guard);

        self.observer.on_event(&SessionEvent::PacketSent {
            packet_type: packet.packet_type(),
            bytes,
        });
        Ok(())
    }

    /// Close the transport, fail outstanding acks, go Disconnected
    ///
    /// Whichever of `stop` and teardown takes the sink after a shutdown
    /// request sends the DISCONNECT.
    async fn teardown(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(sink) = sink {
            let stopping = *self.shutdown_tx.borrow();
            close_sink(sink, stopping).await;
        }

        let abandoned = self.pending.lock().await.abandon_all();
        if abandoned > 0 {
            debug!(abandoned, "Abandoned pending acknowledgments");
        }

        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            self.observer.on_event(&SessionEvent::StateChanged {
                from: previous,
                to: next,
            });
        }
    }
}

/// Close the transport, optionally after a best-effort DISCONNECT
///
/// Each write is bounded by [`CLOSE_TIMEOUT`] so a stalled socket cannot
/// hold up shutdown.
async fn close_sink(mut sink: Box<dyn FrameSink>, disconnect: bool) {
    if disconnect {
        if let Ok(frame) = build_disconnect().encode() {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.send(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "DISCONNECT not sent"),
                Err(_) => debug!("DISCONNECT send timed out"),
            }
        }
    }
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Transport close failed"),
        Err(_) => debug!("Transport close timed out"),
    }
}

/// Resolves once shutdown has been requested
async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep that a shutdown request interrupts; true when the full delay elapsed
async fn interruptible_sleep(shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = wait_for_shutdown(shutdown_rx) => false,
    }
}
