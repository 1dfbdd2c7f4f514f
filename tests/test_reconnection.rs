//! Reconnection and backoff behavior
//!
//! Runs on paused time so the exponential delays (5s, 10s, 20s) are checked
//! exactly without waiting for them.


use std::time::Duration;
use test_helpers::{harness, test_config, wait_for_state};
use tokio::time::Instant;
use wmqtt::codec::PacketType;
use wmqtt::session::SessionEvent;
use wmqtt::testing::ScriptedTransport;
use wmqtt::{ConnectionState, SessionError, TransportError};

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_until_retries_exhausted() {
    let transport = ScriptedTransport::new();
    for _ in 0..4 {
        transport.push_failure(TransportError::closed("refused")).await;
    }
    let h = harness(test_config(), transport);

    let result = h.session.run().await;
    assert!(matches!(
        result,
        Err(SessionError::RetriesExhausted { attempts: 4, .. })
    ));

    let events = h.observer.events();
    let delays: Vec<Duration> = events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::RetryScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(20)
        ]
    );
    assert!(events
        .iter()
        .any(|event| matches!(event, SessionEvent::RetriesExhausted { attempts: 4 })));
    assert!(!h.session.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_each_failure_is_reported_with_its_attempt() {
    let transport = ScriptedTransport::new();
    for _ in 0..4 {
        transport.push_failure(TransportError::closed("refused")).await;
    }
    let h = harness(test_config(), transport);
    let _ = h.session.run().await;

    let attempts: Vec<u32> = h
        .observer
        .events()
        .iter()
        .filter_map(|event| match event {
            SessionEvent::ConnectionFailed { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_successful_connection_resets_failure_count() {
    let transport = ScriptedTransport::new();
    transport.push_failure(TransportError::closed("refused")).await;
    let mut peer = transport.push_connection().await;
    peer.hang_up();
    for _ in 0..4 {
        transport.push_failure(TransportError::closed("refused")).await;
    }

    let start = Instant::now();
    let h = harness(test_config(), transport);
    let result = h.session.run().await;

    assert!(matches!(
        result,
        Err(SessionError::RetriesExhausted { attempts: 4, .. })
    ));
    assert!(h.observer.states().contains(&ConnectionState::Connected));

    let delays: Vec<Duration> = h
        .observer
        .events()
        .iter()
        .filter_map(|event| match event {
            SessionEvent::RetryScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(20)
        ]
    );
    let elapsed = Instant::now() - start;
    assert!(elapsed >= Duration::from_secs(40) && elapsed < Duration::from_secs(41));
    drop(peer);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_rejection_is_fatal_when_configured() {
    let mut config = test_config();
    config.session.retry_on_auth_failure = false;

    let transport = ScriptedTransport::new();
    transport
        .push_failure(TransportError::HandshakeRejected { status: 401 })
        .await;
    let h = harness(config, transport);

    let result = h.session.run().await;
    assert!(matches!(
        result,
        Err(SessionError::Connection(TransportError::HandshakeRejected { status: 401 }))
    ));
    assert!(!h
        .observer
        .events()
        .iter()
        .any(|event| matches!(event, SessionEvent::RetryScheduled { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_handshake_rejection_is_retried_by_default() {
    let transport = ScriptedTransport::new();
    transport
        .push_failure(TransportError::HandshakeRejected { status: 403 })
        .await;
    let mut peer = transport.push_connection().await;
    let h = harness(test_config(), transport);
    let mut state = h.session.watch_state();

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    wait_for_state(&mut state, ConnectionState::Connected).await;
    assert!(peer.next_packet().await.is_some());

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_backoff() {
    let transport = ScriptedTransport::new();
    transport.push_failure(TransportError::closed("refused")).await;
    let h = harness(test_config(), transport);

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    h.session.stop().await;

    tokio_test::assert_ok!(runner.await.unwrap());
    assert_eq!(h.session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_backoff_on_same_task() {
    let transport = ScriptedTransport::new();
    transport.push_failure(TransportError::closed("refused")).await;
    let h = harness(test_config(), transport);
    let start = Instant::now();

    let stopper = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.session.stop().await;
    };
    let (result, ()) = tokio::join!(h.session.run(), stopper);

    tokio_test::assert_ok!(result);
    assert!(Instant::now() - start < Duration::from_secs(5));
    assert!(h
        .observer
        .events()
        .iter()
        .any(|event| matches!(event, SessionEvent::RetryScheduled { attempt: 1, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_framing_desync_reconnects() {
    let transport = ScriptedTransport::new();
    let mut first = transport.push_connection().await;
    let mut second = transport.push_connection().await;
    let h = harness(test_config(), transport);
    let mut state = h.session.watch_state();

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    assert_eq!(first.next_packet().await.unwrap().packet_type(), PacketType::Connect);
    wait_for_state(&mut state, ConnectionState::Connected).await;

    // PUBLISH promising 5 bytes but carrying 3
    first.send_frame(vec![0x30, 0x05, 0x00, 0x01, b't']);

    assert_eq!(second.next_packet().await.unwrap().packet_type(), PacketType::Connect);
    assert!(first.is_closed());
    assert!(h.observer.events().iter().any(|event| matches!(
        event,
        SessionEvent::RetryScheduled { attempt: 1, delay } if *delay == Duration::from_secs(5)
    )));

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_ping_fails_connection() {
    let mut config = test_config();
    config.mqtt.enforce_ping_timeout = true;

    let transport = ScriptedTransport::new();
    let mut first = transport.push_connection().await;
    let mut second = transport.push_connection().await;
    let h = harness(config, transport);
    let mut state = h.session.watch_state();

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    first.next_packet().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;
    let connected_at = Instant::now();

    // an unsolicited PINGRESP must not answer the next PINGREQ
    first.send_frame(vec![0xD0, 0x00]);

    let ping = first.next_packet().await.unwrap();
    assert_eq!(ping.packet_type(), PacketType::PingReq);
    let ping_after = Instant::now() - connected_at;
    assert!(ping_after >= Duration::from_secs(30) && ping_after < Duration::from_secs(31));

    // ping interval 30s, ping timeout 10s, first backoff 5s
    assert_eq!(second.next_packet().await.unwrap().packet_type(), PacketType::Connect);
    let elapsed = Instant::now() - connected_at;
    assert!(elapsed >= Duration::from_secs(45) && elapsed < Duration::from_secs(46));
    assert!(first.is_closed());

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
}
