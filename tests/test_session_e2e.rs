//! End-to-end session behavior against a scripted peer
//!
//! The peer plays the push server: it reads what the session writes and
//! answers with raw MQTT frames.


use std::time::Duration;
use test_helpers::{
    harness, test_config, wait_for_state, CLIENT_ID, IDENTIFIED_NOTIFICATION, NOTIFICATION,
};
use wmqtt::codec::{build_publish, parse_connect, parse_publish, PacketType, QoS};
use wmqtt::session::{Acknowledgment, SessionEvent};
use wmqtt::testing::ScriptedTransport;
use wmqtt::{ConnectionState, SessionError};

#[tokio::test]
async fn test_connect_subscribe_and_receive() {
    let transport = ScriptedTransport::new();
    let mut peer = transport.push_connection().await;
    let mut h = harness(test_config(), transport);
    let mut state = h.session.watch_state();

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    let connect = peer.next_packet().await.unwrap();
    let info = parse_connect(&connect).unwrap();
    assert_eq!(info.client_id, CLIENT_ID);
    assert_eq!(info.username.as_deref(), Some("dummy"));
    assert_eq!(info.protocol_name, "MQTT");
    assert_eq!(info.protocol_level, 4);

    peer.send_frame(vec![0x20, 0x02, 0x00, 0x00]);
    wait_for_state(&mut state, ConnectionState::Connected).await;

    let handle = h.session.subscribe("status/12345").await.unwrap();
    assert_eq!(handle.message_id(), 1);
    let subscribe = peer.next_frame().await.unwrap();
    let mut expected_subscribe = vec![0x82, 0x11, 0x00, 0x01, 0x00, 0x0C];
    expected_subscribe.extend_from_slice(b"status/12345");
    expected_subscribe.push(0x00);
    assert_eq!(subscribe.as_ref(), expected_subscribe.as_slice());

    peer.send_frame(vec![0x90, 0x03, 0x00, 0x01, 0x00]);
    let ack = handle.wait().await.unwrap();
    assert_eq!(
        ack,
        Acknowledgment::Subscribed {
            return_codes: vec![0]
        }
    );

    let publish = build_publish(
        "works.12345",
        NOTIFICATION.as_bytes(),
        QoS::AtMostOnce,
        false,
        false,
        0,
    )
    .unwrap();
    peer.send_packet(&publish);

    let message = h.messages.recv().await.unwrap();
    let expected: serde_json::Value = serde_json::from_str(NOTIFICATION).unwrap();
    assert_eq!(message.command, 1);
    assert_eq!(message.channel_id, "12345");
    assert_eq!(serde_json::Value::Object(message.body.clone()), expected);
    assert_eq!(message.sender_name(), Some("Alice"));
    assert_eq!(message.text(), Some("hi"));
    assert_eq!(message.channel_title(), Some("Test"));

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
    assert_eq!(h.session.state(), ConnectionState::Disconnected);

    let remaining = peer.drain_packets();
    assert!(remaining
        .iter()
        .any(|packet| packet.packet_type() == PacketType::Disconnect));
    assert!(h
        .observer
        .events()
        .iter()
        .any(|event| matches!(event, SessionEvent::Stopped)));
}

#[tokio::test]
async fn test_duplicate_notification_is_suppressed_but_acknowledged() {
    let transport = ScriptedTransport::new();
    let mut peer = transport.push_connection().await;
    let mut h = harness(test_config(), transport);
    let mut state = h.session.watch_state();

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    peer.next_packet().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;

    for message_id in [7u16, 8] {
        let publish = build_publish(
            "works.12345",
            IDENTIFIED_NOTIFICATION.as_bytes(),
            QoS::AtLeastOnce,
            false,
            false,
            message_id,
        )
        .unwrap();
        peer.send_packet(&publish);

        let puback = peer.next_packet().await.unwrap();
        assert_eq!(puback.packet_type(), PacketType::PubAck);
        assert_eq!(
            wmqtt::codec::parse_puback(&puback).unwrap(),
            message_id
        );
    }

    let other = r#"{"nType":1,"chNo":"999","notification-id":"n-2"}"#;
    let publish = build_publish("works.12345", other.as_bytes(), QoS::AtMostOnce, false, false, 0)
        .unwrap();
    peer.send_packet(&publish);

    let first = h.messages.recv().await.unwrap();
    let second = h.messages.recv().await.unwrap();
    assert_eq!(first.channel_id, "12345");
    assert_eq!(second.channel_id, "999");

    assert!(h.observer.events().iter().any(|event| matches!(
        event,
        SessionEvent::DuplicateSuppressed { identity } if identity == "notification:n-1"
    )));

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
}

#[tokio::test]
async fn test_unparseable_payload_keeps_connection() {
    let transport = ScriptedTransport::new();
    let mut peer = transport.push_connection().await;
    let mut h = harness(test_config(), transport);
    let mut state = h.session.watch_state();

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    peer.next_packet().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;

    let garbage = build_publish("works.12345", b"not json", QoS::AtMostOnce, false, false, 0)
        .unwrap();
    peer.send_packet(&garbage);
    let valid = build_publish(
        "works.12345",
        NOTIFICATION.as_bytes(),
        QoS::AtMostOnce,
        false,
        false,
        0,
    )
    .unwrap();
    peer.send_packet(&valid);

    let message = h.messages.recv().await.unwrap();
    assert_eq!(message.channel_id, "12345");
    assert_eq!(h.session.state(), ConnectionState::Connected);
    assert!(h
        .observer
        .events()
        .iter()
        .any(|event| matches!(event, SessionEvent::MessageDropped { .. })));

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
}

#[tokio::test]
async fn test_publish_qos1_resolves_on_puback() {
    let transport = ScriptedTransport::new();
    let mut peer = transport.push_connection().await;
    let h = harness(test_config(), transport);
    let mut state = h.session.watch_state();

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    peer.next_packet().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;

    let handle = h
        .session
        .publish("works.12345", b"{}", QoS::AtLeastOnce)
        .await
        .unwrap()
        .unwrap();
    let sent = peer.next_packet().await.unwrap();
    let publish = parse_publish(&sent).unwrap();
    assert_eq!(publish.message_id, Some(handle.message_id()));

    let id = handle.message_id().to_be_bytes();
    peer.send_frame(vec![0x40, 0x02, id[0], id[1]]);
    assert_eq!(handle.wait().await.unwrap(), Acknowledgment::Published);

    assert!(h
        .session
        .publish("works.12345", b"{}", QoS::AtMostOnce)
        .await
        .unwrap()
        .is_none());

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
}

#[tokio::test]
async fn test_rejected_subscription_fails_handle() {
    let transport = ScriptedTransport::new();
    let mut peer = transport.push_connection().await;
    let h = harness(test_config(), transport);
    let mut state = h.session.watch_state();

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    peer.next_packet().await.unwrap();
    wait_for_state(&mut state, ConnectionState::Connected).await;

    let handle = h.session.subscribe("status/forbidden").await.unwrap();
    peer.next_packet().await.unwrap();
    peer.send_frame(vec![0x90, 0x03, 0x00, 0x01, 0x80]);

    assert!(matches!(
        handle.wait().await,
        Err(SessionError::SubscriptionRejected { message_id: 1, ref return_codes })
            if return_codes == &vec![0x80]
    ));

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
}

#[tokio::test]
async fn test_standing_subscriptions_sent_after_connect() {
    let mut config = test_config();
    config.session.subscriptions = vec!["status/12345".to_string(), "works.12345".to_string()];

    let transport = ScriptedTransport::new();
    let mut peer = transport.push_connection().await;
    let h = harness(config, transport);

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    assert_eq!(
        peer.next_packet().await.unwrap().packet_type(),
        PacketType::Connect
    );
    for _ in 0..2 {
        assert_eq!(
            peer.next_packet().await.unwrap().packet_type(),
            PacketType::Subscribe
        );
    }

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_sends_pingreq() {
    let transport = ScriptedTransport::new();
    let mut peer = transport.push_connection().await;
    let h = harness(test_config(), transport);
    let interval = h.session.config().ping_interval();

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    peer.next_packet().await.unwrap();
    tokio::time::sleep(interval + Duration::from_millis(10)).await;

    let ping = peer.next_packet().await.unwrap();
    assert_eq!(ping.packet_type(), PacketType::PingReq);

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
}

#[tokio::test]
async fn test_refused_connack_is_fatal_without_auth_retry() {
    let mut config = test_config();
    config.session.await_connack = true;
    config.session.retry_on_auth_failure = false;

    let transport = ScriptedTransport::new();
    let mut peer = transport.push_connection().await;
    let h = harness(config, transport);

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    peer.next_packet().await.unwrap();
    assert_eq!(h.session.state(), ConnectionState::Connecting);
    peer.send_frame(vec![0x20, 0x02, 0x00, 0x05]);

    let result = runner.await.unwrap();
    assert!(matches!(result, Err(SessionError::Authentication(_))));
    assert!(!h.observer.states().contains(&ConnectionState::Connected));
}

#[tokio::test]
async fn test_accepted_connack_reaches_connected() {
    let mut config = test_config();
    config.session.await_connack = true;

    let transport = ScriptedTransport::new();
    let mut peer = transport.push_connection().await;
    let h = harness(config, transport);
    let mut state = h.session.watch_state();

    let session = h.session.clone();
    let runner = tokio::spawn(async move { session.run().await });

    assert_eq!(
        peer.next_packet().await.unwrap().packet_type(),
        PacketType::Connect
    );
    assert_eq!(h.session.state(), ConnectionState::Connecting);

    peer.send_frame(vec![0x20, 0x02, 0x00, 0x00]);
    wait_for_state(&mut state, ConnectionState::Connected).await;
    assert!(h.observer.events().iter().any(|event| matches!(
        event,
        SessionEvent::ConnAckReceived {
            session_present: false,
            return_code: 0
        }
    )));

    h.session.stop().await;
    tokio_test::assert_ok!(runner.await.unwrap());
    assert!(peer.is_closed());
}
