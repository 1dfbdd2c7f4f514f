//! Pure builders for outbound packets

use super::packet::{CodecError, Flags, Packet, PacketType, QoS, MAX_STRING_LENGTH};
use bytes::{BufMut, BytesMut};

/// Protocol name carried in every CONNECT
pub const PROTOCOL_NAME: &str = "MQTT";

/// MQTT 3.1.1
pub const PROTOCOL_LEVEL: u8 = 4;

pub(crate) const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;
pub(crate) const CONNECT_FLAG_PASSWORD: u8 = 0x40;
pub(crate) const CONNECT_FLAG_USERNAME: u8 = 0x80;

/// SUBSCRIBE's fixed-header flags are mandated by the protocol
const SUBSCRIBE_FLAGS: u8 = 0x02;

/// Build a CONNECT packet
pub fn build_connect(
    client_id: &str,
    username: Option<&str>,
    password: Option<&str>,
    keep_alive_secs: u16,
    clean_session: bool,
) -> Result<Packet, CodecError> {
    let mut connect_flags = 0u8;
    if clean_session {
        connect_flags |= CONNECT_FLAG_CLEAN_SESSION;
    }
    if username.is_some() {
        connect_flags |= CONNECT_FLAG_USERNAME;
    }
    if password.is_some() {
        connect_flags |= CONNECT_FLAG_PASSWORD;
    }

    let mut buf = BytesMut::new();
    put_string(&mut buf, PROTOCOL_NAME)?;
    buf.put_u8(PROTOCOL_LEVEL);
    buf.put_u8(connect_flags);
    buf.put_u16(keep_alive_secs);

    put_string(&mut buf, client_id)?;
    if let Some(username) = username {
        put_string(&mut buf, username)?;
    }
    if let Some(password) = password {
        put_string(&mut buf, password)?;
    }

    Ok(Packet::new(PacketType::Connect, Flags::NONE, Some(buf.freeze())))
}

/// Build a SUBSCRIBE packet for an ordered list of (topic, requested QoS)
pub fn build_subscribe(message_id: u16, topics: &[(&str, QoS)]) -> Result<Packet, CodecError> {
    if topics.is_empty() {
        return Err(CodecError::EmptySubscription);
    }

    let mut buf = BytesMut::new();
    buf.put_u16(message_id);
    for (topic, qos) in topics {
        put_string(&mut buf, topic)?;
        buf.put_u8(qos.as_u8());
    }

    Ok(Packet::new(
        PacketType::Subscribe,
        Flags::from_bits(SUBSCRIBE_FLAGS),
        Some(buf.freeze()),
    ))
}

/// Build a PUBLISH packet
///
/// `message_id` is written only when `qos` is above [`QoS::AtMostOnce`].
pub fn build_publish(
    topic: &str,
    payload: &[u8],
    qos: QoS,
    retain: bool,
    dup: bool,
    message_id: u16,
) -> Result<Packet, CodecError> {
    let mut buf = BytesMut::with_capacity(2 + topic.len() + 2 + payload.len());
    put_string(&mut buf, topic)?;
    if qos != QoS::AtMostOnce {
        buf.put_u16(message_id);
    }
    buf.extend_from_slice(payload);

    Ok(Packet::new(
        PacketType::Publish,
        Flags::new(dup, qos, retain),
        Some(buf.freeze()),
    ))
}

/// Build a PUBACK acknowledging an inbound QoS 1 PUBLISH
pub fn build_puback(message_id: u16) -> Packet {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16(message_id);
    Packet::new(PacketType::PubAck, Flags::NONE, Some(buf.freeze()))
}

pub fn build_pingreq() -> Packet {
    Packet::new(PacketType::PingReq, Flags::NONE, None)
}

pub fn build_disconnect() -> Packet {
    Packet::new(PacketType::Disconnect, Flags::NONE, None)
}

/// 2-byte big-endian length prefix followed by UTF-8 bytes
fn put_string(buf: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    let bytes = value.as_bytes();
    if bytes.len() > MAX_STRING_LENGTH {
        return Err(CodecError::StringTooLong(bytes.len()));
    }
    buf.put_u16(bytes.len() as u16);
    buf.extend_from_slice(bytes);
    Ok(())
}
