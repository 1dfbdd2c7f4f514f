//! Frame and packet-body parsing
//!
//! [`parse_packet`] turns one binary transport frame into a [`Packet`]; the
//! `parse_*` helpers decode the variable header and payload of the packet
//! types this client needs to inspect.

use super::builder::{CONNECT_FLAG_CLEAN_SESSION, CONNECT_FLAG_PASSWORD, CONNECT_FLAG_USERNAME};
use super::packet::{decode_remaining_length, CodecError, Flags, Packet, PacketType};
use bytes::Bytes;

/// Decoded PUBLISH contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    /// Present only when the QoS bits are non-zero
    pub message_id: Option<u16>,
    pub qos: u8,
    pub retain: bool,
    pub dup: bool,
}

/// Decoded CONNECT variable header and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub clean_session: bool,
    pub will_flag: bool,
    pub will_qos: u8,
    pub will_retain: bool,
    pub keep_alive_secs: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Decoded CONNACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    /// 0 means accepted; anything else is a refusal
    pub return_code: u8,
}

impl ConnAck {
    pub fn is_accepted(&self) -> bool {
        self.return_code == 0
    }
}

/// Decoded SUBACK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub message_id: u16,
    pub return_codes: Vec<u8>,
}

impl SubAck {
    /// Return code 0x80 marks a rejected topic filter
    pub fn is_success(&self) -> bool {
        self.return_codes.iter().all(|&code| code < 0x80)
    }
}

/// Parse one complete frame
///
/// Fails rather than returning a partial packet when the frame is shorter
/// than its declared remaining length.
pub fn parse_packet(data: &[u8]) -> Result<Packet, CodecError> {
    let first = *data.first().ok_or(CodecError::EmptyFrame)?;
    let packet_type = PacketType::from_nibble(first >> 4);
    let flags = Flags::from_bits(first);

    let (remaining_length, start) = decode_remaining_length(data, 1)?;
    let end = start + remaining_length;
    if data.len() < end {
        return Err(CodecError::IncompletePacket {
            expected: end,
            available: data.len(),
        });
    }

    let payload = (remaining_length > 0).then(|| Bytes::copy_from_slice(&data[start..end]));
    Ok(Packet::new(packet_type, flags, payload))
}

/// Extract topic, payload and message id from a PUBLISH
pub fn parse_publish(packet: &Packet) -> Result<Publish, CodecError> {
    expect_type(packet, PacketType::Publish)?;
    let body = packet
        .payload()
        .ok_or(CodecError::MissingPayload(PacketType::Publish))?;

    let mut reader = Reader::new(body);
    let topic = reader.read_string("topic")?;

    let flags = packet.flags();
    let message_id = if flags.qos_bits() > 0 {
        Some(reader.read_u16("message id")?)
    } else {
        None
    };

    Ok(Publish {
        topic,
        payload: body.slice(reader.position()..),
        message_id,
        qos: flags.qos_bits(),
        retain: flags.retain(),
        dup: flags.dup(),
    })
}

/// Decode a CONNECT; always fails on an absent payload
pub fn parse_connect(packet: &Packet) -> Result<ConnectInfo, CodecError> {
    expect_type(packet, PacketType::Connect)?;
    let body = packet
        .payload()
        .ok_or(CodecError::MissingPayload(PacketType::Connect))?;

    let mut reader = Reader::new(body);
    let protocol_name = reader.read_string("protocol name")?;
    let protocol_level = reader.read_u8("protocol level")?;
    let connect_flags = reader.read_u8("connect flags")?;
    let keep_alive_secs = reader.read_u16("keep alive")?;
    let client_id = reader.read_string("client id")?;

    let username = if connect_flags & CONNECT_FLAG_USERNAME != 0 {
        Some(reader.read_string("username")?)
    } else {
        None
    };
    let password = if connect_flags & CONNECT_FLAG_PASSWORD != 0 {
        Some(reader.read_string("password")?)
    } else {
        None
    };

    Ok(ConnectInfo {
        protocol_name,
        protocol_level,
        clean_session: connect_flags & CONNECT_FLAG_CLEAN_SESSION != 0,
        will_flag: connect_flags & 0x04 != 0,
        will_qos: (connect_flags & 0x18) >> 3,
        will_retain: connect_flags & 0x20 != 0,
        keep_alive_secs,
        client_id,
        username,
        password,
    })
}

pub fn parse_connack(packet: &Packet) -> Result<ConnAck, CodecError> {
    expect_type(packet, PacketType::ConnAck)?;
    let body = packet
        .payload()
        .ok_or(CodecError::MissingPayload(PacketType::ConnAck))?;

    let mut reader = Reader::new(body);
    let ack_flags = reader.read_u8("connack flags")?;
    let return_code = reader.read_u8("return code")?;
    Ok(ConnAck {
        session_present: ack_flags & 0x01 != 0,
        return_code,
    })
}

pub fn parse_suback(packet: &Packet) -> Result<SubAck, CodecError> {
    expect_type(packet, PacketType::SubAck)?;
    let body = packet
        .payload()
        .ok_or(CodecError::MissingPayload(PacketType::SubAck))?;

    let mut reader = Reader::new(body);
    let message_id = reader.read_u16("message id")?;
    Ok(SubAck {
        message_id,
        return_codes: reader.rest().to_vec(),
    })
}

pub fn parse_puback(packet: &Packet) -> Result<u16, CodecError> {
    expect_type(packet, PacketType::PubAck)?;
    let body = packet
        .payload()
        .ok_or(CodecError::MissingPayload(PacketType::PubAck))?;
    Reader::new(body).read_u16("message id")
}

fn expect_type(packet: &Packet, expected: PacketType) -> Result<(), CodecError> {
    if packet.packet_type() == expected {
        Ok(())
    } else {
        Err(CodecError::UnexpectedPacketType {
            expected,
            actual: packet.packet_type(),
        })
    }
}

/// Bounds-checked cursor over a packet body
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], CodecError> {
        let end = self.pos + len;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(CodecError::TruncatedField { field })?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, field)?[0])
    }

    fn read_u16(&mut self, field: &'static str) -> Result<u16, CodecError> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len = self.read_u16(field)? as usize;
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}
