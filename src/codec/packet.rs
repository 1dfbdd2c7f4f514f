//! MQTT 3.1.1 packet model and fixed-header framing
//!
//! A [`Packet`] is one complete protocol unit: the fixed-header byte (type in
//! the high nibble, flags in the low nibble), the base-128 remaining length,
//! and everything after it as an opaque payload. The remaining length is
//! always derived from the payload, never stored separately.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Largest value representable in four remaining-length bytes (2^28 - 1)
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Largest length-prefixed string the wire format can carry
pub const MAX_STRING_LENGTH: usize = u16::MAX as usize;

/// Packet codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Incomplete packet: expected {expected} bytes, got {available}")]
    IncompletePacket { expected: usize, available: usize },
    #[error("Malformed remaining length: more than 4 length bytes")]
    MalformedRemainingLength,
    #[error("Payload too large: {0} bytes exceeds remaining-length limit")]
    PayloadTooLarge(usize),
    #[error("String too long for length prefix: {0} bytes")]
    StringTooLong(usize),
    #[error("Empty frame")]
    EmptyFrame,
    #[error("{0} packet has no payload")]
    MissingPayload(PacketType),
    #[error("Truncated {field} field")]
    TruncatedField { field: &'static str },
    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },
    #[error("Expected {expected} packet, got {actual}")]
    UnexpectedPacketType {
        expected: PacketType,
        actual: PacketType,
    },
    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),
    #[error("SUBSCRIBE requires at least one topic")]
    EmptySubscription,
}

/// Control packet types used by this client profile
///
/// Types outside the profile are preserved as [`PacketType::Other`] so the
/// receive loop can log and skip them instead of failing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect,
    ConnAck,
    Publish,
    PubAck,
    Subscribe,
    SubAck,
    PingReq,
    PingResp,
    Disconnect,
    Other(u8),
}

impl PacketType {
    /// Map the high nibble of the fixed header to a packet type
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            other => PacketType::Other(other),
        }
    }

    /// Wire value of this packet type (the fixed header's high nibble)
    pub fn code(self) -> u8 {
        match self {
            PacketType::Connect => 1,
            PacketType::ConnAck => 2,
            PacketType::Publish => 3,
            PacketType::PubAck => 4,
            PacketType::Subscribe => 8,
            PacketType::SubAck => 9,
            PacketType::PingReq => 12,
            PacketType::PingResp => 13,
            PacketType::Disconnect => 14,
            PacketType::Other(code) => code & 0x0F,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketType::Connect => f.write_str("CONNECT"),
            PacketType::ConnAck => f.write_str("CONNACK"),
            PacketType::Publish => f.write_str("PUBLISH"),
            PacketType::PubAck => f.write_str("PUBACK"),
            PacketType::Subscribe => f.write_str("SUBSCRIBE"),
            PacketType::SubAck => f.write_str("SUBACK"),
            PacketType::PingReq => f.write_str("PINGREQ"),
            PacketType::PingResp => f.write_str("PINGRESP"),
            PacketType::Disconnect => f.write_str("DISCONNECT"),
            PacketType::Other(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

/// Delivery assurance level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(CodecError::InvalidQos(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// The 4-bit flags nibble: dup (bit 3), qos (bits 1-2), retain (bit 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);

    pub fn new(dup: bool, qos: QoS, retain: bool) -> Self {
        Flags(((dup as u8) << 3) | (qos.as_u8() << 1) | retain as u8)
    }

    pub fn from_bits(bits: u8) -> Self {
        Flags(bits & 0x0F)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn dup(self) -> bool {
        self.0 & 0x08 != 0
    }

    /// Raw QoS bits; 3 is reserved by the protocol but still reported
    pub fn qos_bits(self) -> u8 {
        (self.0 & 0x06) >> 1
    }

    pub fn retain(self) -> bool {
        self.0 & 0x01 != 0
    }
}

/// One complete MQTT control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    packet_type: PacketType,
    flags: Flags,
    payload: Option<Bytes>,
}

impl Packet {
    /// Build a packet; an empty payload is stored as absent
    pub fn new(packet_type: PacketType, flags: Flags, payload: Option<Bytes>) -> Self {
        Self {
            packet_type,
            flags,
            payload: payload.filter(|p| !p.is_empty()),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Exact byte length of the payload, 0 when absent
    pub fn remaining_length(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Serialize to a single binary frame
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let remaining = self.remaining_length();
        let mut buf = BytesMut::with_capacity(1 + 4 + remaining);
        buf.put_u8((self.packet_type.code() << 4) | self.flags.bits());
        encode_remaining_length(remaining, &mut buf)?;
        if let Some(payload) = &self.payload {
            buf.extend_from_slice(payload);
        }
        Ok(buf.freeze())
    }
}

/// Append `length` as a base-128 varint
pub fn encode_remaining_length(length: usize, buf: &mut BytesMut) -> Result<(), CodecError> {
    if length > MAX_REMAINING_LENGTH {
        return Err(CodecError::PayloadTooLarge(length));
    }

    let mut remaining = length;
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if remaining == 0 {
            return Ok(());
        }
    }
}

/// Decode a base-128 varint starting at `start`
///
/// Returns the decoded value and the index of the first byte after it.
pub fn decode_remaining_length(data: &[u8], start: usize) -> Result<(usize, usize), CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    let mut index = start;

    for _ in 0..4 {
        let byte = *data.get(index).ok_or(CodecError::IncompletePacket {
            expected: index + 1,
            available: data.len(),
        })?;
        value += (byte & 0x7F) as usize * multiplier;
        index += 1;
        if byte & 0x80 == 0 {
            return Ok((value, index));
        }
        multiplier *= 128;
    }

    Err(CodecError::MalformedRemainingLength)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_len(length: usize) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_remaining_length(length, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_remaining_length_boundaries() {
        assert_eq!(encode_len(0), vec![0x00]);
        assert_eq!(encode_len(127), vec![0x7F]);
        assert_eq!(encode_len(128), vec![0x80, 0x01]);
        assert_eq!(encode_len(16_383), vec![0xFF, 0x7F]);
        assert_eq!(encode_len(16_384), vec![0x80, 0x80, 0x01]);
        assert_eq!(
            encode_len(MAX_REMAINING_LENGTH),
            vec![0xFF, 0xFF, 0xFF, 0x7F]
        );
    }

    #[test]
    fn test_remaining_length_too_large() {
        let mut buf = BytesMut::new();
        assert_eq!(
            encode_remaining_length(MAX_REMAINING_LENGTH + 1, &mut buf),
            Err(CodecError::PayloadTooLarge(MAX_REMAINING_LENGTH + 1))
        );
    }

    #[test]
    fn test_fifth_continuation_byte_is_rejected() {
        let data = [0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert_eq!(
            decode_remaining_length(&data, 1),
            Err(CodecError::MalformedRemainingLength)
        );
    }

    #[test]
    fn test_length_past_buffer_end() {
        let data = [0x30, 0x80];
        assert!(matches!(
            decode_remaining_length(&data, 1),
            Err(CodecError::IncompletePacket { .. })
        ));
    }

    #[test]
    fn test_flags_layout() {
        let flags = Flags::new(true, QoS::AtLeastOnce, true);
        assert_eq!(flags.bits(), 0b1011);
        assert!(flags.dup());
        assert_eq!(flags.qos_bits(), 1);
        assert!(flags.retain());
        assert_eq!(Flags::from_bits(0xF2).bits(), 0x02);
    }

    #[test]
    fn test_packet_type_nibbles() {
        for code in 0u8..16 {
            assert_eq!(PacketType::from_nibble(code).code(), code);
        }
        assert_eq!(PacketType::from_nibble(5), PacketType::Other(5));
        assert_eq!(PacketType::Other(5).to_string(), "UNKNOWN(5)");
    }

    #[test]
    fn test_empty_payload_is_absent() {
        let packet = Packet::new(PacketType::PingReq, Flags::NONE, Some(Bytes::new()));
        assert!(packet.payload().is_none());
        assert_eq!(packet.remaining_length(), 0);
        assert_eq!(packet.encode().unwrap().as_ref(), &[0xC0, 0x00]);
    }

    proptest! {
        #[test]
        fn remaining_length_round_trips(length in 0usize..(1 << 21)) {
            let encoded = encode_len(length);
            let (decoded, next) = decode_remaining_length(&encoded, 0).unwrap();
            prop_assert_eq!(decoded, length);
            prop_assert_eq!(next, encoded.len());
        }
    }
}
