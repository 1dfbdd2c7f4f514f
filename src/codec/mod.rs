//! MQTT 3.1.1 wire codec
//!
//! Pure functions only: nothing here touches the transport.

pub mod builder;
pub mod packet;
pub mod parser;

pub use builder::{
    build_connect, build_disconnect, build_pingreq, build_puback, build_publish, build_subscribe,
    PROTOCOL_LEVEL, PROTOCOL_NAME,
};
pub use packet::{
    decode_remaining_length, encode_remaining_length, CodecError, Flags, Packet, PacketType, QoS,
    MAX_REMAINING_LENGTH,
};
pub use parser::{
    parse_connack, parse_connect, parse_packet, parse_puback, parse_publish, parse_suback,
    ConnAck, ConnectInfo, Publish, SubAck,
};
