//! wmqtt - Works Mobile push client
//!
//! Keeps a long-lived MQTT 3.1.1 session open over a WebSocket tunnel to the
//! Works Mobile push endpoint and turns every pushed payload into a
//! normalized [`WorksMessage`].
//!
//! # Overview
//!
//! - [`codec`]: binary MQTT packet model, builders and parsers
//! - [`message`]: envelope normalization into `WorksMessage`
//! - [`dedup`]: time-windowed duplicate suppression
//! - [`session`]: connection state machine with keepalive, acks and backoff
//! - [`transport`]: frame transport trait and the WebSocket implementation
//!
//! # Quick Start
//!
//! ```rust
//! use wmqtt::codec::{build_publish, parse_packet, parse_publish, QoS};
//! use wmqtt::message;
//!
//! let payload = br#"{"nType":1,"chNo":"12345","loc-args1":"hi"}"#;
//! let frame = build_publish("works.12345", payload, QoS::AtMostOnce, false, false, 0)
//!     .unwrap()
//!     .encode()
//!     .unwrap();
//!
//! let publish = parse_publish(&parse_packet(&frame).unwrap()).unwrap();
//! let msg = message::parse(&publish.payload).unwrap();
//! assert_eq!(msg.command, 1);
//! assert_eq!(msg.channel_id, "12345");
//! assert_eq!(msg.text(), Some("hi"));
//! ```

pub mod codec;
pub mod config;
pub mod credentials;
pub mod dedup;
pub mod error;
pub mod message;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use credentials::{CookieError, CookieFile, CookieJar, CookieSource};
pub use error::{ErrorKind, WorksError, WorksResult};
pub use message::{MessageType, WorksMessage};
pub use session::{ConnectionState, Session, SessionError};
pub use transport::{Transport, TransportError, WebSocketTransport};
