//! WebSocket implementation of [`Transport`]

use super::{ConnectRequest, Connection, FrameSink, FrameStream, Transport, TransportError};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens `ws://` / `wss://` connections with tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, request: &ConnectRequest) -> Result<Connection, TransportError> {
        let http_request = build_http_request(request)?;

        debug!(url = %request.url, "Opening WebSocket connection");
        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(http_request))
            .await
            .map_err(|_| TransportError::Other("WebSocket connect timed out".to_string()))?
            .map_err(map_ws_error)?;
        debug!(status = response.status().as_u16(), "WebSocket handshake complete");

        let (sink, stream) = stream.split();
        Ok(Connection {
            sink: Box::new(WsSink { inner: sink }),
            stream: Box::new(WsFrames { inner: stream }),
        })
    }
}

fn build_http_request(
    request: &ConnectRequest,
) -> Result<tungstenite::handshake::client::Request, TransportError> {
    let mut http_request = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

    let headers = http_request.headers_mut();
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
        headers.insert(name, value);
    }

    if !request.subprotocol.is_empty() {
        let value = HeaderValue::from_str(&request.subprotocol)
            .map_err(|e| TransportError::InvalidRequest(format!("subprotocol: {e}")))?;
        headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(http_request)
}

fn map_ws_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Http(response) => TransportError::HandshakeRejected {
            status: response.status().as_u16(),
        },
        tungstenite::Error::ConnectionClosed => TransportError::closed("connection closed"),
        tungstenite::Error::AlreadyClosed => TransportError::closed("already closed"),
        tungstenite::Error::Io(e) => TransportError::Io(e),
        other => TransportError::Other(other.to_string()),
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait::async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.inner
            .send(Message::Binary(frame))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::AlreadyClosed | tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(map_ws_error(e)),
        }
    }
}

struct WsFrames {
    inner: SplitStream<WsStream>,
}

#[async_trait::async_trait]
impl FrameStream for WsFrames {
    async fn next_frame(&mut self) -> Option<Result<Bytes, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Binary(frame)) => return Some(Ok(frame)),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "close frame".to_string());
                    return Some(Err(TransportError::Closed { reason }));
                }
                Ok(Message::Text(text)) => {
                    warn!(len = text.len(), "Ignoring text frame on MQTT connection");
                }
                // control frames are answered by tungstenite
                Ok(_) => {}
                Err(e) => return Some(Err(map_ws_error(e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_headers_and_subprotocol() {
        let request = ConnectRequest::new("wss://jp1-web-noti.worksmobile.com/wmqtt", "mqtt")
            .with_header("Origin", "https://talk.worksmobile.com")
            .with_header("Cookie", "WORKS_USER_ID=1; NEO_SES=abc");
        let http_request = build_http_request(&request).unwrap();

        let headers = http_request.headers();
        assert_eq!(headers["origin"], "https://talk.worksmobile.com");
        assert_eq!(headers["cookie"], "WORKS_USER_ID=1; NEO_SES=abc");
        assert_eq!(headers[SEC_WEBSOCKET_PROTOCOL], "mqtt");
        assert_eq!(http_request.uri().host(), Some("jp1-web-noti.worksmobile.com"));
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let request = ConnectRequest::new("wss://example.com/", "mqtt").with_header("Cookie", "a\nb");
        assert!(matches!(
            build_http_request(&request),
            Err(TransportError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let request = ConnectRequest::new("not a url", "mqtt");
        assert!(matches!(
            build_http_request(&request),
            Err(TransportError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            map_ws_error(tungstenite::Error::ConnectionClosed),
            TransportError::Closed { .. }
        ));
        assert!(matches!(
            map_ws_error(tungstenite::Error::Io(std::io::Error::other("reset"))),
            TransportError::Io(_)
        ));
    }
}
