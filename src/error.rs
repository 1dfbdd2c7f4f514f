//! Crate-wide error taxonomy
//!
//! Each subsystem has its own `thiserror` enum; [`WorksError`] aggregates
//! them and classifies every failure into one [`ErrorKind`] so callers can
//! decide between retrying, dropping a message, or exiting.

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::credentials::CookieError;
use crate::message::NormalizeError;
use crate::session::SessionError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

const MAX_ERROR_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

static SECRET_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(NEO_SES|WORKS_SES\w*|password|passwd|token|secret|session|cookie)\s*[=:]\s*[^;,\s]+")
        .ok()
});

/// Failure classes and their handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing credentials or settings; fatal at startup
    Configuration,
    /// Transport failure; retried with backoff up to the limit
    Connection,
    /// Handshake or CONNACK rejection
    Authentication,
    /// Malformed frame; ends the current connection attempt
    Packet,
    /// Payload failed to normalize; the single message is dropped
    Message,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::Packet => "PacketError",
            ErrorKind::Message => "MessageError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum WorksError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Cookie(#[from] CookieError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl WorksError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorksError::Codec(_) => ErrorKind::Packet,
            WorksError::Normalize(_) => ErrorKind::Message,
            WorksError::Transport(e) if e.is_handshake_rejection() => ErrorKind::Authentication,
            WorksError::Transport(_) => ErrorKind::Connection,
            WorksError::Cookie(_) | WorksError::Config(_) => ErrorKind::Configuration,
            WorksError::Session(e) => e.kind(),
        }
    }

    /// Whether the outer retry loop should try again after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            WorksError::Session(e) => e.is_retryable(),
            other => matches!(
                other.kind(),
                ErrorKind::Connection | ErrorKind::Packet | ErrorKind::Authentication
            ),
        }
    }

    /// Display string safe to log
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

pub type WorksResult<T> = Result<T, WorksError>;

/// Redact credential-looking values and cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = match SECRET_PATTERN.as_ref() {
        Some(pattern) => pattern.replace_all(message, "${1}=***").into_owned(),
        None => message.to_string(),
    };

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let codec: WorksError = CodecError::MalformedRemainingLength.into();
        assert_eq!(codec.kind(), ErrorKind::Packet);
        assert!(codec.is_retryable());

        let message: WorksError = NormalizeError::MissingRequiredFields(vec!["cmd".into()]).into();
        assert_eq!(message.kind(), ErrorKind::Message);
        assert!(!message.is_retryable());

        let rejected: WorksError = TransportError::HandshakeRejected { status: 403 }.into();
        assert_eq!(rejected.kind(), ErrorKind::Authentication);

        let closed: WorksError = TransportError::closed("eof").into();
        assert_eq!(closed.kind(), ErrorKind::Connection);
        assert!(closed.is_retryable());

        let cookie: WorksError = CookieError::Empty.into();
        assert_eq!(cookie.kind(), ErrorKind::Configuration);
        assert!(!cookie.is_retryable());
    }

    #[test]
    fn test_session_errors_delegate() {
        let exhausted: WorksError = SessionError::RetriesExhausted {
            attempts: 4,
            last_error: "closed".to_string(),
        }
        .into();
        assert_eq!(exhausted.kind(), ErrorKind::Connection);
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn test_sanitize_redacts_cookies() {
        let sanitized = sanitize_error_message("handshake failed: NEO_SES=abc123; WORKS_USER_ID=1");
        assert!(!sanitized.contains("abc123"));
        assert!(sanitized.contains("NEO_SES=***"));
        assert!(sanitized.contains("WORKS_USER_ID=1"));

        let sanitized = sanitize_error_message("password: hunter2");
        assert_eq!(sanitized, "password=***");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(2000);
        let sanitized = sanitize_error_message(&long);
        assert_eq!(sanitized.len(), MAX_ERROR_MESSAGE_LEN);
        assert!(sanitized.ends_with(TRUNCATE_SUFFIX));

        let multibyte = "é".repeat(400);
        let sanitized = sanitize_error_message(&multibyte);
        assert!(sanitized.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(sanitized.ends_with(TRUNCATE_SUFFIX));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::Configuration.to_string(), "ConfigurationError");
        assert_eq!(ErrorKind::Message.to_string(), "MessageError");
    }
}
