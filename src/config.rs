//! Client configuration
//!
//! Loaded from TOML. Every field has a default matching the service's wire
//! constants, so an empty file (or no file at all) yields a working setup.

use crate::transport::ConnectRequest;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Push endpoint of the Works Mobile web client
pub const DEFAULT_URL: &str = "wss://jp1-web-noti.worksmobile.com/wmqtt";
pub const DEFAULT_ORIGIN: &str = "https://talk.worksmobile.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
pub const DEFAULT_SUBPROTOCOL: &str = "mqtt";
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "web-beejs_";

/// Length of the random hex suffix appended to the client id prefix
const CLIENT_ID_SUFFIX_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub websocket: WebSocketSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub credentials: CredentialsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSocketSection {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Fixed client id; generated from the prefix when absent
    pub client_id: Option<String>,
    #[serde(default = "default_username")]
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable holding the password, takes precedence over `password`
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    /// Fail the connection when a PINGREQ goes unanswered for `ping_timeout_secs`
    #[serde(default)]
    pub enforce_ping_timeout: bool,
    #[serde(default = "default_true")]
    pub clean_session: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Backoff base; attempt n sleeps base * 2^(n-1)
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wait for CONNACK before reporting Connected
    #[serde(default)]
    pub await_connack: bool,
    #[serde(default = "default_connack_timeout")]
    pub connack_timeout_secs: u64,
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    /// When false a rejected handshake ends the session immediately
    #[serde(default = "default_true")]
    pub retry_on_auth_failure: bool,
    /// Topics subscribed after every successful connection
    #[serde(default)]
    pub subscriptions: Vec<String>,
    #[serde(default = "default_handler_buffer")]
    pub handler_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialsSection {
    #[serde(default = "default_cookie_file")]
    pub cookie_file: PathBuf,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_subprotocol() -> String {
    DEFAULT_SUBPROTOCOL.to_string()
}

fn default_client_id_prefix() -> String {
    DEFAULT_CLIENT_ID_PREFIX.to_string()
}

fn default_username() -> Option<String> {
    Some("dummy".to_string())
}

fn default_keep_alive() -> u16 {
    50
}

fn default_ping_interval() -> u64 {
    30
}

fn default_ping_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_retry_interval() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_connack_timeout() -> u64 {
    10
}

fn default_ack_timeout() -> u64 {
    30
}

fn default_dedup_window() -> u64 {
    60
}

fn default_handler_buffer() -> usize {
    256
}

fn default_cookie_file() -> PathBuf {
    PathBuf::from("cookie.json")
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            origin: default_origin(),
            user_agent: default_user_agent(),
            subprotocol: default_subprotocol(),
        }
    }
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            client_id_prefix: default_client_id_prefix(),
            client_id: None,
            username: default_username(),
            password: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
            enforce_ping_timeout: false,
            clean_session: true,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_retry_interval(),
            max_retries: default_max_retries(),
            await_connack: false,
            connack_timeout_secs: default_connack_timeout(),
            ack_timeout_secs: default_ack_timeout(),
            dedup_window_secs: default_dedup_window(),
            retry_on_auth_failure: true,
            subscriptions: Vec::new(),
            handler_buffer: default_handler_buffer(),
        }
    }
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            cookie_file: default_cookie_file(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.websocket.url).map_err(|e| {
            ConfigError::InvalidConfig(format!("websocket.url '{}': {e}", self.websocket.url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidConfig(format!(
                "websocket.url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if self.websocket.subprotocol.trim().is_empty() {
            return Err(invalid("websocket.subprotocol must not be empty"));
        }

        if self.mqtt.ping_interval_secs == 0 {
            return Err(invalid("mqtt.ping_interval_secs must be greater than 0"));
        }
        if self.mqtt.enforce_ping_timeout && self.mqtt.ping_timeout_secs == 0 {
            return Err(invalid("mqtt.ping_timeout_secs must be greater than 0"));
        }
        if self.mqtt.client_id.as_deref().is_some_and(str::is_empty) {
            return Err(invalid("mqtt.client_id must not be empty when set"));
        }

        let session = &self.session;
        if session.retry_interval_secs == 0 {
            return Err(invalid("session.retry_interval_secs must be greater than 0"));
        }
        if session.max_retries == 0 {
            return Err(invalid("session.max_retries must be greater than 0"));
        }
        if session.await_connack && session.connack_timeout_secs == 0 {
            return Err(invalid("session.connack_timeout_secs must be greater than 0"));
        }
        if session.ack_timeout_secs == 0 {
            return Err(invalid("session.ack_timeout_secs must be greater than 0"));
        }
        if session.handler_buffer == 0 {
            return Err(invalid("session.handler_buffer must be greater than 0"));
        }

        Ok(())
    }

    /// Configured client id, or prefix + 12 random hex characters
    pub fn client_id(&self) -> String {
        match &self.mqtt.client_id {
            Some(id) => id.clone(),
            None => generate_client_id(&self.mqtt.client_id_prefix),
        }
    }

    /// Password from `password_env` when set and present, else `password`
    pub fn mqtt_password(&self) -> Option<String> {
        self.mqtt
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .or_else(|| self.mqtt.password.clone())
    }

    /// Handshake request for the configured endpoint
    pub fn connect_request(&self, cookie_header: Option<&str>) -> ConnectRequest {
        let ws = &self.websocket;
        let request = ConnectRequest::new(ws.url.as_str(), ws.subprotocol.as_str())
            .with_header("Origin", ws.origin.as_str())
            .with_header("User-Agent", ws.user_agent.as_str());
        match cookie_header {
            Some(cookie) if !cookie.is_empty() => request.with_header("Cookie", cookie),
            _ => request,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.mqtt.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt.ping_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.session.retry_interval_secs)
    }

    pub fn connack_timeout(&self) -> Duration {
        Duration::from_secs(self.session.connack_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.session.ack_timeout_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.session.dedup_window_secs)
    }

    /// Create a test configuration with a fixed client id
    #[cfg(test)]
    pub fn test_config() -> Self {
        let mut config = Self::default();
        config.mqtt.client_id = Some("web-beejs_aabbccddeeff".to_string());
        config
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::InvalidConfig(message.to_string())
}

pub fn generate_client_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &suffix[..CLIENT_ID_SUFFIX_LEN])
}
