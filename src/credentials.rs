//! Session cookie collaborator
//!
//! The push endpoint authenticates the WebSocket handshake with the browser
//! session cookies of a logged-in web client. They are read once at startup;
//! a missing or malformed jar is fatal and never retried.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cookie carrying the numeric id of the logged-in user
pub const USER_ID_COOKIE: &str = "WORKS_USER_ID";

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("Cookie file not readable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cookie file is not a JSON object of name/value pairs: {0}")]
    Malformed(String),
    #[error("Cookie jar is empty")]
    Empty,
}

/// Supplies the cookies sent with every handshake
pub trait CookieSource: Send + Sync {
    fn load(&self) -> Result<CookieJar, CookieError>;
}

/// Name/value cookies, serialized in a stable order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// `Cookie` header value: `name=value` pairs joined by `; `
    pub fn header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Parse a JSON object of cookie name to value
    ///
    /// Non-string scalar values are stringified; nested values are rejected.
    pub fn from_json(content: &str) -> Result<Self, CookieError> {
        let value: Value =
            serde_json::from_str(content).map_err(|e| CookieError::Malformed(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(CookieError::Malformed("top level is not an object".to_string()));
        };

        let mut jar = CookieJar::new();
        for (name, value) in object {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(CookieError::Malformed(format!(
                        "cookie {name} has non-scalar value {other}"
                    )))
                }
            };
            jar.insert(name, value);
        }

        if jar.is_empty() {
            return Err(CookieError::Empty);
        }
        Ok(jar)
    }

    /// Topics the web client subscribes to for this user
    pub fn default_subscriptions(&self) -> Vec<String> {
        match self.get(USER_ID_COOKIE) {
            Some(user_id) if !user_id.is_empty() => {
                vec![format!("status/{user_id}"), format!("works.{user_id}")]
            }
            _ => Vec::new(),
        }
    }
}

/// Cookie jar stored as a JSON file
#[derive(Debug, Clone)]
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CookieSource for CookieFile {
    fn load(&self) -> Result<CookieJar, CookieError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| CookieError::Unreadable {
            path: self.path.clone(),
            source,
        })?;
        CookieJar::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_header_serialization() {
        let jar = CookieJar::from_json(r#"{"WORKS_USER_ID": "12345", "NEO_SES": "abc"}"#).unwrap();
        assert_eq!(jar.header(), "NEO_SES=abc; WORKS_USER_ID=12345");
        assert_eq!(jar.get(USER_ID_COOKIE), Some("12345"));
        assert_eq!(jar.len(), 2);
    }

    #[test]
    fn test_numeric_values_are_stringified() {
        let jar = CookieJar::from_json(r#"{"WORKS_USER_ID": 12345}"#).unwrap();
        assert_eq!(jar.get(USER_ID_COOKIE), Some("12345"));
    }

    #[test]
    fn test_malformed_jars() {
        assert!(matches!(CookieJar::from_json("[]"), Err(CookieError::Malformed(_))));
        assert!(matches!(CookieJar::from_json("{"), Err(CookieError::Malformed(_))));
        assert!(matches!(
            CookieJar::from_json(r#"{"a": {"b": 1}}"#),
            Err(CookieError::Malformed(_))
        ));
        assert!(matches!(CookieJar::from_json("{}"), Err(CookieError::Empty)));
    }

    #[test]
    fn test_default_subscriptions() {
        let mut jar = CookieJar::new();
        assert!(jar.default_subscriptions().is_empty());
        jar.insert(USER_ID_COOKIE, "12345");
        assert_eq!(jar.default_subscriptions(), vec!["status/12345", "works.12345"]);
    }

    #[test]
    fn test_cookie_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"NEO_SES": "token"}}"#).unwrap();
        let jar = CookieFile::new(file.path()).load().unwrap();
        assert_eq!(jar.header(), "NEO_SES=token");

        let missing = CookieFile::new("/nonexistent/cookie.json").load();
        assert!(matches!(missing, Err(CookieError::Unreadable { .. })));
    }
}
