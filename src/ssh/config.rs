//! SSH connection parameters
//!
//! Parameters arrive as the query string of the WebSocket upgrade request
//! (`/ssh?host=...&port=...&username=...&password=...`). They live for one
//! connection only and are never persisted.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Why a query string could not become usable connection parameters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("Missing connection parameters")]
    Missing,

    #[error("invalid port value '{0}'")]
    InvalidPort(String),
}

/// Per-connection SSH parameters
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Password for authentication
    pub password: String,
}

impl ConnectionParameters {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse and validate parameters from a raw query string.
    ///
    /// Required fields are checked before the port so that an incomplete
    /// request always reports [`ParameterError::Missing`].
    pub fn from_query(query: Option<&str>) -> Result<Self, ParameterError> {
        let query = query.unwrap_or_default();

        let host = query_param(query, "host").unwrap_or_default();
        let username = query_param(query, "username").unwrap_or_default();
        let password = query_param(query, "password").unwrap_or_default();

        let mut params = Self::new(host, DEFAULT_SSH_PORT, username, password);
        params.validate()?;

        if let Some(raw) = query_param(query, "port").filter(|raw| !raw.is_empty()) {
            params.port = parse_port(&raw).ok_or(ParameterError::InvalidPort(raw))?;
        }

        Ok(params)
    }

    /// Check that host, username and password are all present.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.host.is_empty() || self.username.is_empty() || self.password.is_empty() {
            return Err(ParameterError::Missing);
        }
        Ok(())
    }

    /// `host:port` for logging and address resolution
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Find and percent-decode a query parameter. The first occurrence wins.
fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut pieces = pair.splitn(2, '=');
        let name = decode_component(pieces.next().unwrap_or_default());
        if name != key {
            return None;
        }
        Some(decode_component(pieces.next().unwrap_or_default()))
    })
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        // Not valid UTF-8 once decoded; keep the raw text
        Err(_) => spaced,
    }
}

/// PTY settings for the interactive shell
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShellOptions {
    /// Terminal type sent with the PTY request
    #[serde(default = "default_term")]
    pub term: String,

    /// Terminal columns
    #[serde(default = "default_cols")]
    pub cols: u32,

    /// Terminal rows
    #[serde(default = "default_rows")]
    pub rows: u32,
}

fn default_term() -> String {
    "xterm-256color".to_string()
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            term: default_term(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_query() {
        let params = ConnectionParameters::from_query(Some(
            "host=example.com&port=2222&username=root&password=secret",
        ))
        .unwrap();
        assert_eq!(params, ConnectionParameters::new("example.com", 2222, "root", "secret"));
        assert_eq!(params.address(), "example.com:2222");
    }

    #[test]
    fn test_port_defaults_to_22() {
        let params =
            ConnectionParameters::from_query(Some("host=h&username=u&password=p")).unwrap();
        assert_eq!(params.port, 22);

        let params =
            ConnectionParameters::from_query(Some("host=h&port=&username=u&password=p")).unwrap();
        assert_eq!(params.port, 22);
    }

    #[test]
    fn test_missing_fields() {
        for query in [
            None,
            Some(""),
            Some("host=h&username=u"),
            Some("host=&username=u&password=p"),
            Some("host=h&username=&password=p"),
            Some("username=u&password=p&port=22"),
        ] {
            assert_eq!(
                ConnectionParameters::from_query(query),
                Err(ParameterError::Missing),
                "query {:?}",
                query
            );
        }
    }

    #[test]
    fn test_missing_wins_over_bad_port() {
        assert_eq!(
            ConnectionParameters::from_query(Some("host=h&port=abc")),
            Err(ParameterError::Missing)
        );
    }

    #[test]
    fn test_invalid_port() {
        for raw in ["abc", "0", "70000", "-1"] {
            let query = format!("host=h&username=u&password=p&port={}", raw);
            assert_eq!(
                ConnectionParameters::from_query(Some(&query)),
                Err(ParameterError::InvalidPort(raw.to_string()))
            );
        }
    }

    #[test]
    fn test_percent_decoding() {
        let params = ConnectionParameters::from_query(Some(
            "host=10.0.0.1&username=deploy&password=p%40ss+w%26rd%3D1",
        ))
        .unwrap();
        assert_eq!(params.password, "p@ss w&rd=1");
    }

    #[test]
    fn test_debug_redacts_password() {
        let params = ConnectionParameters::new("h", 22, "u", "hunter2");
        let rendered = format!("{:?}", params);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
