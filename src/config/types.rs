//! Configuration Types
//!
//! Settings for one bridge process. Every field has a default, so a partial
//! (or absent) config file is valid.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ssh::{HostKeyPolicy, ShellOptions};

/// Bridge server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to listen on
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// TCP port to listen on
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Bound on SSH connect + authenticate, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// How unknown or changed host keys are treated
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,

    /// known_hosts file; `~/.ssh/known_hosts` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_path: Option<PathBuf>,

    /// PTY requested for each shell
    #[serde(default)]
    pub shell: ShellOptions,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    8000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
            shell: ShellOptions::default(),
        }
    }
}

impl ServerConfig {
    /// `host:port` for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
