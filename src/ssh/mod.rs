//! SSH module - the remote side of the bridge
//!
//! This module provides the remote shell collaborator using the russh library.
//!
//! # Features
//! - Password authentication
//! - PTY + interactive shell channel exposed as a byte stream
//! - Host key verification via known_hosts with a configurable policy
//! - Connection keepalive

mod client;
mod config;
mod error;
pub mod known_hosts;
mod session;

pub use client::{ClientHandler, SshConnector};
pub use config::{ConnectionParameters, ParameterError, ShellOptions, DEFAULT_SSH_PORT};
pub use error::SshError;
pub use known_hosts::{HostKeyPolicy, HostKeyVerification, KnownHostsStore};
pub use session::{RemoteConnector, RemoteSession, RemoteTransport, SshTransport};
