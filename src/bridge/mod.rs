//! WebSocket Bridge Module
//!
//! Bridges a browser WebSocket to an interactive SSH shell.
//!
//! # Architecture
//!
//! ```text
//! Browser                    Bridge                         SSH Server
//! ┌──────────┐   WebSocket   ┌───────────────────────┐      ┌──────────┐
//! │ xterm.js │ ◄──────────► │ server → establish →  │ ◄──► │  shell   │
//! └──────────┘   /ssh?...    │          pump          │      └──────────┘
//!                            └───────────────────────┘
//! ```
//!
//! One task per connection. Nothing is shared between sessions except the
//! connector and its host-key store.

mod error;
mod establish;
mod pump;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use error::BridgeError;
pub use establish::{SessionEstablisher, CONNECTED_MESSAGE, DEFAULT_CONNECT_TIMEOUT};
pub use pump::{BridgeState, SessionResources, StreamBridge, REMOTE_CHUNK_SIZE};
pub use server::{handle_connection, run_session, WsBridgeServer, SSH_PATH};
