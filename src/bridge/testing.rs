//! Test doubles for the remote side and in-memory WebSocket pairs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{duplex, DuplexStream};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::ssh::{ConnectionParameters, RemoteConnector, RemoteTransport, SshError};

const PIPE_CAPACITY: usize = 64 * 1024;

/// How the mock connector responds to `connect`
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    RejectAuth(String),
    FailConnect(String),
    FailShell(String),
    Hang,
}

/// Counters shared between a mock connector and the transports it hands out
#[derive(Debug, Default)]
pub struct Calls {
    pub connects: AtomicUsize,
    pub shells: AtomicUsize,
    pub transport_closes: AtomicUsize,
}

impl Calls {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn shells(&self) -> usize {
        self.shells.load(Ordering::SeqCst)
    }

    pub fn transport_closes(&self) -> usize {
        self.transport_closes.load(Ordering::SeqCst)
    }
}

pub struct MockConnector {
    behavior: Behavior,
    shell_end: Mutex<Option<DuplexStream>>,
    fail_close: bool,
    pub calls: Arc<Calls>,
}

impl MockConnector {
    /// A connector plus the far end of the shell channel, which the test
    /// drives as if it were the remote shell.
    pub fn new(behavior: Behavior) -> (Self, DuplexStream) {
        let (shell_end, remote_end) = duplex(PIPE_CAPACITY);
        let connector = Self {
            behavior,
            shell_end: Mutex::new(Some(shell_end)),
            fail_close: false,
            calls: Arc::new(Calls::default()),
        };
        (connector, remote_end)
    }

    /// Transports from this connector fail when closed
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

#[async_trait]
impl RemoteConnector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, _params: &ConnectionParameters) -> Result<MockTransport, SshError> {
        self.calls.connects.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::RejectAuth(reason) => {
                return Err(SshError::AuthenticationFailed(reason.clone()))
            }
            Behavior::FailConnect(reason) => {
                return Err(SshError::ConnectionFailed(reason.clone()))
            }
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Succeed | Behavior::FailShell(_) => {}
        }

        let fail_shell = match &self.behavior {
            Behavior::FailShell(reason) => Some(reason.clone()),
            _ => None,
        };

        Ok(MockTransport {
            shell: self.shell_end.lock().take(),
            fail_shell,
            fail_close: self.fail_close,
            calls: self.calls.clone(),
        })
    }
}

pub struct MockTransport {
    shell: Option<DuplexStream>,
    fail_shell: Option<String>,
    fail_close: bool,
    calls: Arc<Calls>,
}

#[async_trait]
impl RemoteTransport for MockTransport {
    type Channel = DuplexStream;

    async fn open_shell(&mut self) -> Result<DuplexStream, SshError> {
        self.calls.shells.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.fail_shell {
            return Err(SshError::ChannelError(reason.clone()));
        }
        self.shell
            .take()
            .ok_or_else(|| SshError::ChannelError("shell already opened".to_string()))
    }

    async fn close(&mut self) -> Result<(), SshError> {
        self.calls.transport_closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(SshError::Disconnected);
        }
        Ok(())
    }
}

/// Connected (server, client) WebSocket pair without an HTTP handshake
pub async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (server_io, client_io) = duplex(PIPE_CAPACITY);
    tokio::join!(
        WebSocketStream::from_raw_socket(server_io, Role::Server, None),
        WebSocketStream::from_raw_socket(client_io, Role::Client, None),
    )
}

pub fn valid_params() -> ConnectionParameters {
    ConnectionParameters::new("shell.example.com", 22, "alice", "secret")
}
