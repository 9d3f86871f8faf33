//! Remote shell session
//!
//! The bridge talks to the remote side through two traits so that the
//! russh-backed implementation and test doubles are interchangeable:
//!
//! - [`RemoteConnector`] opens and authenticates a transport
//! - [`RemoteTransport`] opens the interactive shell channel and closes itself
//!
//! The shell channel is any `AsyncRead + AsyncWrite` byte stream.

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::ChannelStream;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use super::client::ClientHandler;
use super::config::{ConnectionParameters, ShellOptions};
use super::error::SshError;

/// Opens authenticated transports to a remote host
#[async_trait]
pub trait RemoteConnector: Send + Sync + 'static {
    type Transport: RemoteTransport;

    /// Connect to `host:port` and authenticate with username/password
    async fn connect(&self, params: &ConnectionParameters) -> Result<Self::Transport, SshError>;
}

/// An authenticated connection that can host one interactive shell
#[async_trait]
pub trait RemoteTransport: Send + 'static {
    type Channel: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Request a PTY and an interactive shell
    async fn open_shell(&mut self) -> Result<Self::Channel, SshError>;

    /// Close the connection. Channels derived from it become invalid.
    async fn close(&mut self) -> Result<(), SshError>;
}

/// An authenticated transport plus the shell channel opened on it
pub struct RemoteSession<T: RemoteTransport> {
    pub transport: T,
    pub channel: T::Channel,
}

/// russh-backed transport
pub struct SshTransport {
    handle: Handle<ClientHandler>,
    shell: ShellOptions,
    label: String,
}

impl SshTransport {
    pub fn new(handle: Handle<ClientHandler>, shell: ShellOptions, label: String) -> Self {
        Self {
            handle,
            shell,
            label,
        }
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    type Channel = ChannelStream<Msg>;

    async fn open_shell(&mut self) -> Result<Self::Channel, SshError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(format!("Channel open failed: {}", e)))?;

        debug!("Channel opened on {}, requesting PTY", self.label);

        channel
            .request_pty(
                false,
                &self.shell.term,
                self.shell.cols,
                self.shell.rows,
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))?;

        info!("Interactive shell started on {}", self.label);
        Ok(channel.into_stream())
    }

    async fn close(&mut self) -> Result<(), SshError> {
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await?;
        debug!("SSH transport to {} disconnected", self.label);
        Ok(())
    }
}
