//! Session establishment
//!
//! Turns connection parameters into a live [`RemoteSession`]: validate,
//! connect + authenticate under a timeout, acknowledge to the client, then
//! open the interactive shell. Any transport opened along the way is closed
//! again if a later step fails.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use super::error::BridgeError;
use crate::ssh::{ConnectionParameters, RemoteConnector, RemoteSession, RemoteTransport, SshError};

/// Sent once the remote host accepted the credentials
pub const CONNECTED_MESSAGE: &str = "Connected to SSH server\r\n";

/// Default bound on connect + authenticate
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SessionEstablisher<C: RemoteConnector> {
    connector: Arc<C>,
    connect_timeout: Duration,
}

impl<C: RemoteConnector> SessionEstablisher<C> {
    pub fn new(connector: Arc<C>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
        }
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    /// Establish a remote session for `params`, acknowledging to `client`.
    ///
    /// On error nothing has been sent to the client; the caller reports the
    /// error and closes the connection.
    pub async fn establish<Si>(
        &self,
        params: &ConnectionParameters,
        client: &mut Si,
    ) -> Result<RemoteSession<C::Transport>, BridgeError>
    where
        Si: Sink<Message, Error = WsError> + Unpin + Send,
    {
        params.validate()?;

        debug!(
            "Attempting SSH connection to {} with {}",
            params.address(),
            params.username
        );

        let mut transport =
            match tokio::time::timeout(self.connect_timeout, self.connector.connect(params)).await
            {
                Ok(Ok(transport)) => transport,
                Ok(Err(e)) => {
                    warn!("SSH connection to {} failed: {}", params.address(), e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!(
                        "SSH connection to {} timed out after {:?}",
                        params.address(),
                        self.connect_timeout
                    );
                    return Err(SshError::Timeout(format!(
                        "connection to {} timed out",
                        params.address()
                    ))
                    .into());
                }
            };

        if let Err(e) = client.send(Message::Text(CONNECTED_MESSAGE.to_string())).await {
            debug!("Client gone before connect acknowledgment: {}", e);
            close_transport(&mut transport).await;
            return Err(BridgeError::ClientDisconnected);
        }

        info!("SSH connection established to {}", params.address());

        match transport.open_shell().await {
            Ok(channel) => Ok(RemoteSession { transport, channel }),
            Err(e) => {
                warn!("Failed to open shell on {}: {}", params.address(), e);
                close_transport(&mut transport).await;
                Err(e.into())
            }
        }
    }
}

async fn close_transport<T: RemoteTransport>(transport: &mut T) {
    if let Err(e) = transport.close().await {
        debug!("Error closing partially opened transport: {}", e);
    }
}
