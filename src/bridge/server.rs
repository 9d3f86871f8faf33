//! WebSocket server for the SSH bridge
//!
//! Listens on the configured address, upgrades requests for `/ssh`, and runs
//! one isolated session task per connection. The SSH parameters come from
//! the upgrade request's query string.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::error::BridgeError;
use super::establish::SessionEstablisher;
use super::pump::StreamBridge;
use crate::ssh::{ConnectionParameters, RemoteConnector};

/// Path of the bridge endpoint
pub const SSH_PATH: &str = "/ssh";

/// WebSocket upgrade must complete within this window (seconds)
const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Bound on delivering an establishment error before closing (seconds)
const REPORT_TIMEOUT_SECS: u64 = 5;

/// Accepts WebSocket clients and bridges each to its own SSH session
pub struct WsBridgeServer<C: RemoteConnector> {
    listener: TcpListener,
    establisher: Arc<SessionEstablisher<C>>,
}

impl<C: RemoteConnector> WsBridgeServer<C> {
    /// Bind the listening socket
    pub async fn bind(addr: &str, establisher: SessionEstablisher<C>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            establisher: Arc::new(establisher),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever. Failures stay inside their session.
    pub async fn serve(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("WebSocket bridge listening on ws://{}{}", addr, SSH_PATH),
            Err(e) => warn!("WebSocket bridge listening (address unavailable: {})", e),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    // Disable Nagle's algorithm for low-latency interactive terminal
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY: {}", e);
                    }
                    debug!("TCP connection from {}", peer);

                    let establisher = self.establisher.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, establisher).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Upgrade one connection and run its session to completion
pub async fn handle_connection<S, C>(
    stream: S,
    peer: SocketAddr,
    establisher: Arc<SessionEstablisher<C>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: RemoteConnector,
{
    let mut request_uri: Option<Uri> = None;
    let callback = |request: &Request, response: Response| {
        if request.uri().path() != SSH_PATH {
            return Err(not_found());
        }
        request_uri = Some(request.uri().clone());
        Ok(response)
    };

    let ws = match tokio::time::timeout(
        Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        accept_hdr_async(stream, callback),
    )
    .await
    {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!("WebSocket handshake with {} timed out", peer);
            return;
        }
    };

    let query = request_uri.as_ref().and_then(Uri::query).map(str::to_owned);
    run_session(ws, peer, query.as_deref(), &establisher).await;
}

/// Drive one accepted WebSocket: parameters, establishment, bridging
pub async fn run_session<S, C>(
    ws: WebSocketStream<S>,
    peer: SocketAddr,
    query: Option<&str>,
    establisher: &SessionEstablisher<C>,
) -> BridgeError
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: RemoteConnector,
{
    let session_id = uuid::Uuid::new_v4().to_string();
    info!("WebSocket connection from {} (session {})", peer, session_id);

    let (mut sink, source) = ws.split();

    let params = match ConnectionParameters::from_query(query) {
        Ok(params) => params,
        Err(e) => {
            let err = BridgeError::from(e);
            warn!("Rejecting session {}: {}", session_id, err);
            report_and_close(&mut sink, &err).await;
            return err;
        }
    };

    let session = match establisher.establish(&params, &mut sink).await {
        Ok(session) => session,
        Err(err) => {
            match &err {
                BridgeError::ClientDisconnected => {
                    info!("WebSocket connection closed by client (session {})", session_id)
                }
                BridgeError::AuthenticationFailure(reason) => {
                    error!("SSH authentication failed for session {}: {}", session_id, reason)
                }
                BridgeError::TransportFailure(reason) => {
                    error!("SSH error for session {}: {}", session_id, reason)
                }
                other => error!("Unexpected error for session {}: {}", session_id, other),
            }
            report_and_close(&mut sink, &err).await;
            return err;
        }
    };
    drop(params);

    StreamBridge::new(session_id, session, sink, source).run().await
}

/// Send the error's client text (if any), then close the connection
async fn report_and_close<Si>(sink: &mut Si, err: &BridgeError)
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    let timeout = Duration::from_secs(REPORT_TIMEOUT_SECS);
    if let Some(text) = err.client_message() {
        if let Err(e) = tokio::time::timeout(timeout, sink.send(Message::Text(text))).await {
            debug!("Timed out reporting error to client: {}", e);
        }
    }
    let _ = tokio::time::timeout(timeout, sink.close()).await;
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Not Found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
