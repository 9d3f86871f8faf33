//! Stream Bridge
//!
//! Relays a remote shell channel and a WebSocket client until either side
//! stops. Two pumps run concurrently on the session task:
//!
//! - remote -> client: read up to [`REMOTE_CHUNK_SIZE`] bytes, decode UTF-8,
//!   send one text frame per read
//! - client -> remote: write every text/binary frame to the channel in order
//!
//! Whichever pump stops first cancels the other through a shared
//! [`CancellationToken`]. The session then moves `Bridging -> Closing ->
//! Closed`: a diagnostic frame is sent unless the client left on its own,
//! and [`SessionResources::release`] closes channel, transport and client.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::BridgeError;
use crate::ssh::{RemoteSession, RemoteTransport};

/// Maximum bytes read from the remote channel per client frame
pub const REMOTE_CHUNK_SIZE: usize = 4096;

/// Bound on sending the diagnostic frame and on each close during teardown
const TEARDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of one bridged session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Bridging,
    Closing,
    Closed,
}

/// Everything a session owns. Each resource is released at most once.
pub struct SessionResources<T: RemoteTransport, Si> {
    id: String,
    transport: Option<T>,
    channel: Option<T::Channel>,
    client: Option<Si>,
    state: BridgeState,
}

impl<T, Si> SessionResources<T, Si>
where
    T: RemoteTransport,
    Si: Sink<Message, Error = WsError> + Unpin + Send,
{
    pub fn new(id: String, session: RemoteSession<T>, client: Si) -> Self {
        Self {
            id,
            transport: Some(session.transport),
            channel: Some(session.channel),
            client: Some(client),
            state: BridgeState::Bridging,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    fn begin_closing(&mut self) {
        if self.state == BridgeState::Bridging {
            debug!("Session {} closing", self.id);
            self.state = BridgeState::Closing;
        }
    }

    /// Close channel, transport and client, in that order.
    ///
    /// Each close is attempted independently and its error only logged.
    /// Calling this again after the first call does nothing.
    pub async fn release(&mut self) {
        if self.state == BridgeState::Closed {
            return;
        }
        self.begin_closing();

        if let Some(mut channel) = self.channel.take() {
            match tokio::time::timeout(TEARDOWN_STEP_TIMEOUT, channel.shutdown()).await {
                Ok(Ok(())) => debug!("Remote channel closed for session {}", self.id),
                Ok(Err(e)) => debug!("Error closing remote channel for session {}: {}", self.id, e),
                Err(_) => warn!("Timed out closing remote channel for session {}", self.id),
            }
        }

        if let Some(mut transport) = self.transport.take() {
            match tokio::time::timeout(TEARDOWN_STEP_TIMEOUT, transport.close()).await {
                Ok(Ok(())) => debug!("Remote transport closed for session {}", self.id),
                Ok(Err(e)) => warn!("Error closing remote transport for session {}: {}", self.id, e),
                Err(_) => warn!("Timed out closing remote transport for session {}", self.id),
            }
        }

        if let Some(mut client) = self.client.take() {
            match tokio::time::timeout(TEARDOWN_STEP_TIMEOUT, client.close()).await {
                Ok(Ok(())) => debug!("Client connection closed for session {}", self.id),
                Ok(Err(e)) => debug!("Error closing client connection for session {}: {}", self.id, e),
                Err(_) => warn!("Timed out closing client connection for session {}", self.id),
            }
        }

        self.state = BridgeState::Closed;
        info!("Session {} closed", self.id);
    }
}

impl<T: RemoteTransport, Si> Drop for SessionResources<T, Si> {
    fn drop(&mut self) {
        // Dropping the handles still tears the sockets down, just without
        // a clean SSH disconnect or WebSocket close frame.
        if self.state != BridgeState::Closed {
            warn!("Session {} dropped before teardown completed", self.id);
        }
    }
}

/// Relays one session until termination, then tears it down
pub struct StreamBridge<T: RemoteTransport, Si, St> {
    resources: SessionResources<T, Si>,
    source: St,
}

impl<T, Si, St> StreamBridge<T, Si, St>
where
    T: RemoteTransport,
    Si: Sink<Message, Error = WsError> + Unpin + Send,
    St: Stream<Item = Result<Message, WsError>> + Unpin + Send,
{
    pub fn new(id: String, session: RemoteSession<T>, sink: Si, source: St) -> Self {
        Self {
            resources: SessionResources::new(id, session, sink),
            source,
        }
    }

    pub fn id(&self) -> &str {
        &self.resources.id
    }

    /// Bridge until either side stops. Returns what ended the session;
    /// [`BridgeError::ClientDisconnected`] for a normal client exit.
    pub async fn run(mut self) -> BridgeError {
        info!("Bridging started for session {}", self.resources.id);

        let cause = self.pump().await;
        self.resources.begin_closing();

        match &cause {
            BridgeError::ClientDisconnected => {
                info!("Client disconnected from session {}", self.resources.id)
            }
            other => warn!("Session {} terminated: {}", self.resources.id, other),
        }

        if let (Some(text), Some(client)) = (cause.client_message(), self.resources.client.as_mut())
        {
            // Best effort, the client may already be gone
            match tokio::time::timeout(TEARDOWN_STEP_TIMEOUT, client.send(Message::Text(text)))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Could not deliver error to client: {}", e),
                Err(_) => debug!("Timed out delivering error to client"),
            }
        }

        self.resources.release().await;
        cause
    }

    async fn pump(&mut self) -> BridgeError {
        let Some(channel) = self.resources.channel.take() else {
            return BridgeError::Unexpected("remote channel already released".to_string());
        };
        let (mut remote_rx, mut remote_tx) = tokio::io::split(channel);
        let cancel = CancellationToken::new();
        let id = self.resources.id.as_str();

        let cause = match self.resources.client.as_mut() {
            Some(sink) => {
                let (outbound, inbound) = tokio::join!(
                    remote_to_client(id, &mut remote_rx, sink, &cancel),
                    client_to_remote(id, &mut self.source, &mut remote_tx, &cancel),
                );
                termination_cause(outbound, inbound)
            }
            None => BridgeError::Unexpected("client connection already released".to_string()),
        };

        self.resources.channel = Some(remote_rx.unsplit(remote_tx));
        cause
    }
}

/// A client disconnect explains any concurrent failure on the other pump
fn termination_cause(
    outbound: Result<(), BridgeError>,
    inbound: Result<(), BridgeError>,
) -> BridgeError {
    match (outbound, inbound) {
        (Err(BridgeError::ClientDisconnected), _) | (_, Err(BridgeError::ClientDisconnected)) => {
            BridgeError::ClientDisconnected
        }
        (Err(e), _) | (_, Err(e)) => e,
        (Ok(()), Ok(())) => BridgeError::Unexpected("bridge stopped without a cause".to_string()),
    }
}

/// Remote output -> client text frames. `Ok` means cancelled by the other pump.
async fn remote_to_client<R, Si>(
    id: &str,
    reader: &mut R,
    sink: &mut Si,
    cancel: &CancellationToken,
) -> Result<(), BridgeError>
where
    R: AsyncRead + Unpin,
    Si: Sink<Message, Error = WsError> + Unpin,
{
    let _cancel_on_exit = cancel.clone().drop_guard();
    let mut buf = vec![0u8; REMOTE_CHUNK_SIZE];
    let mut decoder = Utf8Decoder::default();

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read(&mut buf) => read.map_err(|e| {
                BridgeError::StreamFailure(format!("remote read failed: {}", e))
            })?,
        };

        if n == 0 {
            debug!("Remote channel EOF for session {}", id);
            return Err(BridgeError::StreamFailure("remote channel closed".to_string()));
        }

        let text = decoder.decode(&buf[..n])?;
        if text.is_empty() {
            continue;
        }

        debug!("Remote -> client: {} bytes for session {}", text.len(), id);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = sink.send(Message::Text(text)) => sent.map_err(client_error)?,
        }
    }
}

/// Client frames -> remote channel. `Ok` means cancelled by the other pump.
async fn client_to_remote<St, W>(
    id: &str,
    source: &mut St,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<(), BridgeError>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let _cancel_on_exit = cancel.clone().drop_guard();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = source.next() => next,
        };

        let payload = match next {
            None => return Err(BridgeError::ClientDisconnected),
            Some(Err(e)) => return Err(client_error(e)),
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(frame))) => {
                debug!("Close frame from client for session {}: {:?}", id, frame);
                return Err(BridgeError::ClientDisconnected);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
        };

        debug!("Client -> remote: {} bytes for session {}", payload.len(), id);
        let write = async {
            writer.write_all(&payload).await?;
            writer.flush().await
        };
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            written = write => written.map_err(|e| {
                BridgeError::StreamFailure(format!("remote write failed: {}", e))
            })?,
        }
    }
}

/// Errors that mean the client is simply gone map to `ClientDisconnected`
fn client_error(err: WsError) -> BridgeError {
    match err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            BridgeError::ClientDisconnected
        }
        WsError::Io(ref e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ) =>
        {
            BridgeError::ClientDisconnected
        }
        other => BridgeError::StreamFailure(format!("client transport error: {}", other)),
    }
}

/// Incremental UTF-8 decoding across read boundaries.
///
/// A multi-byte sequence cut by the chunk size is held back until the rest
/// arrives; a sequence that can never be valid is an error.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> Result<String, BridgeError> {
        self.pending.extend_from_slice(chunk);

        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(BridgeError::StreamFailure(format!(
                    "remote output is not valid UTF-8: {}",
                    e
                )))
            }
        };

        let incomplete = self.pending.split_off(valid_up_to);
        let complete = std::mem::replace(&mut self.pending, incomplete);
        String::from_utf8(complete)
            .map_err(|e| BridgeError::StreamFailure(format!("remote output is not valid UTF-8: {}", e)))
    }
}
