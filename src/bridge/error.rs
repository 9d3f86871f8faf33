//! Bridge error taxonomy
//!
//! Every failure a session can hit is one of these kinds. They are turned
//! into client-facing text only at the session boundary, by
//! [`BridgeError::client_message`].

use thiserror::Error;

use crate::ssh::{ParameterError, SshError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// host, username or password absent from the request
    #[error("Missing connection parameters")]
    MissingParameters,

    /// Parameters present but unusable (e.g. a non-numeric port)
    #[error("{0}")]
    InvalidParameters(String),

    /// Credentials rejected by the remote host
    #[error("{0}")]
    AuthenticationFailure(String),

    /// Connect, handshake, host key or channel-level failure
    #[error("{0}")]
    TransportFailure(String),

    /// Failure while bridging: decode error, write failure, remote closed
    #[error("{0}")]
    StreamFailure(String),

    /// Anything not covered above
    #[error("{0}")]
    Unexpected(String),

    /// The client went away. Not an error, ends the session silently.
    #[error("Client disconnected")]
    ClientDisconnected,
}

impl BridgeError {
    /// Text frame to send to the client, or `None` when nobody is listening
    pub fn client_message(&self) -> Option<String> {
        let text = match self {
            BridgeError::MissingParameters => "Missing connection parameters\r\n".to_string(),
            BridgeError::AuthenticationFailure(reason) => {
                format!("SSH authentication failed: {}\r\n", reason)
            }
            BridgeError::TransportFailure(reason) => format!("SSH error: {}\r\n", reason),
            BridgeError::InvalidParameters(reason) | BridgeError::Unexpected(reason) => {
                format!("Unexpected error: {}\r\n", reason)
            }
            BridgeError::StreamFailure(reason) => format!("Error: {}\r\n", reason),
            BridgeError::ClientDisconnected => return None,
        };
        Some(text)
    }

    pub fn is_client_disconnect(&self) -> bool {
        matches!(self, BridgeError::ClientDisconnected)
    }
}

impl From<ParameterError> for BridgeError {
    fn from(err: ParameterError) -> Self {
        match err {
            ParameterError::Missing => BridgeError::MissingParameters,
            ParameterError::InvalidPort(_) => BridgeError::InvalidParameters(err.to_string()),
        }
    }
}

impl From<SshError> for BridgeError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::AuthenticationFailed(reason) => BridgeError::AuthenticationFailure(reason),
            err if err.is_transport() => BridgeError::TransportFailure(err.to_string()),
            err => BridgeError::Unexpected(err.to_string()),
        }
    }
}
