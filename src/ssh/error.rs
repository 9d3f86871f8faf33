//! SSH Error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("{0}")]
    AuthenticationFailed(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Host key verification failed: {0}")]
    HostKeyRejected(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Disconnected")]
    Disconnected,
}

impl SshError {
    /// Whether the failure happened at the connection/protocol level,
    /// as opposed to authentication or a local fault.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SshError::ConnectionFailed(_)
                | SshError::ChannelError(_)
                | SshError::ProtocolError(_)
                | SshError::HostKeyRejected(_)
                | SshError::Timeout(_)
        )
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(SshError::ConnectionFailed("refused".into()).is_transport());
        assert!(SshError::Timeout("connect".into()).is_transport());
        assert!(SshError::HostKeyRejected("changed".into()).is_transport());
        assert!(!SshError::AuthenticationFailed("nope".into()).is_transport());
        assert!(!SshError::Disconnected.is_transport());
    }

    #[test]
    fn test_auth_message_is_bare_reason() {
        let err = SshError::AuthenticationFailed("bad credentials".into());
        assert_eq!(err.to_string(), "bad credentials");
    }
}
