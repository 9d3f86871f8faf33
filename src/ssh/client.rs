//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::config::{ConnectionParameters, ShellOptions};
use super::error::SshError;
use super::known_hosts::{HostKeyPolicy, HostKeyVerification, KnownHostsStore};
use super::session::{RemoteConnector, SshTransport};

/// Opens password-authenticated SSH transports
pub struct SshConnector {
    config: Arc<client::Config>,
    shell: ShellOptions,
    policy: HostKeyPolicy,
    known_hosts: Arc<KnownHostsStore>,
}

impl SshConnector {
    pub fn new(shell: ShellOptions, policy: HostKeyPolicy, known_hosts: Arc<KnownHostsStore>) -> Self {
        let config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        Self {
            config: Arc::new(config),
            shell,
            policy,
            known_hosts,
        }
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    type Transport = SshTransport;

    async fn connect(&self, params: &ConnectionParameters) -> Result<SshTransport, SshError> {
        let addr = params.address();

        info!("Connecting to SSH server at {} as {}", addr, params.username);

        let socket_addr = tokio::net::lookup_host((params.host.as_str(), params.port))
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let handler = ClientHandler::new(
            params.host.clone(),
            params.port,
            self.policy,
            self.known_hosts.clone(),
        );

        let mut handle = client::connect(self.config.clone(), socket_addr, handler).await?;

        debug!("SSH handshake completed with {}", addr);

        let authenticated = handle
            .authenticate_password(&params.username, &params.password)
            .await
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;

        if !authenticated.success() {
            // Don't leave the rejected connection half-open
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "Authentication failed", "en")
                .await;
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}@{}", params.username, addr);

        Ok(SshTransport::new(
            handle,
            self.shell.clone(),
            format!("{}@{}", params.username, addr),
        ))
    }
}

/// Client handler for russh callbacks, verifies the server's host key
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Arc<KnownHostsStore>,
}

impl ClientHandler {
    pub fn new(
        host: String,
        port: u16,
        policy: HostKeyPolicy,
        known_hosts: Arc<KnownHostsStore>,
    ) -> Self {
        Self {
            host,
            port,
            policy,
            known_hosts,
        }
    }

    /// Decide whether to trust `server_public_key` under the configured policy
    pub fn evaluate_host_key(&self, server_public_key: &PublicKey) -> Result<bool, SshError> {
        if self.policy == HostKeyPolicy::AcceptAny {
            warn!(
                "Accepting host key for {}:{} without verification (fingerprint: {})",
                self.host,
                self.port,
                KnownHostsStore::fingerprint(server_public_key)
            );
            return Ok(true);
        }

        match self
            .known_hosts
            .verify(&self.host, self.port, server_public_key)
        {
            HostKeyVerification::Verified => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } => {
                if self.policy == HostKeyPolicy::Strict {
                    warn!(
                        "Unknown host key for {}:{} (fingerprint: {}). Strict mode enabled, rejecting.",
                        self.host, self.port, fingerprint
                    );
                    return Err(SshError::HostKeyRejected(format!(
                        "unknown host {}:{} (fingerprint: {})",
                        self.host, self.port, fingerprint
                    )));
                }

                info!(
                    "TOFU: New host {}:{}, adding to known_hosts (fingerprint: {})",
                    self.host, self.port, fingerprint
                );
                if let Err(e) = self
                    .known_hosts
                    .add_host(&self.host, self.port, server_public_key)
                {
                    warn!("Failed to save host key: {}", e);
                }
                Ok(true)
            }
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                warn!(
                    "HOST KEY CHANGED for {}:{}! Expected {}, got {}. POSSIBLE MITM ATTACK!",
                    self.host, self.port, expected_fingerprint, actual_fingerprint
                );
                Err(SshError::HostKeyRejected(format!(
                    "key for {}:{} has changed (expected {}, got {})",
                    self.host, self.port, expected_fingerprint, actual_fingerprint
                )))
            }
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        self.evaluate_host_key(server_public_key)
    }
}
