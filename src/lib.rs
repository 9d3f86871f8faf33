//! OxideTerm WebSSH - WebSocket to SSH bridge
//!
//! Lets a browser terminal drive a remote shell without a native SSH client:
//! the browser opens `ws://<bridge>/ssh?host=..&port=..&username=..&password=..`
//! and the bridge relays bytes between that WebSocket and an SSH shell.

// Use mimalloc as the global allocator for better performance
// with high-frequency small allocations (WebSocket frames)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod bridge;
pub mod config;
pub mod ssh;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bridge::{SessionEstablisher, WsBridgeServer};
use config::ServerConfig;
use ssh::{KnownHostsStore, SshConnector};

/// Install the global tracing subscriber (`RUST_LOG`, default `info`)
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Bind the bridge and serve until the process exits
pub async fn run(config: ServerConfig) -> std::io::Result<()> {
    let known_hosts_path = config
        .known_hosts_path
        .clone()
        .unwrap_or_else(KnownHostsStore::default_path);
    let known_hosts = Arc::new(KnownHostsStore::open(known_hosts_path));
    tracing::info!(
        "Host key policy {:?}, known_hosts at {:?}",
        config.host_key_policy,
        known_hosts.path()
    );

    let connector = SshConnector::new(config.shell.clone(), config.host_key_policy, known_hosts);
    let establisher = SessionEstablisher::new(Arc::new(connector), config.connect_timeout());

    let server = WsBridgeServer::bind(&config.bind_addr(), establisher).await?;
    server.serve().await;
    Ok(())
}
