//! Configuration Storage
//!
//! Reads the bridge config file and applies environment overrides.
//! Config location: `$OXIDE_WEBSSH_CONFIG`, else ~/.oxide-webssh/bridge.json

use std::path::{Path, PathBuf};

use tokio::fs;

use super::types::ServerConfig;

/// Explicit config file path
pub const ENV_CONFIG: &str = "OXIDE_WEBSSH_CONFIG";
pub const ENV_HOST: &str = "OXIDE_WEBSSH_HOST";
pub const ENV_PORT: &str = "OXIDE_WEBSSH_PORT";
pub const ENV_HOST_KEY_POLICY: &str = "OXIDE_WEBSSH_HOST_KEY_POLICY";
pub const ENV_KNOWN_HOSTS: &str = "OXIDE_WEBSSH_KNOWN_HOSTS";

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for {var}: {reason}")]
    InvalidOverride { var: &'static str, reason: String },
}

/// Get the bridge configuration directory (~/.oxide-webssh)
pub fn config_dir() -> Result<PathBuf, StorageError> {
    dirs::home_dir()
        .map(|home| home.join(".oxide-webssh"))
        .ok_or(StorageError::NoConfigDir)
}

/// Get the config file path, honoring `$OXIDE_WEBSSH_CONFIG`
pub fn config_file() -> Result<PathBuf, StorageError> {
    match std::env::var_os(ENV_CONFIG) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(config_dir()?.join("bridge.json")),
    }
}

/// Configuration storage manager
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Create a new storage manager with default path
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            path: config_file()?,
        })
    }

    /// Create storage manager with custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load configuration from disk.
    /// A missing file yields defaults; so does a corrupted one, with a warning.
    pub async fn load(&self) -> Result<ServerConfig, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => match serde_json::from_str::<ServerConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", self.path);
                    Ok(config)
                }
                Err(e) => {
                    tracing::warn!(
                        "Config file {:?} corrupted ({}), using defaults",
                        self.path,
                        e
                    );
                    Ok(ServerConfig::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at {:?}, using defaults", self.path);
                Ok(ServerConfig::default())
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// Apply `OXIDE_WEBSSH_*` overrides using `lookup` to read variables
pub fn apply_env<F>(config: &mut ServerConfig, lookup: F) -> Result<(), StorageError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    if let Some(host) = get(ENV_HOST) {
        config.bind_host = host.trim().to_string();
    }

    if let Some(port) = get(ENV_PORT) {
        config.bind_port = port
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| StorageError::InvalidOverride {
                var: ENV_PORT,
                reason: e.to_string(),
            })?;
    }

    if let Some(policy) = get(ENV_HOST_KEY_POLICY) {
        config.host_key_policy = policy
            .parse()
            .map_err(|reason| StorageError::InvalidOverride {
                var: ENV_HOST_KEY_POLICY,
                reason,
            })?;
    }

    if let Some(path) = get(ENV_KNOWN_HOSTS) {
        config.known_hosts_path = Some(PathBuf::from(path));
    }

    Ok(())
}

/// Load the config file and apply process environment overrides
pub async fn load_config() -> Result<ServerConfig, StorageError> {
    let storage = ConfigStorage::new()?;
    let mut config = storage.load().await?;
    apply_env(&mut config, |var| std::env::var(var).ok())?;
    Ok(config)
}
