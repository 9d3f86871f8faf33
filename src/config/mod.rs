//! Configuration Management Module
//!
//! Loads the bridge server settings from an optional JSON file, then applies
//! `OXIDE_WEBSSH_*` environment overrides.

pub mod storage;
pub mod types;

pub use storage::{apply_env, config_dir, config_file, load_config, ConfigStorage, StorageError};
pub use types::ServerConfig;
