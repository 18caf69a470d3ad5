//! Configuration module for outdial-server.
//!
//! Handles loading configuration from the TOML file, CLI arguments, and
//! environment variables.

pub mod file;
pub mod runtime;

use crate::config::file::FileConfig;
use crate::config::runtime::{RuntimeConfig, ami_config, dialer_settings};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and validate the configuration.
    pub fn load(&self) -> Result<RuntimeConfig, ConfigError> {
        let raw = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&raw)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;

        Ok(RuntimeConfig {
            server: file_config.server.clone(),
            ami: ami_config(&file_config.ami),
            dialer: dialer_settings(&file_config.dialer),
        })
    }

    /// Re-read the file, for SIGHUP reloads.
    pub fn reload(&self) -> Result<RuntimeConfig, ConfigError> {
        self.load()
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.ami.username.is_empty() {
        return Err(ConfigError::ValidationError(
            "ami.username must not be empty".to_string(),
        ));
    }
    if config.ami.secret.is_empty() {
        return Err(ConfigError::ValidationError(
            "ami.secret must not be empty".to_string(),
        ));
    }
    if config.dialer.max_concurrent_calls == 0 {
        return Err(ConfigError::ValidationError(
            "dialer.max_concurrent_calls must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// The database URL comes from the environment, never the config file.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
