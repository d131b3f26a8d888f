//! Configuration management for importd
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use importd::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `IMPORTD__<section>__<key>`
//!
//! Examples:
//! - `IMPORTD__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `IMPORTD__QUEUE__WORKERS=8`
//! - `IMPORTD__SERVER__MAX_UPLOAD_BYTES=10MB`
//!
//! The JWT secret is read from `IMPORTD_JWT_SECRET` only.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/importd.toml`.
//! This can be overridden using the `IMPORTD_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    AuthConfig, AuthProvider, Config, GatewayConfig, ProgressConfig, QueueConfig, ServerConfig,
    StatusConfig, StorageConfig, StorageProvider,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`IMPORTD__*`, `IMPORTD_JWT_SECRET`)
    /// 2. TOML file (default: `config/importd.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Same as [`Config::load`] with an explicit file path
    pub fn load_with(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load and validate a specific file without touching `.env` or secrets
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)?;
        Ok(())
    }
}
