//! Error types for shotcheck configuration

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using ConfigError
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Configuration errors. All of these are fatal before any shot runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required configuration properties: {}", .0.join(", "))]
    MissingProperties(Vec<String>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
