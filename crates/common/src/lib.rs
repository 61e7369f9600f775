//! shotcheck Common Library
//!
//! Shared types, configuration and content hashing for the shotcheck
//! visual regression pipeline.

pub mod config;
pub mod error;
pub mod hash;
pub mod types;

// Re-export commonly used types
pub use config::{
    Browser, CatalogShots, CustomShots, FilterConfig, MaskRule, PageShot, PageShots, PlatformConfig,
    RunMode, ShotConfig, Timeouts,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;

/// shotcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the project configuration file
pub const CONFIG_FILE_NAME: &str = "shotcheck.toml";

/// Environment variable pointing at the directory holding the config file
pub const CONFIG_DIR_ENV: &str = "SHOTCHECK_CONFIG_DIR";

/// Directory the config file is looked up in
pub fn default_config_dir() -> std::path::PathBuf {
    std::env::var_os(CONFIG_DIR_ENV)
        .map(std::path::PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| std::path::PathBuf::from("."))
}
