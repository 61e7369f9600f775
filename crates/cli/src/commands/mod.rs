//! CLI Commands

pub mod finalize;
pub mod init;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use shotcheck_common::ShotConfig;

/// Load the project configuration, with context on failure
pub fn load_config(config_dir: &Path) -> Result<ShotConfig> {
    ShotConfig::load(config_dir)
        .with_context(|| format!("cannot load configuration from {}", config_dir.display()))
}
