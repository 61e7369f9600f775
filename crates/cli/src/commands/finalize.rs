//! Finalize Command - closes a platform build after all runs uploaded

use std::path::Path;

use anyhow::{Context, Result};

use shotcheck_common::RunMode;
use shotcheck_core::platform::finalize_build;
use shotcheck_core::PlatformClient;

use crate::output::{print_message, print_success, OutputFormat};

pub async fn execute(config_dir: &Path, format: OutputFormat) -> Result<i32> {
    let mut config = super::load_config(config_dir)?;
    config.mode = RunMode::Platform;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate().context("finalize needs the platform settings")?;

    let platform = config
        .platform
        .as_ref()
        .context("finalize requires a [platform] section")?;

    let client = PlatformClient::new(platform)?;
    finalize_build(&client, platform).await?;

    match format {
        OutputFormat::Table => print_success("Build finalized"),
        _ => print_message("Build finalized", format),
    }
    Ok(0)
}
