//! Init Command - writes a starter configuration

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Args;

use shotcheck_common::CONFIG_FILE_NAME;

use crate::output::{print_message, print_success, OutputFormat};

pub const TEMPLATE: &str = include_str!("../../templates/shotcheck.toml");

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing configuration
    #[arg(long)]
    pub force: bool,
}

/// Write the template; returns the path written
pub fn write_template(config_dir: &Path, force: bool) -> Result<PathBuf> {
    let path = config_dir.join(CONFIG_FILE_NAME);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    std::fs::create_dir_all(config_dir)?;
    std::fs::write(&path, TEMPLATE)?;
    Ok(path)
}

pub fn execute(args: InitArgs, config_dir: &Path, format: OutputFormat) -> Result<i32> {
    let path = write_template(config_dir, args.force)?;
    match format {
        OutputFormat::Table => print_success(&format!("Created {}", path.display())),
        _ => print_message(&format!("Created {}", path.display()), format),
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shotcheck_common::{RunMode, ShotConfig};

    #[test]
    fn test_template_is_a_valid_config() {
        let config = ShotConfig::parse(TEMPLATE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.mode, RunMode::GenerateOnly);
        assert_eq!(config.shot_concurrency, 5);
        assert!(config.storybook_shots.is_some());
    }

    #[test]
    fn test_write_template_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(dir.path(), false).unwrap();
        assert!(path.exists());

        std::fs::write(&path, "custom = true").unwrap();
        assert!(write_template(dir.path(), false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "custom = true");

        write_template(dir.path(), true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), TEMPLATE);
    }
}
