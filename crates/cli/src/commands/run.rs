//! Run Command - capture, compare and optionally upload

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use tracing::info;

use shotcheck_common::{RunMode, ShotConfig};
use shotcheck_core::report::RunReport;
use shotcheck_core::source::{collect_descriptors, sources_from_config};
use shotcheck_core::{
    ModeCapture, Orchestrator, PixelComparator, PlatformClient, RunPolicy, ShotItemBuilder,
    Summary, UploadNegotiator,
};

use crate::output::{print_list, print_message, print_warning, OutputFormat, ShotRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    GenerateOnly,
    Compare,
    Platform,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::GenerateOnly => RunMode::GenerateOnly,
            ModeArg::Compare => RunMode::Compare,
            ModeArg::Platform => RunMode::Platform,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Override the configured run mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Overwrite baselines with the current images when they differ
    #[arg(long)]
    pub update: bool,

    /// Report file (defaults to next to the current image directory)
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Load the configuration and apply command-line overrides
fn effective_config(config_dir: &Path, args: &RunArgs) -> Result<ShotConfig> {
    let mut config = super::load_config(config_dir)?;

    if let Some(mode) = args.mode {
        config.mode = mode.into();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate().context("invalid configuration for the requested mode")?;
    }

    Ok(config)
}

pub async fn execute(args: RunArgs, config_dir: &Path, format: OutputFormat) -> Result<i32> {
    let config = effective_config(config_dir, &args)?;
    info!("Running in {} mode", config.mode);

    let sources = sources_from_config(&config);
    let descriptors = collect_descriptors(&sources).await?;
    let items = ShotItemBuilder::from_config(&config)?.build(&descriptors)?;
    if items.is_empty() {
        print_warning("No shots to take");
    }

    let mut policy = RunPolicy::from_config(&config);
    policy.update_baselines = args.update;

    let orchestrator = Orchestrator::new(
        Arc::new(ModeCapture::from_config(&config)),
        Arc::new(PixelComparator::default()),
        policy,
    );
    let results = orchestrator.run(items).await;
    let summary = Summary::aggregate(&results, config.mode, config.fail_on_difference);

    let rows: Vec<ShotRow> = results.iter().map(ShotRow::from).collect();
    print_list(&rows, format);

    let mut report = RunReport::new(summary.clone(), results.clone());

    if config.mode == RunMode::Platform {
        let platform = config
            .platform
            .as_ref()
            .context("platform mode requires a [platform] section")?;
        let shots: Vec<_> = results.iter().filter_map(|r| r.extended()).collect();

        let client = PlatformClient::new(platform)?;
        let mut negotiator = UploadNegotiator::new(Arc::new(client), platform)?;
        let upload = negotiator.negotiate(&shots).await?;

        print_message(
            &format!(
                "Uploaded {} of {} images ({} already known)",
                upload.uploaded.len(),
                upload.offered,
                upload.skipped()
            ),
            format,
        );
        report = report.with_upload(upload);
    }

    let report_path = args
        .report
        .clone()
        .unwrap_or_else(|| RunReport::default_path(&config.image_path_current));
    report.write(&report_path)?;

    if format != OutputFormat::Json {
        for line in &summary.lines {
            println!("{}", line);
        }
        let headline = summary.headline();
        if summary.success {
            println!("{}", headline.green());
        } else {
            println!("{}", headline.red());
        }
    }

    Ok(summary.exit_code())
}
