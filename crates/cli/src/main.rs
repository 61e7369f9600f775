//! shotcheck CLI - Main Entry Point

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use shotcheck_cli::commands::{finalize, init, run};
use shotcheck_cli::output;

/// shotcheck - visual regression testing for component catalogs and pages
#[derive(Parser)]
#[command(name = "shotcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding shotcheck.toml
    #[arg(long, env = "SHOTCHECK_CONFIG_DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter shotcheck.toml
    Init(init::InitArgs),

    /// Capture and compare shots
    Run(run::RunArgs),

    /// Finalize the platform build
    Finalize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config_dir = cli
        .config_dir
        .unwrap_or_else(shotcheck_common::default_config_dir);

    let result = match cli.command {
        Commands::Init(args) => init::execute(args, &config_dir, cli.format),
        Commands::Run(args) => run::execute(args, &config_dir, cli.format).await,
        Commands::Finalize => finalize::execute(&config_dir, cli.format).await,
    };

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}
