//! civitai-fetch CLI - Command-line interface
//!
//! Downloads favorited Civitai models into per-type directories, resuming
//! where earlier runs stopped.

mod commands;
mod error;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use civitai_fetch::logging::{init_logging, LoggingOptions};
use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::download::DownloadArgs;
use commands::organize::OrganizeArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "civitai-fetch", version, about = "Batch downloader for favorited Civitai models")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download the latest version of every favorited model
    Download(DownloadArgs),

    /// Sort model ids from a file into per-type link lists
    Organize(OrganizeArgs),

    /// Inspect or edit configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let mut options = LoggingOptions::default().verbose(cli.verbose);
    if let Some(path) = &cli.log_file {
        options = options.with_log_file(path);
    }
    let _guard = init_logging(&options)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Download(args) => commands::download::run(args, config_path),
        Commands::Organize(args) => {
            commands::organize::run(args, config_path).map(|_| ExitCode::SUCCESS)
        }
        Commands::Config { command } => {
            commands::config::run(command, config_path).map(|_| ExitCode::SUCCESS)
        }
    }
}
