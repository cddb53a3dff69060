//! The `download` command.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use civitai_fetch::config::parse_types;
use civitai_fetch::download::{DownloadObserver, NoopObserver};
use civitai_fetch::{FetchApp, FetchConfig, FetchReport};
use clap::Args;
use console::{style, Term};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::common::{load_config, FormatChoice};
use crate::error::CliError;
use crate::progress::BarObserver;

/// Exit code when some items failed.
const EXIT_PARTIAL: u8 = 2;

/// Exit code when the run was interrupted.
const EXIT_INTERRUPTED: u8 = 130;

/// Arguments for the download command.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Civitai API key (overrides CIVITAI_API_KEY and the config file)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Root directory for downloaded models
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// State file recording finished versions
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Number of concurrent transfers
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Comma-separated model types (e.g. Checkpoint,LORA)
    #[arg(long)]
    pub types: Option<String>,

    /// Preferred file format
    #[arg(long, value_enum)]
    pub format: Option<FormatChoice>,

    /// Skip preview images
    #[arg(long)]
    pub no_previews: bool,

    /// Verify SHA-256 hashes in addition to sizes
    #[arg(long)]
    pub verify_hashes: bool,

    /// Retries per file after the first attempt
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// List every model instead of only favorites
    #[arg(long)]
    pub all: bool,
}

impl DownloadArgs {
    /// Overlay command-line flags on file settings.
    fn apply(&self, mut config: FetchConfig) -> Result<FetchConfig, CliError> {
        if let Some(dir) = &self.output_dir {
            config = config.with_output_dir(dir);
        }
        if let Some(path) = &self.state_file {
            config = config.with_state_file(path);
        }
        if let Some(n) = self.concurrency {
            config = config.with_concurrency(n);
        }
        if let Some(raw) = &self.types {
            config = config.with_types(parse_types(raw)?);
        }
        if let Some(format) = self.format {
            config = config.with_format_priority(format.into());
        }
        if let Some(retries) = self.max_retries {
            config = config.with_max_retries(retries);
        }
        if self.no_previews {
            config = config.with_previews(false);
        }
        if self.verify_hashes {
            config = config.with_verify_hashes(true);
        }
        if self.all {
            config = config.with_favorites_only(false);
        }
        Ok(config)
    }
}

/// Run the download command.
pub fn run(args: DownloadArgs, config_path: Option<&Path>) -> Result<ExitCode, CliError> {
    let config = args.apply(load_config(config_path, args.api_key.clone())?)?;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Interrupted, finishing current chunks...");
        handler_token.cancel();
    })
    .map_err(|e| CliError::Signal(e.to_string()))?;

    debug!(
        output_dir = %config.output_dir.display(),
        state_file = %config.state_path().display(),
        concurrency = config.concurrency,
        favorites_only = config.favorites_only,
        "Resolved settings"
    );
    println!("Downloading to {}", config.output_dir.display());

    let bars = Term::stderr()
        .is_term()
        .then(|| Arc::new(BarObserver::new()));
    let observer: Arc<dyn DownloadObserver> = match &bars {
        Some(bars) => bars.clone() as Arc<dyn DownloadObserver>,
        None => Arc::new(NoopObserver),
    };

    let result = FetchApp::new(config)?
        .with_cancellation(token.clone())
        .with_observer(observer)
        .download();
    if let Some(bars) = &bars {
        bars.finish();
    }
    let report = result?;

    print_report(&report);

    let summary = &report.summary;
    Ok(if token.is_cancelled() || summary.cancelled > 0 {
        ExitCode::from(EXIT_INTERRUPTED)
    } else if summary.failed > 0 {
        ExitCode::from(EXIT_PARTIAL)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_report(report: &FetchReport) {
    let summary = &report.summary;

    println!();
    println!("Models listed:    {}", report.listed);
    println!("No usable file:   {}", report.unselectable);
    println!(
        "Downloaded:       {} ({} already on disk)",
        style(summary.succeeded).green(),
        summary.already_present
    );
    println!("Skipped:          {}", summary.skipped);
    println!("Failed:           {}", style(summary.failed).red());
    if summary.cancelled > 0 {
        println!("Cancelled:        {}", style(summary.cancelled).yellow());
    }
    println!("Transferred:      {}", format_bytes(summary.bytes_downloaded));

    if !summary.failures.is_empty() {
        println!();
        println!("Failures:");
        for failure in &summary.failures {
            println!(
                "  model {} ({}): {}",
                failure.model_id, failure.file_name, failure.reason
            );
        }
    }
}

/// Human-readable byte count.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
