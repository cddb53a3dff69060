//! Tracing subscriber setup.
//!
//! Installs a stderr layer and, optionally, a non-blocking file layer. The
//! filter comes from `RUST_LOG` when set, otherwise from the verbosity flag.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Logging options.
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Default to `debug` instead of `info`.
    pub verbose: bool,
    /// Also append logs to this file.
    pub log_file: Option<PathBuf>,
}

impl LoggingOptions {
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Filter directive used when `RUST_LOG` is absent.
    pub fn default_directive(&self) -> &'static str {
        if self.verbose {
            "civitai_fetch=debug,civitai_fetch_cli=debug,info"
        } else {
            "info"
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {}: {source}", path.display())]
    LogFile { path: PathBuf, source: io::Error },

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Keeps the file writer alive. Dropping it flushes pending log lines.
#[derive(Debug)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init_logging(options: &LoggingOptions) -> Result<LoggingGuard, LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_directive()));

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(local_timer())
        .with_target(options.verbose)
        .boxed();

    let (file_layer, guard) = match &options.log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_timer(local_timer())
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LoggingGuard { _file: guard })
}

fn local_timer() -> OffsetTime<Rfc3339> {
    let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LoggingError> {
    let log_err = |source| LoggingError::LogFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(log_err)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(log_err)
}
