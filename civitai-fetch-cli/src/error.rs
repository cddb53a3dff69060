//! CLI error type.

use std::fmt;

use civitai_fetch::config::ConfigError;
use civitai_fetch::logging::LoggingError;
use civitai_fetch::FetchError;

/// Errors surfaced to the user by the CLI.
#[derive(Debug)]
pub enum CliError {
    /// Invalid or unreadable configuration.
    Config(String),
    /// Logging could not be set up.
    Logging(LoggingError),
    /// A fetch or organize run failed as a whole.
    Fetch(FetchError),
    /// The Ctrl+C handler could not be installed.
    Signal(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Logging setup failed: {}", e),
            CliError::Fetch(e) => write!(f, "{}", e),
            CliError::Signal(msg) => write!(f, "Failed to set signal handler: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Logging(e) => Some(e),
            CliError::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<FetchError> for CliError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Config(e) => CliError::Config(e.to_string()),
            other => CliError::Fetch(other),
        }
    }
}
