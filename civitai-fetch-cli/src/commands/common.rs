//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};

use civitai_fetch::config::{config_file_path, ConfigFile};
use civitai_fetch::select::FormatPriority;
use civitai_fetch::FetchConfig;
use clap::ValueEnum;

use crate::error::CliError;

/// Preferred serialization format for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum FormatChoice {
    /// Prefer .safetensors over pickle formats
    Safetensors,
    /// Prefer .ckpt and other pickle formats
    Pickle,
}

impl From<FormatChoice> for FormatPriority {
    fn from(choice: FormatChoice) -> Self {
        match choice {
            FormatChoice::Safetensors => FormatPriority::SafeTensorFirst,
            FormatChoice::Pickle => FormatPriority::PickleFirst,
        }
    }
}

/// Config file in effect: `--config` if given, otherwise the default location.
pub fn config_location(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path)
}

/// Load and resolve settings. The API key follows flag, env, file order.
pub fn load_config(
    explicit: Option<&Path>,
    api_key: Option<String>,
) -> Result<FetchConfig, CliError> {
    let path = config_location(explicit);
    if explicit.is_some() && !path.exists() {
        return Err(CliError::Config(format!(
            "config file {} does not exist",
            path.display()
        )));
    }

    let config = ConfigFile::load_from(&path)?.to_fetch_config()?;
    Ok(config.resolve_api_key(api_key))
}
