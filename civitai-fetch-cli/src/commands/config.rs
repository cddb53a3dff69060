//! Configuration management CLI commands.
//!
//! Provides `config path`, `config show` and `config set` for inspecting and
//! editing the settings file from the command line.

use std::path::Path;

use civitai_fetch::config::ConfigFile;
use clap::Subcommand;

use super::common::{config_location, load_config};
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Show the resolved settings (API key redacted)
    Show,

    /// Set a configuration value
    Set {
        /// Key in format section.key (e.g., download.concurrency)
        key: String,

        /// Value to set
        value: String,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config_path: Option<&Path>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => run_path(config_path),
        ConfigCommands::Show => run_show(config_path),
        ConfigCommands::Set { key, value } => run_set(config_path, &key, &value),
    }
}

fn run_path(config_path: Option<&Path>) -> Result<(), CliError> {
    let path = config_location(config_path);
    println!("{}", path.display());
    if !path.exists() {
        println!("(file does not exist, defaults are in effect)");
    }
    Ok(())
}

fn run_show(config_path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config_path, None)?;
    println!("{}", config);
    Ok(())
}

fn run_set(config_path: Option<&Path>, key: &str, value: &str) -> Result<(), CliError> {
    let (section, name) = split_key(key)?;
    let path = config_location(config_path);

    let mut file = ConfigFile::load_from(&path)?;
    file.set(section, name, value);
    // Reject values the loader would refuse.
    file.to_fetch_config()?;
    file.save_to(&path)?;

    println!("Set [{}] {} = {}", section, name, value);
    Ok(())
}

fn split_key(key: &str) -> Result<(&str, &str), CliError> {
    match key.split_once('.') {
        Some((section, name)) if !section.is_empty() && !name.is_empty() => Ok((section, name)),
        _ => Err(CliError::Config(format!(
            "Key '{}' must be in format section.key (e.g., download.concurrency)",
            key
        ))),
    }
}
