//! The `organize` command.

use std::path::{Path, PathBuf};

use civitai_fetch::organize::ID_FILENAME;
use civitai_fetch::{FetchApp, OrganizeReport};
use clap::Args;

use super::common::load_config;
use crate::error::CliError;

/// Arguments for the organize command.
#[derive(Debug, Args)]
pub struct OrganizeArgs {
    /// File with one model id per line
    #[arg(default_value = ID_FILENAME)]
    pub id_file: PathBuf,

    /// Directory receiving the per-type link files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Civitai API key (overrides CIVITAI_API_KEY and the config file)
    #[arg(long)]
    pub api_key: Option<String>,
}

/// Run the organize command.
pub fn run(args: OrganizeArgs, config_path: Option<&Path>) -> Result<(), CliError> {
    let mut config = load_config(config_path, args.api_key)?;
    if let Some(dir) = args.output_dir {
        config = config.with_output_dir(dir);
    }
    let output_dir = config.output_dir.clone();

    match FetchApp::new(config)?.organize(&args.id_file)? {
        OrganizeReport::IdFileCreated => {
            println!(
                "{} created. Add model ids to it and run again.",
                args.id_file.display()
            );
        }
        OrganizeReport::NoIds => {
            println!(
                "{} is empty. Add model ids to it and run again.",
                args.id_file.display()
            );
        }
        OrganizeReport::Organized(summary) => {
            println!("Links written to {}", output_dir.display());
            for (model_type, count) in &summary.by_type {
                println!("  {}.txt: {}", model_type, count);
            }
            if summary.failed > 0 {
                println!("  {} ids could not be looked up", summary.failed);
            }
        }
    }

    Ok(())
}
