//! Configuration file handling.
//!
//! Settings live in an INI file at `~/.config/civitai-fetch/config.ini` (or the
//! platform equivalent). Every key is optional:
//!
//! ```ini
//! [api]
//! key = 0123abcd
//! base_url = https://civitai.com/api/v1
//! timeout_secs = 300
//!
//! [catalog]
//! types = Checkpoint, LORA
//! period = AllTime
//! sort = Newest
//! page_size = 100
//! favorites_only = true
//!
//! [download]
//! output_dir = /data/models
//! concurrency = 4
//! include_previews = true
//! format_priority = safetensors
//! primary_only = true
//! restrict_file_types = true
//! max_retries = 20
//! retry_backoff_ms = 1000
//! chunk_size_kb = 4096
//! verify_hashes = false
//! flush_every_items = 5
//! flush_every_mb = 1024
//! ```
//!
//! The rest of the library only sees the resolved [`FetchConfig`].

use std::env;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::catalog::{CatalogQuery, ModelType, DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE};
use crate::download::{
    CoordinatorConfig, TransferConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY,
    DEFAULT_FLUSH_EVERY_ITEMS, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS,
};
use crate::select::{FormatPriority, SelectionPolicy};
use crate::state::STATE_FILENAME;

/// Directory name under the platform config dir.
pub const CONFIG_DIR_NAME: &str = "civitai-fetch";

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Environment variable consulted for the API key.
pub const API_KEY_ENV: &str = "CIVITAI_API_KEY";

const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
const DEFAULT_FLUSH_EVERY_MB: u64 = 1024;

/// Errors loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("failed to write config file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("invalid value '{value}' for [{section}] {key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Platform config directory for this tool.
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Default config file location.
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Fully resolved settings for a fetch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,

    pub types: Vec<ModelType>,
    pub period: String,
    pub sort: String,
    pub page_size: u32,
    pub favorites_only: bool,

    pub output_dir: PathBuf,
    /// Explicit state file; defaults to `memory.json` in the output dir.
    pub state_file: Option<PathBuf>,
    pub concurrency: usize,
    pub include_previews: bool,
    pub format_priority: FormatPriority,
    pub primary_only: bool,
    pub restrict_file_types: bool,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub chunk_size_kb: usize,
    pub verify_hashes: bool,
    pub flush_every_items: usize,
    pub flush_every_mb: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            types: ModelType::ALL.to_vec(),
            period: "AllTime".to_string(),
            sort: "Newest".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            favorites_only: true,
            output_dir: PathBuf::from("."),
            state_file: None,
            concurrency: DEFAULT_CONCURRENCY,
            include_previews: true,
            format_priority: FormatPriority::default(),
            primary_only: true,
            restrict_file_types: true,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            chunk_size_kb: DEFAULT_CHUNK_SIZE / 1024,
            verify_hashes: false,
            flush_every_items: DEFAULT_FLUSH_EVERY_ITEMS,
            flush_every_mb: DEFAULT_FLUSH_EVERY_MB,
        }
    }
}

impl FetchConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_types(mut self, types: Vec<ModelType>) -> Self {
        self.types = types;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_previews(mut self, include: bool) -> Self {
        self.include_previews = include;
        self
    }

    pub fn with_format_priority(mut self, priority: FormatPriority) -> Self {
        self.format_priority = priority;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    pub fn with_verify_hashes(mut self, verify: bool) -> Self {
        self.verify_hashes = verify;
        self
    }

    pub fn with_favorites_only(mut self, favorites_only: bool) -> Self {
        self.favorites_only = favorites_only;
        self
    }

    /// Settle the API key: `explicit`, then `CIVITAI_API_KEY`, then the file.
    pub fn resolve_api_key(mut self, explicit: Option<String>) -> Self {
        let from_file = self.api_key.take();
        self.api_key = pick_api_key(explicit, env::var(API_KEY_ENV).ok(), from_file);
        self
    }

    /// Location of the state file.
    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.output_dir.join(STATE_FILENAME))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn catalog_query(&self) -> CatalogQuery {
        let mut query = CatalogQuery::default()
            .with_types(self.types.clone())
            .with_page_size(self.page_size)
            .with_favorites_only(self.favorites_only);
        query.period = self.period.clone();
        query.sort = self.sort.clone();
        query
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy::from_priority(self.format_priority)
            .with_primary_only(self.primary_only)
            .with_restricted_kinds(self.restrict_file_types)
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig::default()
            .with_max_retries(self.max_retries)
            .with_backoff(Duration::from_millis(self.retry_backoff_ms))
            .with_chunk_size(self.chunk_size_kb.max(1).saturating_mul(1024))
            .with_verify_hash(self.verify_hashes)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_concurrency(self.concurrency)
            .with_previews(self.include_previews)
            .with_flush_every_items(self.flush_every_items)
            .with_flush_every_bytes(self.flush_every_mb.saturating_mul(1024 * 1024))
    }
}

/// Redacts the API key when printing settings.
impl fmt::Display for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match &self.api_key {
            Some(k) if k.chars().count() > 4 => {
                let tail: String = k.chars().skip(k.chars().count() - 4).collect();
                format!("****{}", tail)
            }
            Some(_) => "****".to_string(),
            None => "(not set)".to_string(),
        };
        let types: Vec<&str> = self.types.iter().map(|t| t.as_str()).collect();
        let priority = match self.format_priority {
            FormatPriority::SafeTensorFirst => "safetensors",
            FormatPriority::PickleFirst => "pickle",
        };

        writeln!(f, "[api]")?;
        writeln!(f, "  key = {}", key)?;
        writeln!(f, "  base_url = {}", self.base_url)?;
        writeln!(f, "  timeout_secs = {}", self.timeout_secs)?;
        writeln!(f)?;
        writeln!(f, "[catalog]")?;
        writeln!(f, "  types = {}", types.join(", "))?;
        writeln!(f, "  period = {}", self.period)?;
        writeln!(f, "  sort = {}", self.sort)?;
        writeln!(f, "  page_size = {}", self.page_size)?;
        writeln!(f, "  favorites_only = {}", self.favorites_only)?;
        writeln!(f)?;
        writeln!(f, "[download]")?;
        writeln!(f, "  output_dir = {}", self.output_dir.display())?;
        writeln!(f, "  state_file = {}", self.state_path().display())?;
        writeln!(f, "  concurrency = {}", self.concurrency)?;
        writeln!(f, "  include_previews = {}", self.include_previews)?;
        writeln!(f, "  format_priority = {}", priority)?;
        writeln!(f, "  primary_only = {}", self.primary_only)?;
        writeln!(f, "  restrict_file_types = {}", self.restrict_file_types)?;
        writeln!(f, "  max_retries = {}", self.max_retries)?;
        writeln!(f, "  retry_backoff_ms = {}", self.retry_backoff_ms)?;
        writeln!(f, "  chunk_size_kb = {}", self.chunk_size_kb)?;
        writeln!(f, "  verify_hashes = {}", self.verify_hashes)?;
        writeln!(f, "  flush_every_items = {}", self.flush_every_items)?;
        write!(f, "  flush_every_mb = {}", self.flush_every_mb)
    }
}

/// The parsed INI file.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    ini: Ini,
}

impl ConfigFile {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self { ini })
    }

    /// Parse INI text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Read {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Ok(Self { ini })
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        self.ini.write_to_file(path).map_err(write_err)
    }

    /// Raw value of `[section] key`, empty strings treated as unset.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.ini
            .section(Some(section))
            .and_then(|s| s.get(key))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.ini.with_section(Some(section)).set(key, value.into());
    }

    /// Resolve every setting, falling back to defaults for absent keys.
    pub fn to_fetch_config(&self) -> Result<FetchConfig, ConfigError> {
        let defaults = FetchConfig::default();

        let types = match self.get("catalog", "types") {
            Some(raw) => parse_types(raw)?,
            None => defaults.types,
        };
        let format_priority = match self.get("download", "format_priority") {
            Some(raw) => FormatPriority::from_config_str(raw).ok_or_else(|| {
                invalid("download", "format_priority", raw, "expected safetensors or pickle")
            })?,
            None => defaults.format_priority,
        };

        Ok(FetchConfig {
            api_key: self.get("api", "key").map(str::to_string),
            base_url: self
                .get("api", "base_url")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            timeout_secs: self.number("api", "timeout_secs", defaults.timeout_secs)?,
            types,
            period: self
                .get("catalog", "period")
                .map(str::to_string)
                .unwrap_or(defaults.period),
            sort: self
                .get("catalog", "sort")
                .map(str::to_string)
                .unwrap_or(defaults.sort),
            page_size: self.number("catalog", "page_size", defaults.page_size)?,
            favorites_only: self.flag("catalog", "favorites_only", defaults.favorites_only)?,
            output_dir: self
                .get("download", "output_dir")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            state_file: self.get("download", "state_file").map(PathBuf::from),
            concurrency: self
                .number("download", "concurrency", defaults.concurrency)?
                .max(1),
            include_previews: self.flag("download", "include_previews", defaults.include_previews)?,
            format_priority,
            primary_only: self.flag("download", "primary_only", defaults.primary_only)?,
            restrict_file_types: self.flag(
                "download",
                "restrict_file_types",
                defaults.restrict_file_types,
            )?,
            max_retries: self.number("download", "max_retries", defaults.max_retries)?,
            retry_backoff_ms: self.number(
                "download",
                "retry_backoff_ms",
                defaults.retry_backoff_ms,
            )?,
            chunk_size_kb: self.number("download", "chunk_size_kb", defaults.chunk_size_kb)?,
            verify_hashes: self.flag("download", "verify_hashes", defaults.verify_hashes)?,
            flush_every_items: self.number(
                "download",
                "flush_every_items",
                defaults.flush_every_items,
            )?,
            flush_every_mb: self.number("download", "flush_every_mb", defaults.flush_every_mb)?,
        })
    }

    fn number<T>(&self, section: &str, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(section, key) {
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| invalid(section, key, raw, &e.to_string())),
            None => Ok(default),
        }
    }

    fn flag(&self, section: &str, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(section, key) {
            Some(raw) => {
                parse_bool(raw).ok_or_else(|| invalid(section, key, raw, "expected a boolean"))
            }
            None => Ok(default),
        }
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn pick_api_key(
    explicit: Option<String>,
    from_env: Option<String>,
    from_file: Option<String>,
) -> Option<String> {
    [explicit, from_env, from_file]
        .into_iter()
        .flatten()
        .map(|k| k.trim().to_string())
        .find(|k| !k.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a comma-separated list of model type tags.
pub fn parse_types(raw: &str) -> Result<Vec<ModelType>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|tag| {
            ModelType::from_tag(tag)
                .ok_or_else(|| invalid("catalog", "types", tag, "unknown model type"))
        })
        .collect()
}
