//! Choosing the one authoritative file of a model version.
//!
//! A model version often ships several files: the same weights as
//! `.safetensors` and `.ckpt`, a VAE, training data archives. The selector
//! walks the preferred extensions in order and, for each extension, the files
//! in catalog order, returning the first file that satisfies every predicate of
//! the [`SelectionPolicy`]. An earlier extension always beats a later one, no
//! matter where the files sit in the list.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::catalog::{CandidateFile, ModelRecord, ModelType, ModelVersion};
use crate::layout;

/// Extensions considered downloadable, safetensors first.
pub const SAFETENSORS_FIRST: [&str; 5] = [".safetensors", ".ckpt", ".pt", ".zip", ".bin"];

/// Extensions considered downloadable, pickle formats first.
pub const PICKLE_FIRST: [&str; 5] = [".ckpt", ".safetensors", ".zip", ".pt", ".bin"];

/// Which serialization format wins when both are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatPriority {
    #[default]
    SafeTensorFirst,
    PickleFirst,
}

impl FormatPriority {
    /// Parse a config value (`safetensors` or `pickle`).
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safetensors" | "safetensor" => Some(FormatPriority::SafeTensorFirst),
            "pickle" | "ckpt" | "pickletensor" => Some(FormatPriority::PickleFirst),
            _ => None,
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FormatPriority::SafeTensorFirst => &SAFETENSORS_FIRST,
            FormatPriority::PickleFirst => &PICKLE_FIRST,
        }
    }
}

/// Predicates a file must satisfy to be selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Lowercase extensions with leading dot, most preferred first.
    pub extensions: Vec<String>,
    /// Only files flagged primary qualify.
    pub primary_only: bool,
    /// Only Model, VAE and Pruned Model files qualify.
    pub restrict_kinds: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::from_priority(FormatPriority::default())
    }
}

impl SelectionPolicy {
    pub fn from_priority(priority: FormatPriority) -> Self {
        Self {
            extensions: priority.extensions().iter().map(|e| e.to_string()).collect(),
            primary_only: true,
            restrict_kinds: true,
        }
    }

    /// Replace the extension preference list.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| {
                let e = e.as_ref().trim().to_ascii_lowercase();
                if e.starts_with('.') {
                    e
                } else {
                    format!(".{}", e)
                }
            })
            .collect();
        self
    }

    pub fn with_primary_only(mut self, primary_only: bool) -> Self {
        self.primary_only = primary_only;
        self
    }

    pub fn with_restricted_kinds(mut self, restrict: bool) -> Self {
        self.restrict_kinds = restrict;
        self
    }

    /// Whether a file passes every predicate except the extension match.
    fn qualifies(&self, file: &CandidateFile) -> bool {
        let has_url = file.download_url.as_deref().is_some_and(|u| !u.is_empty());
        if !has_url || file.sha256().is_none() {
            return false;
        }
        if self.primary_only && !file.primary {
            return false;
        }
        if self.restrict_kinds && !file.kind.is_downloadable() {
            return false;
        }
        true
    }

    /// Pick the winning file of a list, if any.
    pub fn choose<'a>(&self, files: &'a [CandidateFile]) -> Option<&'a CandidateFile> {
        self.extensions.iter().find_map(|ext| {
            files.iter().find(|file| {
                file.extension().as_deref() == Some(ext.as_str()) && self.qualifies(file)
            })
        })
    }
}

/// A file chosen for download, with its local placement resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub model_id: u64,
    pub model_name: String,
    pub model_type: ModelType,
    pub version_id: u64,
    /// Leaf name on disk.
    pub file_name: String,
    /// Download URL including any format qualifier.
    pub download_url: String,
    pub expected_size: u64,
    pub sha256: Option<String>,
    pub target_dir: PathBuf,
    pub preview_url: Option<String>,
}

impl SelectedFile {
    /// Final location of the payload.
    pub fn target_path(&self) -> PathBuf {
        self.target_dir.join(&self.file_name)
    }
}

/// Flattened work derived from a catalog listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkList {
    /// Selected files in catalog order.
    pub items: Vec<SelectedFile>,
    /// Versions for which nothing satisfied the policy.
    pub unselectable: usize,
}

/// Applies a [`SelectionPolicy`] to catalog records.
#[derive(Debug, Clone)]
pub struct FileSelector {
    policy: SelectionPolicy,
    output_root: PathBuf,
}

impl FileSelector {
    pub fn new(policy: SelectionPolicy, output_root: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            output_root: output_root.into(),
        }
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Select the file to download for one version.
    ///
    /// `None` is a legitimate outcome, not an error.
    pub fn select(&self, model: &ModelRecord, version: &ModelVersion) -> Option<SelectedFile> {
        let file = self.policy.choose(&version.files)?;
        let url = file.download_url.as_deref()?;
        let file_name = layout::sanitize_file_name(&file.name)?;

        let download_url = match file.format().and_then(|f| f.query_value()) {
            Some(format) => with_query(url, "format", format),
            None => url.to_string(),
        };

        Some(SelectedFile {
            model_id: model.id,
            model_name: model.name.clone(),
            model_type: model.model_type,
            version_id: version.id,
            file_name,
            download_url,
            expected_size: file.size_bytes(),
            sha256: file.sha256().map(str::to_string),
            target_dir: layout::type_dir(&self.output_root, model.model_type),
            preview_url: version.preview_url().map(str::to_string),
        })
    }

    /// Build the work-list from the latest version of each model.
    pub fn work_list(&self, models: &[ModelRecord]) -> WorkList {
        let mut list = WorkList::default();

        for model in models {
            let Some(version) = model.latest_version() else {
                debug!(model_id = model.id, "Model has no versions, skipping");
                list.unselectable += 1;
                continue;
            };

            match self.select(model, version) {
                Some(item) => list.items.push(item),
                None => {
                    debug!(
                        model_id = model.id,
                        version_id = version.id,
                        files = version.files.len(),
                        "No file satisfies the selection policy"
                    );
                    list.unselectable += 1;
                }
            }
        }

        list
    }
}

/// Append `key=value` to a URL's query string.
fn with_query(url: &str, key: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", url, separator, key, value)
}
