//! Sorting a hand-maintained list of model ids into per-type link files.
//!
//! Each non-blank line of the id file contributes its first run of digits.
//! For every id the model is looked up and its page link appended to
//! `<type>.txt` in the output directory.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{CatalogFetcher, ModelType};
use crate::layout::sanitize_file_name;

/// Default id file name.
pub const ID_FILENAME: &str = "id.txt";

/// Public page of a model, without the id.
pub const MODEL_PAGE_BASE: &str = "https://civitai.com/models";

#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("failed to read id file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Contents of the id file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdList {
    /// The file did not exist and was created empty.
    Created,
    Loaded(Vec<u64>),
}

/// Totals of one organize run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizeSummary {
    pub organized: usize,
    pub failed: usize,
    /// Links written per type tag.
    pub by_type: BTreeMap<String, usize>,
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("id pattern is valid"))
}

/// Extract the first run of digits of every non-blank line.
pub fn parse_model_ids(content: &str) -> Vec<u64> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let id = id_pattern()
                .find(line)
                .and_then(|m| m.as_str().parse::<u64>().ok());
            if id.is_none() {
                warn!(line, "No model id on line, ignoring");
            }
            id
        })
        .collect()
}

/// Read the id file, creating it empty when missing.
pub fn read_model_ids(path: &Path) -> Result<IdList, OrganizeError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(IdList::Loaded(parse_model_ids(&content))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::write(path, "").map_err(|source| OrganizeError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            info!(path = %path.display(), "Created empty id file");
            Ok(IdList::Created)
        }
        Err(source) => Err(OrganizeError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Link file for a model type tag as the API reports it.
pub fn link_file(output_dir: &Path, type_tag: &str) -> PathBuf {
    let name = sanitize_file_name(type_tag).unwrap_or_else(|| ModelType::Other.to_string());
    output_dir.join(format!("{}.txt", name))
}

/// Page link of a model.
pub fn model_page_url(model_id: u64) -> String {
    format!("{}/{}", MODEL_PAGE_BASE, model_id)
}

/// Looks models up and appends their links to per-type files.
pub struct Organizer {
    fetcher: CatalogFetcher,
    output_dir: PathBuf,
}

impl Organizer {
    pub fn new(fetcher: CatalogFetcher, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            output_dir: output_dir.into(),
        }
    }

    /// Organize `ids` in order. Lookup failures are counted, write failures abort.
    pub fn organize(&self, ids: &[u64]) -> Result<OrganizeSummary, OrganizeError> {
        let mut summary = OrganizeSummary::default();

        for &id in ids {
            let model = match self.fetcher.fetch_model(id) {
                Ok(model) => model,
                Err(e) => {
                    warn!(model_id = id, error = %e, "Model lookup failed");
                    summary.failed += 1;
                    continue;
                }
            };

            let path = link_file(&self.output_dir, &model.type_tag);
            append_line(&path, &model_page_url(model.id))?;
            info!(model_id = model.id, model_type = %model.type_tag, "Link recorded");

            summary.organized += 1;
            *summary.by_type.entry(model.type_tag).or_default() += 1;
        }

        Ok(summary)
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), OrganizeError> {
    let write_err = |source| OrganizeError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(write_err)?;
    writeln!(file, "{}", line).map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::http::mock::{MockReply, ScriptedTransport};
    use std::sync::Arc;
    use tempfile::TempDir;

    const BASE: &str = "https://civitai.test/api/v1";

    fn model_json(id: u64, model_type: &str) -> Vec<u8> {
        format!(
            r#"{{"id": {}, "name": "m{}", "type": "{}", "modelVersions": []}}"#,
            id, id, model_type
        )
        .into_bytes()
    }

    #[test]
    fn test_parse_model_ids() {
        let ids = parse_model_ids(
            "4201\n\n  https://civitai.com/models/7371/some-name\nno digits here\nid 12 and 13\n",
        );
        assert_eq!(ids, vec![4201, 7371, 12]);
    }

    #[test]
    fn test_missing_id_file_is_created() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(ID_FILENAME);

        assert_eq!(read_model_ids(&path).unwrap(), IdList::Created);
        assert!(path.exists());
        assert_eq!(read_model_ids(&path).unwrap(), IdList::Loaded(vec![]));
    }

    #[test]
    fn test_organize_appends_links_by_type() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(
                    &format!("{}/models/1", BASE),
                    vec![MockReply::ok(model_json(1, "LORA"))],
                )
                .route(
                    &format!("{}/models/2", BASE),
                    vec![MockReply::ok(model_json(2, "Checkpoint"))],
                )
                .route(
                    &format!("{}/models/3", BASE),
                    vec![MockReply::ok(model_json(3, "LORA"))],
                ),
        );
        let organizer = Organizer::new(CatalogFetcher::with_base_url(transport, BASE), temp.path());

        let summary = organizer.organize(&[1, 2, 3, 404]).unwrap();

        assert_eq!(summary.organized, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.by_type.get("LORA"), Some(&2));
        let lora = fs::read_to_string(temp.path().join("LORA.txt")).unwrap();
        assert_eq!(
            lora,
            "https://civitai.com/models/1\nhttps://civitai.com/models/3\n"
        );
        let checkpoint = fs::read_to_string(temp.path().join("Checkpoint.txt")).unwrap();
        assert_eq!(checkpoint, "https://civitai.com/models/2\n");
    }

    #[test]
    fn test_unknown_types_get_their_own_link_files() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(
            ScriptedTransport::new()
                .route(
                    &format!("{}/models/5", BASE),
                    vec![MockReply::ok(model_json(5, "LoCon"))],
                )
                .route(
                    &format!("{}/models/6", BASE),
                    vec![MockReply::ok(model_json(6, "Controlnet"))],
                ),
        );
        let organizer = Organizer::new(CatalogFetcher::with_base_url(transport, BASE), temp.path());

        let summary = organizer.organize(&[5, 6]).unwrap();

        assert_eq!(summary.by_type.get("LoCon"), Some(&1));
        assert_eq!(summary.by_type.get("Controlnet"), Some(&1));
        let locon = fs::read_to_string(temp.path().join("LoCon.txt")).unwrap();
        assert_eq!(locon, "https://civitai.com/models/5\n");
        assert!(temp.path().join("Controlnet.txt").exists());
        assert!(!temp.path().join("Other.txt").exists());
    }

    #[test]
    fn test_link_file_sanitizes_tag() {
        let dir = Path::new("/links");
        assert_eq!(link_file(dir, "VAE"), PathBuf::from("/links/VAE.txt"));
        assert_eq!(link_file(dir, "a/b"), PathBuf::from("/links/a_b.txt"));
        assert_eq!(link_file(dir, ""), PathBuf::from("/links/Other.txt"));
    }
}
