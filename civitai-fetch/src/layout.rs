//! Local filesystem layout.
//!
//! ```text
//! <output_dir>/
//! ├── Checkpoint/
//! │   ├── realisticVision_v51.safetensors
//! │   └── realisticVision_v51.preview.png
//! ├── LORA/
//! └── memory.json
//! ```

use std::path::{Path, PathBuf};

use crate::catalog::ModelType;

/// Suffix that replaces a payload's extension for its preview image.
pub const PREVIEW_SUFFIX: &str = ".preview.png";

/// Directory holding every file of the given model type.
pub fn type_dir(root: &Path, model_type: ModelType) -> PathBuf {
    root.join(model_type.as_str())
}

/// Turn a remote file name into a safe single path component.
///
/// Separators and control characters become `_`. Returns `None` when nothing
/// usable remains.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim_matches(|c: char| c == ' ' || c == '.');
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned.to_string())
}

/// Sibling path of a payload's preview image.
///
/// `x/model.safetensors` becomes `x/model.preview.png`.
pub fn preview_path(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{}{}", stem, PREVIEW_SUFFIX))
}
