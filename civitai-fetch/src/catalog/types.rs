//! Catalog records as returned by the model listing endpoint.
//!
//! Only the fields the downloader reads are modelled. Everything else in the
//! remote payload is ignored during deserialization.

use std::fmt;

use serde::Deserialize;

/// Model classification tag.
///
/// The tag doubles as the name of the directory a model's files are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum ModelType {
    Checkpoint,
    TextualInversion,
    Hypernetwork,
    #[serde(rename = "LORA")]
    Lora,
    AestheticGradient,
    /// Any tag this client does not know about.
    #[serde(other)]
    Other,
}

impl ModelType {
    /// All tags the catalog query filters on by default.
    pub const ALL: [ModelType; 5] = [
        ModelType::Checkpoint,
        ModelType::TextualInversion,
        ModelType::Hypernetwork,
        ModelType::Lora,
        ModelType::AestheticGradient,
    ];

    /// The tag as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Checkpoint => "Checkpoint",
            ModelType::TextualInversion => "TextualInversion",
            ModelType::Hypernetwork => "Hypernetwork",
            ModelType::Lora => "LORA",
            ModelType::AestheticGradient => "AestheticGradient",
            ModelType::Other => "Other",
        }
    }

    /// Parse a wire tag, ignoring ASCII case.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(tag.trim()))
    }

    /// Checkpoints are transferred with exclusive access.
    pub fn is_checkpoint(&self) -> bool {
        matches!(self, ModelType::Checkpoint)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialization format of a file's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FileFormat {
    SafeTensor,
    PickleTensor,
    #[serde(other)]
    Other,
}

impl FileFormat {
    /// Query value the download endpoint expects for this format, if any.
    pub fn query_value(&self) -> Option<&'static str> {
        match self {
            FileFormat::SafeTensor => Some("SafeTensor"),
            FileFormat::PickleTensor => Some("PickleTensor"),
            FileFormat::Other => None,
        }
    }
}

/// Classification of a file within a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum FileKind {
    Model,
    #[serde(rename = "VAE")]
    Vae,
    #[serde(rename = "Pruned Model", alias = "PrunedModel")]
    PrunedModel,
    #[default]
    #[serde(other)]
    Other,
}

impl FileKind {
    /// Kinds accepted when the selection policy restricts file types.
    pub fn is_downloadable(&self) -> bool {
        matches!(self, FileKind::Model | FileKind::Vae | FileKind::PrunedModel)
    }
}

/// Content hashes attached to a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileHashes {
    #[serde(rename = "SHA256", default)]
    pub sha256: Option<String>,
}

/// Format metadata attached to a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub format: Option<FileFormat>,
}

/// One downloadable file of a model version.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFile {
    pub name: String,
    #[serde(default)]
    pub download_url: Option<String>,
    /// Declared size in kilobytes (fractional on the wire).
    #[serde(rename = "sizeKB", default)]
    pub size_kb: f64,
    #[serde(default)]
    pub hashes: FileHashes,
    #[serde(default)]
    pub metadata: Option<FileMetadata>,
    #[serde(default)]
    pub primary: bool,
    #[serde(rename = "type", default)]
    pub kind: FileKind,
}

impl CandidateFile {
    /// Declared size converted to bytes.
    pub fn size_bytes(&self) -> u64 {
        (self.size_kb * 1024.0).round().max(0.0) as u64
    }

    /// Declared SHA-256, if the catalog supplied one.
    pub fn sha256(&self) -> Option<&str> {
        self.hashes.sha256.as_deref().filter(|h| !h.is_empty())
    }

    /// Payload format, if the catalog supplied one.
    pub fn format(&self) -> Option<FileFormat> {
        self.metadata.as_ref().and_then(|m| m.format)
    }

    /// Lowercased extension of the declared file name, including the dot.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.name.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Some(format!(".{}", ext.to_ascii_lowercase()))
    }
}

/// A preview image attached to a model version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PreviewImage {
    pub url: String,
}

/// One revision of a model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersion {
    pub id: u64,
    #[serde(default)]
    pub model_id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub files: Vec<CandidateFile>,
    #[serde(default)]
    pub images: Vec<PreviewImage>,
    #[serde(default)]
    pub trained_words: Vec<String>,
}

impl ModelVersion {
    /// URL of the first preview image.
    pub fn preview_url(&self) -> Option<&str> {
        self.images.first().map(|i| i.url.as_str())
    }
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawModelRecord")]
pub struct ModelRecord {
    pub id: u64,
    pub name: String,
    pub model_type: ModelType,
    /// The type tag exactly as the API sent it.
    pub type_tag: String,
    /// Newest first, as delivered by the API.
    pub model_versions: Vec<ModelVersion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModelRecord {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default)]
    model_versions: Vec<ModelVersion>,
}

impl From<RawModelRecord> for ModelRecord {
    fn from(raw: RawModelRecord) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            model_type: ModelType::from_tag(&raw.type_tag).unwrap_or(ModelType::Other),
            type_tag: raw.type_tag,
            model_versions: raw.model_versions,
        }
    }
}

impl ModelRecord {
    /// The most recent version of this model.
    pub fn latest_version(&self) -> Option<&ModelVersion> {
        self.model_versions.first()
    }
}

/// Pagination block of a listing response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub current_page: Option<u32>,
    #[serde(default)]
    pub next_page: Option<String>,
}

/// One page of the model listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogPage {
    #[serde(default)]
    pub items: Vec<ModelRecord>,
    #[serde(default)]
    pub metadata: PageMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "items": [{
            "id": 4201,
            "name": "Realistic Vision",
            "type": "Checkpoint",
            "nsfw": false,
            "modelVersions": [{
                "id": 130072,
                "modelId": 4201,
                "name": "V5.1",
                "trainedWords": ["analog style"],
                "files": [{
                    "name": "realisticVision_v51.safetensors",
                    "sizeKB": 2082642.54296875,
                    "type": "Model",
                    "primary": true,
                    "metadata": {"fp": "fp16", "size": "pruned", "format": "SafeTensor"},
                    "hashes": {"AutoV2": "00445494C8", "SHA256": "00445494C80979E173C267644EA2D7C67A37FE3C50C9C4D5978F91F14A2EE8A8"},
                    "downloadUrl": "https://civitai.com/api/download/models/130072"
                }, {
                    "name": "realisticVision_v51-inpainting.ckpt",
                    "sizeKB": 2082000,
                    "type": "Pruned Model",
                    "downloadUrl": "https://civitai.com/api/download/models/130072?type=Pruned%20Model"
                }],
                "images": [{"url": "https://image.civitai.com/abc/preview.jpeg", "nsfw": "None"}]
            }]
        }, {
            "id": 7,
            "type": "Wildcards",
            "modelVersions": []
        }],
        "metadata": {"totalItems": 2, "currentPage": 1, "pageSize": 100, "totalPages": 1}
    }"#;

    #[test]
    fn test_parse_listing_page() {
        let page: CatalogPage = serde_json::from_str(SAMPLE).unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.metadata.total_pages, Some(1));
        assert_eq!(page.metadata.next_page, None);

        let model = &page.items[0];
        assert_eq!(model.model_type, ModelType::Checkpoint);
        let version = model.latest_version().unwrap();
        assert_eq!(version.id, 130072);
        assert_eq!(version.trained_words, vec!["analog style".to_string()]);
        assert_eq!(
            version.preview_url(),
            Some("https://image.civitai.com/abc/preview.jpeg")
        );

        let primary = &version.files[0];
        assert!(primary.primary);
        assert_eq!(primary.kind, FileKind::Model);
        assert_eq!(primary.format(), Some(FileFormat::SafeTensor));
        assert!(primary.sha256().unwrap().starts_with("00445494"));
        assert_eq!(primary.extension().as_deref(), Some(".safetensors"));

        let pruned = &version.files[1];
        assert_eq!(pruned.kind, FileKind::PrunedModel);
        assert!(!pruned.primary);
        assert_eq!(pruned.sha256(), None);
        assert_eq!(pruned.format(), None);
    }

    #[test]
    fn test_unknown_model_type_is_other() {
        let page: CatalogPage = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(page.items[1].model_type, ModelType::Other);
        assert_eq!(page.items[1].type_tag, "Wildcards");
        assert_eq!(page.items[0].type_tag, "Checkpoint");
        assert!(page.items[1].latest_version().is_none());
    }

    #[test]
    fn test_size_bytes_rounds_fractional_kb() {
        let file = CandidateFile {
            name: "a.pt".to_string(),
            download_url: None,
            size_kb: 1.5,
            hashes: FileHashes::default(),
            metadata: None,
            primary: false,
            kind: FileKind::Other,
        };
        assert_eq!(file.size_bytes(), 1536);
    }

    #[test]
    fn test_extension_is_lowercased() {
        let file = CandidateFile {
            name: "Model.SafeTensors".to_string(),
            download_url: None,
            size_kb: 0.0,
            hashes: FileHashes::default(),
            metadata: None,
            primary: false,
            kind: FileKind::Model,
        };
        assert_eq!(file.extension().as_deref(), Some(".safetensors"));
    }

    #[test]
    fn test_model_type_from_tag() {
        assert_eq!(ModelType::from_tag("lora"), Some(ModelType::Lora));
        assert_eq!(ModelType::from_tag(" Checkpoint "), Some(ModelType::Checkpoint));
        assert_eq!(ModelType::from_tag("Poses"), None);
        assert_eq!(ModelType::Lora.to_string(), "LORA");
    }
}
