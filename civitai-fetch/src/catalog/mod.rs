//! Remote model catalog.
//!
//! - `types`: the subset of the listing schema the downloader reads
//! - `fetcher`: sequential paging through the listing endpoint

mod fetcher;
mod types;

use thiserror::Error;

use crate::download::TransportError;

pub use fetcher::{CatalogFetcher, CatalogQuery, DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE};
pub use types::{
    CandidateFile, CatalogPage, FileFormat, FileHashes, FileKind, FileMetadata, ModelRecord,
    ModelType, ModelVersion, PageMetadata, PreviewImage,
};

/// Errors that can occur while listing the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The endpoint answered with a non-200 status.
    #[error("catalog request {url} failed with status {status}")]
    Unavailable { url: String, status: u16 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response body could not be read.
    #[error("failed reading catalog response from {url}: {reason}")]
    Request { url: String, reason: String },

    /// The response was not a valid listing.
    #[error("failed to parse catalog response from {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("invalid catalog URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}
