//! Error types for transfers.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to obtain any response from the remote side.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// The request failed before a response arrived.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The request timed out.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
}

/// Where a size disagreement was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchStage {
    /// `Content-Length` disagreed with the declared size.
    Header,
    /// The streamed byte count disagreed with the declared size.
    Stream,
}

impl fmt::Display for MismatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchStage::Header => f.write_str("Content-Length"),
            MismatchStage::Stream => f.write_str("received"),
        }
    }
}

/// Errors raised by a single transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Non-success HTTP status.
    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// Declared and observed sizes disagree.
    #[error("size mismatch: expected {expected} bytes, {stage} {actual}")]
    SizeMismatch {
        stage: MismatchStage,
        expected: u64,
        actual: u64,
    },

    /// The streamed payload does not hash to the declared SHA-256.
    #[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    /// The response body could not be read.
    #[error("failed reading body of {url}: {source}")]
    Read { url: String, source: io::Error },

    /// A local file operation failed.
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    /// The run was cancelled while this transfer was in flight.
    #[error("transfer cancelled")]
    Cancelled,

    /// Every attempt failed.
    #[error("giving up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<TransferError>,
    },
}

impl TransferError {
    /// Whether another attempt may succeed.
    ///
    /// Client errors are permanent, except for timeouts (408) and rate
    /// limiting (429).
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Status { status, .. } => {
                !(400..500).contains(status) || matches!(status, 408 | 429)
            }
            TransferError::Cancelled | TransferError::Exhausted { .. } => false,
            _ => true,
        }
    }
}

/// Failure to fetch a preview image. Never fails the owning transfer.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("preview {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to store preview {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}
