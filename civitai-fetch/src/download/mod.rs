//! Resumable model file downloads.
//!
//! This module provides functionality for transferring selected model files,
//! including:
//! - The HTTP seam and its reqwest implementation (`http`)
//! - Optional SHA-256 verification (`checksum`)
//! - Single-file transfers with size checks and retries (`transfer`)
//! - Progress events for renderers (`progress`)
//! - Bounded-concurrency batch coordination (`coordinator`)
//!
//! # Architecture
//!
//! ```text
//! DownloadCoordinator (worker pool, checkpoint phase, state updates)
//!         │
//!         ├── TransferEngine (one file: stage, verify, rename, retry)
//!         │       └── HttpTransport (trait)
//!         │               └── ReqwestTransport
//!         │
//!         └── DownloadObserver (progress events)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use civitai_fetch::download::{
//!     CoordinatorConfig, DownloadCoordinator, ReqwestTransport, TransferConfig, TransferEngine,
//! };
//! use civitai_fetch::state::StateStore;
//!
//! let transport = Arc::new(ReqwestTransport::new(Some("api-key"))?);
//! let engine = TransferEngine::new(transport, TransferConfig::default());
//! let coordinator = DownloadCoordinator::new(engine, CoordinatorConfig::default());
//!
//! let mut store = StateStore::load("models/memory.json")?;
//! let summary = coordinator.run(work_list.items, &mut store)?;
//! println!("{} downloaded, {} failed", summary.succeeded, summary.failed);
//! ```

mod checksum;
mod coordinator;
mod error;
pub(crate) mod http;
mod progress;
mod transfer;

pub use checksum::{calculate_file_checksum, checksums_match};
pub use coordinator::{
    CoordinatorConfig, DownloadCoordinator, ItemFailure, ItemStatus, RunSummary,
    DEFAULT_CONCURRENCY, DEFAULT_FLUSH_EVERY_BYTES, DEFAULT_FLUSH_EVERY_ITEMS,
};
pub use error::{MismatchStage, PreviewError, TransferError, TransportError};
pub use http::{HttpResponse, HttpTransport, ReqwestTransport, DEFAULT_TIMEOUT_SECS};
pub use progress::{DownloadObserver, NoopObserver};
pub use transfer::{
    TransferConfig, TransferEngine, TransferOutcome, TransferPhase, TransferRequest,
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RETRIES,
};
