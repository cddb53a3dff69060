//! End-to-end runs: list, select, download.
//!
//! [`FetchApp`] wires the components together from a resolved
//! [`FetchConfig`]. Front ends supply cancellation and progress observers.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::catalog::{CatalogError, CatalogFetcher};
use crate::config::{ConfigError, FetchConfig};
use crate::download::{
    DownloadCoordinator, DownloadObserver, HttpTransport, NoopObserver, ReqwestTransport,
    RunSummary, TransferEngine, TransportError,
};
use crate::organize::{read_model_ids, IdList, OrganizeError, OrganizeSummary, Organizer};
use crate::select::FileSelector;
use crate::state::{StateError, StateStore};

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listing could not be retrieved at all.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Organize(#[from] OrganizeError),

    #[error("favorites require an API key; set [api] key or CIVITAI_API_KEY")]
    MissingApiKey,
}

/// Outcome of a download run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Models returned by the catalog.
    pub listed: usize,
    /// Versions for which no file satisfied the selection policy.
    pub unselectable: usize,
    pub summary: RunSummary,
}

/// Outcome of an organize run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizeReport {
    /// The id file was missing and has been created empty.
    IdFileCreated,
    /// The id file holds no ids.
    NoIds,
    Organized(OrganizeSummary),
}

/// A configured fetch session.
pub struct FetchApp {
    config: FetchConfig,
    transport: Arc<dyn HttpTransport>,
    cancel: CancellationToken,
    observer: Arc<dyn DownloadObserver>,
}

impl FetchApp {
    /// Build a session talking to the real API.
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let transport =
            ReqwestTransport::with_timeout(config.api_key.as_deref(), config.timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build a session over an arbitrary transport.
    pub fn with_transport(config: FetchConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            transport,
            cancel: CancellationToken::new(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DownloadObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn fetcher(&self) -> CatalogFetcher {
        CatalogFetcher::with_base_url(self.transport.clone(), self.config.base_url.as_str())
    }

    /// List the catalog and download everything not yet on disk.
    pub fn download(&self) -> Result<FetchReport, FetchError> {
        let config = &self.config;
        if config.favorites_only && config.api_key.is_none() {
            return Err(FetchError::MissingApiKey);
        }

        let models = self.fetcher().fetch_all(&config.catalog_query())?;
        let work = FileSelector::new(config.selection_policy(), &config.output_dir)
            .work_list(&models);
        info!(
            listed = models.len(),
            selected = work.items.len(),
            unselectable = work.unselectable,
            "Work-list built"
        );

        let mut store = StateStore::load(config.state_path())?;
        let engine = TransferEngine::new(self.transport.clone(), config.transfer_config())
            .with_cancellation(self.cancel.clone());
        let coordinator = DownloadCoordinator::new(engine, config.coordinator_config())
            .with_observer(self.observer.clone());

        let summary = coordinator.run(work.items, &mut store)?;
        info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            bytes = summary.bytes_downloaded,
            "Run finished"
        );

        Ok(FetchReport {
            listed: models.len(),
            unselectable: work.unselectable,
            summary,
        })
    }

    /// Sort the models listed in `id_file` into per-type link files.
    pub fn organize(&self, id_file: &Path) -> Result<OrganizeReport, FetchError> {
        let ids = match read_model_ids(id_file)? {
            IdList::Created => return Ok(OrganizeReport::IdFileCreated),
            IdList::Loaded(ids) if ids.is_empty() => return Ok(OrganizeReport::NoIds),
            IdList::Loaded(ids) => ids,
        };

        let summary = Organizer::new(self.fetcher(), &self.config.output_dir).organize(&ids)?;
        Ok(OrganizeReport::Organized(summary))
    }
}
