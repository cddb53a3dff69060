//! Batch download coordination.
//!
//! The coordinator owns the [`StateStore`]. Workers never touch it: they send
//! each item's terminal status back over a channel and the coordinator thread
//! records it, so the store needs no locking.
//!
//! ```text
//!              ┌─▶ worker 0 ─┐
//! work-list ──▶├─▶ worker 1 ─┼──▶ coordinator ──▶ StateStore (periodic flush)
//!  (bounded)   └─▶ worker N ─┘
//!
//! checkpoints ──▶ coordinator thread, one at a time, after the pool drains
//! ```

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::progress::{DownloadObserver, NoopObserver};
use super::transfer::{TransferEngine, TransferOutcome, TransferRequest};
use crate::select::SelectedFile;
use crate::state::{StateError, StateStore};

/// Default number of concurrent transfers.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default number of completed transfers between state flushes.
pub const DEFAULT_FLUSH_EVERY_ITEMS: usize = 5;

/// Default number of transferred bytes between state flushes (1 GB).
pub const DEFAULT_FLUSH_EVERY_BYTES: u64 = 1024 * 1024 * 1024;

/// Coordinator tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Maximum transfers running at once (minimum 1).
    pub concurrency: usize,
    /// Flush the state store after this many completed items (0 disables).
    pub flush_every_items: usize,
    /// Flush the state store after this many transferred bytes (0 disables).
    pub flush_every_bytes: u64,
    /// Fetch the preview image of each completed item.
    pub include_previews: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            flush_every_items: DEFAULT_FLUSH_EVERY_ITEMS,
            flush_every_bytes: DEFAULT_FLUSH_EVERY_BYTES,
            include_previews: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_flush_every_items(mut self, items: usize) -> Self {
        self.flush_every_items = items;
        self
    }

    pub fn with_flush_every_bytes(mut self, bytes: u64) -> Self {
        self.flush_every_bytes = bytes;
        self
    }

    pub fn with_previews(mut self, include: bool) -> Self {
        self.include_previews = include;
        self
    }
}

/// Terminal status of one work item.
#[derive(Debug)]
pub enum ItemStatus {
    Completed(TransferOutcome),
    Failed(TransferError),
    /// The run was cancelled before or during the transfer.
    Cancelled,
}

/// A work item that could not be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub model_id: u64,
    pub version_id: u64,
    pub file_name: String,
    pub reason: String,
}

/// Totals of one coordinator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items whose file is now in place.
    pub succeeded: usize,
    /// Succeeded items satisfied by a correctly-sized existing file.
    pub already_present: usize,
    /// Items skipped because their version was already recorded.
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub bytes_downloaded: u64,
    pub failures: Vec<ItemFailure>,
}

impl RunSummary {
    /// Number of items the run accounted for.
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed + self.cancelled
    }

    /// True when nothing failed or was cancelled.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

/// Decides when accumulated progress warrants a state flush.
#[derive(Debug, Clone)]
pub(crate) struct FlushSchedule {
    every_items: usize,
    every_bytes: u64,
    items: usize,
    bytes: u64,
}

impl FlushSchedule {
    pub(crate) fn new(every_items: usize, every_bytes: u64) -> Self {
        Self {
            every_items,
            every_bytes,
            items: 0,
            bytes: 0,
        }
    }

    /// Account for one completed item; true when a flush is due.
    pub(crate) fn note(&mut self, bytes: u64) -> bool {
        self.items += 1;
        self.bytes += bytes;

        let due = (self.every_items > 0 && self.items >= self.every_items)
            || (self.every_bytes > 0 && self.bytes >= self.every_bytes);
        if due {
            self.items = 0;
            self.bytes = 0;
        }
        due
    }
}

/// Mutable bookkeeping of a run, owned by the coordinator thread.
struct RunState<'a> {
    store: &'a mut StateStore,
    summary: RunSummary,
    schedule: FlushSchedule,
}

impl RunState<'_> {
    fn apply(&mut self, item: &SelectedFile, status: ItemStatus) {
        match status {
            ItemStatus::Completed(outcome) => {
                let bytes = outcome.bytes_transferred();
                self.summary.succeeded += 1;
                self.summary.bytes_downloaded += bytes;
                if outcome == TransferOutcome::AlreadyPresent {
                    self.summary.already_present += 1;
                }

                self.store
                    .record(item.model_id, item.version_id, item.file_name.as_str());
                info!(
                    model_id = item.model_id,
                    version_id = item.version_id,
                    file = %item.file_name,
                    bytes,
                    "Download complete"
                );

                if self.schedule.note(bytes) {
                    if let Err(e) = self.store.flush() {
                        warn!(error = %e, "Periodic state flush failed");
                    }
                }
            }
            ItemStatus::Failed(e) => {
                error!(
                    model_id = item.model_id,
                    version_id = item.version_id,
                    file = %item.file_name,
                    error = %e,
                    "Download failed"
                );
                self.summary.failed += 1;
                self.summary.failures.push(ItemFailure {
                    model_id: item.model_id,
                    version_id: item.version_id,
                    file_name: item.file_name.clone(),
                    reason: e.to_string(),
                });
            }
            ItemStatus::Cancelled => {
                debug!(file = %item.file_name, "Download cancelled");
                self.summary.cancelled += 1;
            }
        }
    }
}

/// Runs a work-list through a bounded worker pool.
///
/// Checkpoints are excluded from the pool and transferred one at a time once
/// every other item has finished.
pub struct DownloadCoordinator {
    engine: Arc<TransferEngine>,
    config: CoordinatorConfig,
    observer: Arc<dyn DownloadObserver>,
}

impl DownloadCoordinator {
    pub fn new(engine: TransferEngine, config: CoordinatorConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DownloadObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    /// Download every item not already recorded in `store`.
    ///
    /// Individual failures are counted, never propagated. The only error is a
    /// failure of the final state flush.
    pub fn run(
        &self,
        items: Vec<SelectedFile>,
        store: &mut StateStore,
    ) -> Result<RunSummary, StateError> {
        let mut run = RunState {
            store,
            summary: RunSummary::default(),
            schedule: FlushSchedule::new(
                self.config.flush_every_items,
                self.config.flush_every_bytes,
            ),
        };

        let mut pooled = Vec::new();
        let mut exclusive = Vec::new();
        for item in items {
            if run.store.is_current(item.model_id, item.version_id) {
                debug!(
                    model_id = item.model_id,
                    version_id = item.version_id,
                    "Version already downloaded, skipping"
                );
                self.observer.on_skipped(&item);
                run.summary.skipped += 1;
            } else if item.model_type.is_checkpoint() {
                exclusive.push(item);
            } else {
                pooled.push(item);
            }
        }

        info!(
            pooled = pooled.len(),
            exclusive = exclusive.len(),
            skipped = run.summary.skipped,
            concurrency = self.config.concurrency,
            "Starting downloads"
        );

        self.run_pool(pooled, &mut run);

        for item in exclusive {
            let status = self.process(&item);
            run.apply(&item, status);
        }

        run.store.flush()?;
        Ok(run.summary)
    }

    fn run_pool(&self, items: Vec<SelectedFile>, run: &mut RunState<'_>) {
        if items.is_empty() {
            return;
        }

        let workers = self.config.concurrency.clamp(1, items.len());
        let (work_tx, work_rx) = mpsc::sync_channel::<SelectedFile>(workers);
        let work_rx = Mutex::new(work_rx);
        let (done_tx, done_rx) = mpsc::channel::<(SelectedFile, ItemStatus)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let done_tx = done_tx.clone();
                let work_rx = &work_rx;
                scope.spawn(move || loop {
                    let next = work_rx.lock().recv();
                    let Ok(item) = next else {
                        break;
                    };
                    let status = self.process(&item);
                    if done_tx.send((item, status)).is_err() {
                        break;
                    }
                });
            }
            drop(done_tx);

            scope.spawn(move || {
                for item in items {
                    if work_tx.send(item).is_err() {
                        break;
                    }
                }
            });

            for (item, status) in done_rx {
                run.apply(&item, status);
            }
        });
    }

    /// Transfer one item and, if configured, its preview.
    fn process(&self, item: &SelectedFile) -> ItemStatus {
        if self.engine.cancellation().is_cancelled() {
            return ItemStatus::Cancelled;
        }

        self.observer.on_started(item);
        let target = item.target_path();
        let request = TransferRequest {
            url: &item.download_url,
            target: &target,
            expected_size: item.expected_size,
            sha256: item.sha256.as_deref(),
        };
        let observer = &self.observer;
        let progress = |done: u64, total: u64| observer.on_progress(item, done, total);

        let status = match self.engine.transfer(&request, Some(&progress)) {
            Ok(outcome) => {
                self.fetch_preview(item, &target);
                ItemStatus::Completed(outcome)
            }
            Err(TransferError::Cancelled) => ItemStatus::Cancelled,
            Err(e) => ItemStatus::Failed(e),
        };

        self.observer.on_finished(item, &status);
        status
    }

    fn fetch_preview(&self, item: &SelectedFile, target: &std::path::Path) {
        if !self.config.include_previews {
            return;
        }
        let Some(url) = item.preview_url.as_deref() else {
            return;
        };
        match self.engine.fetch_preview(url, target) {
            Ok(true) => debug!(file = %item.file_name, "Preview saved"),
            Ok(false) => {}
            Err(e) => warn!(file = %item.file_name, error = %e, "Preview fetch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelType;
    use crate::download::http::mock::{MockReply, ScriptedTransport};
    use crate::download::TransferConfig;
    use crate::layout;
    use crate::state::STATE_FILENAME;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn url(model_id: u64) -> String {
        format!("https://civitai.test/api/download/models/{}", model_id)
    }

    fn preview(model_id: u64) -> String {
        format!("https://image.test/{}.jpeg", model_id)
    }

    fn item(root: &Path, model_id: u64, model_type: ModelType, size: u64) -> SelectedFile {
        SelectedFile {
            model_id,
            model_name: format!("model-{}", model_id),
            model_type,
            version_id: model_id * 10,
            file_name: format!("m{}.safetensors", model_id),
            download_url: url(model_id),
            expected_size: size,
            sha256: None,
            target_dir: layout::type_dir(root, model_type),
            preview_url: Some(preview(model_id)),
        }
    }

    fn transport_for(items: &[SelectedFile]) -> ScriptedTransport {
        items.iter().fold(ScriptedTransport::new(), |t, i| {
            t.route(
                &i.download_url,
                vec![MockReply::ok(vec![7u8; i.expected_size as usize])],
            )
            .route(&preview(i.model_id), vec![MockReply::ok(b"img".to_vec())])
        })
    }

    fn coordinator(
        transport: &Arc<ScriptedTransport>,
        config: CoordinatorConfig,
    ) -> DownloadCoordinator {
        let engine = TransferEngine::new(
            transport.clone(),
            TransferConfig::default()
                .with_max_retries(1)
                .with_backoff(Duration::ZERO),
        );
        DownloadCoordinator::new(engine, config)
    }

    #[test]
    fn test_recorded_version_is_not_transferred() {
        let temp = TempDir::new().unwrap();
        let items: Vec<_> = (1..=5)
            .map(|id| item(temp.path(), id, ModelType::Lora, 64))
            .collect();
        let transport = Arc::new(transport_for(&items));
        let mut store = StateStore::empty(temp.path().join(STATE_FILENAME));
        store.record(1, 10, "m1.safetensors");

        let summary = coordinator(&transport, CoordinatorConfig::default().with_previews(false))
            .run(items, &mut store)
            .unwrap();

        assert_eq!(transport.calls().len(), 4);
        assert_eq!(transport.calls_to(&url(1)), 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.bytes_downloaded, 4 * 64);
        assert!(summary.is_clean());

        let on_disk = StateStore::load(temp.path().join(STATE_FILENAME)).unwrap();
        assert_eq!(on_disk.len(), 5);
        assert!(on_disk.is_current(5, 50));
    }

    #[test]
    fn test_failure_is_contained_to_its_item() {
        let temp = TempDir::new().unwrap();
        let items: Vec<_> = (1..=4)
            .map(|id| item(temp.path(), id, ModelType::TextualInversion, 32))
            .collect();
        let transport =
            Arc::new(transport_for(&items).route(&url(3), vec![MockReply::status(500)]));
        let mut store = StateStore::empty(temp.path().join(STATE_FILENAME));

        let summary = coordinator(&transport, CoordinatorConfig::default().with_previews(false))
            .run(items, &mut store)
            .unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].model_id, 3);
        assert!(summary.failures[0].reason.contains("500"));
        assert_eq!(transport.calls_to(&url(3)), 2);
        assert!(!store.is_current(3, 30));
        assert!(store.is_current(4, 40));
        assert_eq!(summary.total(), 4);
    }

    struct CheckpointWatch {
        in_flight: AtomicUsize,
        checkpoint_running: AtomicBool,
        violations: AtomicUsize,
        peak: AtomicUsize,
    }

    impl DownloadObserver for CheckpointWatch {
        fn on_started(&self, item: &SelectedFile) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if self.checkpoint_running.load(Ordering::SeqCst) {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
            if item.model_type.is_checkpoint() {
                if now != 1 {
                    self.violations.fetch_add(1, Ordering::SeqCst);
                }
                self.checkpoint_running.store(true, Ordering::SeqCst);
            }
        }

        fn on_finished(&self, item: &SelectedFile, _status: &ItemStatus) {
            if item.model_type.is_checkpoint() {
                self.checkpoint_running.store(false, Ordering::SeqCst);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_checkpoints_run_exclusively() {
        let temp = TempDir::new().unwrap();
        let items = vec![
            item(temp.path(), 1, ModelType::Checkpoint, 128),
            item(temp.path(), 2, ModelType::Lora, 128),
            item(temp.path(), 3, ModelType::Lora, 128),
            item(temp.path(), 4, ModelType::Checkpoint, 128),
            item(temp.path(), 5, ModelType::Hypernetwork, 128),
            item(temp.path(), 6, ModelType::AestheticGradient, 128),
        ];
        let transport = Arc::new(transport_for(&items));
        let watch = Arc::new(CheckpointWatch {
            in_flight: AtomicUsize::new(0),
            checkpoint_running: AtomicBool::new(false),
            violations: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut store = StateStore::empty(temp.path().join(STATE_FILENAME));

        let summary = coordinator(&transport, CoordinatorConfig::default().with_concurrency(4))
            .with_observer(watch.clone())
            .run(items, &mut store)
            .unwrap();

        assert_eq!(summary.succeeded, 6);
        assert_eq!(watch.violations.load(Ordering::SeqCst), 0);
        assert!(watch.peak.load(Ordering::SeqCst) <= 4);
        assert!(temp.path().join("Checkpoint").join("m1.safetensors").exists());
        assert!(temp.path().join("LORA").join("m2.preview.png").exists());
    }

    #[test]
    fn test_preview_failure_does_not_fail_item() {
        let temp = TempDir::new().unwrap();
        let items = vec![item(temp.path(), 1, ModelType::Lora, 16)];
        let transport =
            Arc::new(transport_for(&items).route(&preview(1), vec![MockReply::status(503)]));
        let mut store = StateStore::empty(temp.path().join(STATE_FILENAME));

        let summary = coordinator(&transport, CoordinatorConfig::default())
            .run(items, &mut store)
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert!(store.is_current(1, 10));
        assert_eq!(transport.calls_to(&preview(1)), 1);
        assert!(!temp.path().join("LORA").join("m1.preview.png").exists());
    }

    #[test]
    fn test_cancelled_run_transfers_nothing() {
        let temp = TempDir::new().unwrap();
        let items: Vec<_> = (1..=3)
            .map(|id| item(temp.path(), id, ModelType::Lora, 16))
            .chain(std::iter::once(item(temp.path(), 9, ModelType::Checkpoint, 16)))
            .collect();
        let transport = Arc::new(transport_for(&items));
        let token = CancellationToken::new();
        token.cancel();
        let engine = TransferEngine::new(transport.clone(), TransferConfig::default())
            .with_cancellation(token);
        let mut store = StateStore::empty(temp.path().join(STATE_FILENAME));

        let summary = DownloadCoordinator::new(engine, CoordinatorConfig::default())
            .run(items, &mut store)
            .unwrap();

        assert_eq!(summary.cancelled, 4);
        assert_eq!(summary.succeeded, 0);
        assert!(transport.calls().is_empty());
        assert!(store.is_empty());
        assert!(!temp.path().join(STATE_FILENAME).exists());
    }

    #[test]
    fn test_existing_files_count_as_already_present() {
        let temp = TempDir::new().unwrap();
        let items = vec![item(temp.path(), 1, ModelType::Lora, 16)];
        std::fs::create_dir_all(&items[0].target_dir).unwrap();
        std::fs::write(items[0].target_path(), [0u8; 16]).unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let mut store = StateStore::empty(temp.path().join(STATE_FILENAME));

        let summary = coordinator(&transport, CoordinatorConfig::default().with_previews(false))
            .run(items, &mut store)
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.already_present, 1);
        assert_eq!(summary.bytes_downloaded, 0);
        assert!(transport.calls().is_empty());
        assert!(store.is_current(1, 10));
    }

    /// Reads the state file from disk whenever an item starts.
    struct StateFileSnapshots {
        path: std::path::PathBuf,
        seen: Mutex<Vec<(u64, Vec<u64>)>>,
    }

    impl DownloadObserver for StateFileSnapshots {
        fn on_started(&self, item: &SelectedFile) {
            let on_disk = StateStore::load(&self.path).unwrap();
            let recorded = (1..=3).filter(|id| on_disk.is_current(*id, id * 10)).collect();
            self.seen.lock().push((item.model_id, recorded));
        }
    }

    #[test]
    fn test_state_reaches_disk_during_run() {
        let temp = TempDir::new().unwrap();
        let items: Vec<_> = (1..=3)
            .map(|id| item(temp.path(), id, ModelType::Checkpoint, 16))
            .collect();
        let transport = Arc::new(transport_for(&items));
        let state_path = temp.path().join(STATE_FILENAME);
        let snapshots = Arc::new(StateFileSnapshots {
            path: state_path.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let mut store = StateStore::empty(&state_path);

        coordinator(
            &transport,
            CoordinatorConfig::default()
                .with_previews(false)
                .with_flush_every_items(1),
        )
        .with_observer(snapshots.clone())
        .run(items, &mut store)
        .unwrap();

        assert_eq!(
            *snapshots.seen.lock(),
            vec![(1, vec![]), (2, vec![1]), (3, vec![1, 2])]
        );
    }

    #[test]
    fn test_state_waits_for_flush_interval() {
        let temp = TempDir::new().unwrap();
        let items: Vec<_> = (1..=3)
            .map(|id| item(temp.path(), id, ModelType::Checkpoint, 16))
            .collect();
        let transport = Arc::new(transport_for(&items));
        let state_path = temp.path().join(STATE_FILENAME);
        let snapshots = Arc::new(StateFileSnapshots {
            path: state_path.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let mut store = StateStore::empty(&state_path);

        coordinator(
            &transport,
            CoordinatorConfig::default()
                .with_previews(false)
                .with_flush_every_items(2)
                .with_flush_every_bytes(0),
        )
        .with_observer(snapshots.clone())
        .run(items, &mut store)
        .unwrap();

        assert_eq!(
            *snapshots.seen.lock(),
            vec![(1, vec![]), (2, vec![]), (3, vec![1, 2])]
        );
        assert_eq!(StateStore::load(&state_path).unwrap().len(), 3);
    }

    #[test]
    fn test_flush_schedule_by_items() {
        let mut schedule = FlushSchedule::new(2, 0);
        assert!(!schedule.note(10));
        assert!(schedule.note(10));
        assert!(!schedule.note(10));
        assert!(schedule.note(10));
    }

    #[test]
    fn test_flush_schedule_by_bytes() {
        let mut schedule = FlushSchedule::new(0, 100);
        assert!(!schedule.note(60));
        assert!(schedule.note(60));
        assert!(schedule.note(150));
        assert!(!schedule.note(0));
    }

    #[test]
    fn test_config_min_concurrency() {
        let config = CoordinatorConfig::default().with_concurrency(0);
        assert_eq!(config.concurrency, 1);
    }
}
