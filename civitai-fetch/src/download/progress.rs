//! Progress reporting for batch downloads.
//!
//! The coordinator calls a [`DownloadObserver`] from worker threads as items
//! move through the batch. Implementations must be cheap and thread-safe; the
//! CLI renders them as progress bars.

use super::coordinator::ItemStatus;
use crate::select::SelectedFile;

/// Receives per-item progress events. Every method defaults to a no-op.
pub trait DownloadObserver: Send + Sync {
    /// The item was skipped because its version is already recorded.
    fn on_skipped(&self, _item: &SelectedFile) {}

    /// A worker picked the item up.
    fn on_started(&self, _item: &SelectedFile) {}

    /// Bytes written so far for the item.
    fn on_progress(&self, _item: &SelectedFile, _downloaded: u64, _total: u64) {}

    /// The item reached a terminal status.
    fn on_finished(&self, _item: &SelectedFile, _status: &ItemStatus) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DownloadObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelType;
    use std::path::PathBuf;

    fn item() -> SelectedFile {
        SelectedFile {
            model_id: 1,
            model_name: "m".to_string(),
            model_type: ModelType::Lora,
            version_id: 2,
            file_name: "m.safetensors".to_string(),
            download_url: "http://a".to_string(),
            expected_size: 10,
            sha256: None,
            target_dir: PathBuf::from("/tmp"),
            preview_url: None,
        }
    }

    #[test]
    fn test_noop_observer_accepts_events() {
        let observer = NoopObserver;
        observer.on_started(&item());
        observer.on_progress(&item(), 1, 2);
    }
}
