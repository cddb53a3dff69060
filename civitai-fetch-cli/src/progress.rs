//! Terminal progress bars for download runs.

use std::collections::HashMap;
use std::time::Duration;

use civitai_fetch::download::{DownloadObserver, ItemStatus};
use civitai_fetch::select::SelectedFile;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;

const NAME_WIDTH: usize = 40;

/// One bar per in-flight file above a running total.
pub struct BarObserver {
    multi: MultiProgress,
    total: ProgressBar,
    bars: Mutex<HashMap<u64, ProgressBar>>,
}

impl BarObserver {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let total = multi.add(ProgressBar::new_spinner());
        total.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {pos} files done {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        total.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            total,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn file_bar(&self, item: &SelectedFile) -> ProgressBar {
        let bar = self
            .multi
            .insert_before(&self.total, ProgressBar::new(item.expected_size));
        bar.set_style(
            ProgressStyle::with_template(
                "  {wide_msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );
        bar.set_message(truncate_name(&item.file_name, NAME_WIDTH));
        bar
    }

    /// Remove the total spinner.
    pub fn finish(&self) {
        self.total.finish_and_clear();
    }
}

impl Default for BarObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadObserver for BarObserver {
    fn on_skipped(&self, _item: &SelectedFile) {
        self.total.inc(1);
    }

    fn on_started(&self, item: &SelectedFile) {
        let bar = self.file_bar(item);
        self.bars.lock().insert(item.version_id, bar);
    }

    fn on_progress(&self, item: &SelectedFile, downloaded: u64, _total: u64) {
        if let Some(bar) = self.bars.lock().get(&item.version_id) {
            bar.set_position(downloaded);
        }
    }

    fn on_finished(&self, item: &SelectedFile, status: &ItemStatus) {
        if let Some(bar) = self.bars.lock().remove(&item.version_id) {
            bar.finish_and_clear();
        }
        self.total.inc(1);

        let line = match status {
            ItemStatus::Completed(_) => format!("{} {}", style("done").green(), item.file_name),
            ItemStatus::Failed(e) => format!("{} {}: {}", style("failed").red(), item.file_name, e),
            ItemStatus::Cancelled => format!("{} {}", style("cancelled").yellow(), item.file_name),
        };
        let _ = self.multi.println(line);
    }
}

/// Shorten `name` to `max` characters with a trailing ellipsis.
fn truncate_name(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    let kept: String = name.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}
