//! Resumable, size-verified transfer of a single remote file.
//!
//! Every transfer moves through a small state machine:
//!
//! ```text
//! NotStarted ──(correct size on disk)──────────────────────────┐
//!     │                                                        ▼
//!     └─▶ Requested ─▶ Streaming ─▶ Verifying ─▶ Committed
//!             │            │            │
//!             └────────────┴────────────┴─▶ retry with backoff ─▶ Failed
//! ```
//!
//! The payload is streamed into a hidden `.part` file next to the target and
//! only renamed onto the target once its length matches the declared size, so
//! the target path never holds a partial file. Staging files orphaned by a
//! killed process are swept the next time the same target is transferred.

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::checksum::{calculate_file_checksum, checksums_match, StreamHasher};
use super::error::{MismatchStage, PreviewError, TransferError};
use super::http::HttpTransport;
use crate::layout;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 20;

/// Default read/write chunk size (4 MB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Granularity of cancellable sleeps between attempts.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

const PART_SUFFIX: &str = ".part";

/// Transfer tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff: Duration,
    /// Upper bound of the retry delay.
    pub max_backoff: Duration,
    pub chunk_size: usize,
    /// Check the declared SHA-256 in addition to the size.
    pub verify_hash: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify_hash: false,
        }
    }
}

impl TransferConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_verify_hash(mut self, verify: bool) -> Self {
        self.verify_hash = verify;
        self
    }

    /// Total attempts, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before attempt `attempt + 1`, given that `attempt` just failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Stages of a transfer, reported in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    NotStarted,
    Requested,
    Streaming,
    Verifying,
    Committed,
    Failed,
}

/// What to fetch and where to put it.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    pub url: &'a str,
    pub target: &'a Path,
    pub expected_size: u64,
    pub sha256: Option<&'a str>,
}

/// Successful end state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// A correctly-sized file was already in place; nothing was fetched.
    AlreadyPresent,
    /// The payload was fetched and committed.
    Downloaded { bytes: u64, attempts: u32 },
}

impl TransferOutcome {
    /// Bytes moved over the network.
    pub fn bytes_transferred(&self) -> u64 {
        match self {
            TransferOutcome::AlreadyPresent => 0,
            TransferOutcome::Downloaded { bytes, .. } => *bytes,
        }
    }
}

/// Performs single-file transfers with retry.
pub struct TransferEngine {
    transport: Arc<dyn HttpTransport>,
    config: TransferConfig,
    cancel: CancellationToken,
}

impl TransferEngine {
    pub fn new(transport: Arc<dyn HttpTransport>, config: TransferConfig) -> Self {
        Self {
            transport,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon in-flight transfers when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Transfer one file, retrying until it is committed or attempts run out.
    ///
    /// `progress` receives `(bytes_written, expected_size)` after every chunk.
    pub fn transfer(
        &self,
        request: &TransferRequest<'_>,
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<TransferOutcome, TransferError> {
        trace!(url = request.url, phase = ?TransferPhase::NotStarted);
        remove_stale_parts(request.target);
        if self.is_satisfied(request) {
            trace!(
                path = %request.target.display(),
                phase = ?TransferPhase::Committed,
                "Already present"
            );
            return Ok(TransferOutcome::AlreadyPresent);
        }

        let max_attempts = self.config.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            match self.attempt(request, progress) {
                Ok(bytes) => {
                    debug!(
                        url = request.url,
                        path = %request.target.display(),
                        bytes,
                        attempt,
                        "Transfer committed"
                    );
                    return Ok(TransferOutcome::Downloaded {
                        bytes,
                        attempts: attempt,
                    });
                }
                Err(e) if !e.is_retryable() => {
                    trace!(url = request.url, phase = ?TransferPhase::Failed, error = %e);
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    trace!(url = request.url, phase = ?TransferPhase::Failed, "Out of attempts");
                    return Err(TransferError::Exhausted {
                        url: request.url.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        url = request.url,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Transfer attempt failed, retrying"
                    );
                    self.sleep_before_retry(attempt);
                }
            }
        }
    }

    /// Fetch a preview image beside `target`, once, without verification.
    ///
    /// Returns `false` when a preview already exists.
    pub fn fetch_preview(&self, url: &str, target: &Path) -> Result<bool, PreviewError> {
        let path = layout::preview_path(target);
        if fs::metadata(&path).is_ok_and(|m| m.len() > 0) {
            return Ok(false);
        }

        let response = self.transport.get(url)?;
        if !response.is_success() {
            return Err(PreviewError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        let io_err = |source| PreviewError::Io {
            path: path.clone(),
            source,
        };
        let bytes = response.into_bytes().map_err(io_err)?;
        let dir = parent_dir(&path);
        let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
        temp.write_all(&bytes).map_err(io_err)?;
        temp.persist(&path).map_err(|e| io_err(e.error))?;
        Ok(true)
    }

    /// Whether the target already holds the expected content.
    fn is_satisfied(&self, request: &TransferRequest<'_>) -> bool {
        let Ok(meta) = fs::metadata(request.target) else {
            return false;
        };
        if !meta.is_file() || meta.len() != request.expected_size {
            return false;
        }

        match (self.config.verify_hash, request.sha256) {
            (true, Some(expected)) => match calculate_file_checksum(request.target) {
                Ok(actual) if checksums_match(expected, &actual) => true,
                Ok(_) => {
                    warn!(
                        path = %request.target.display(),
                        "Existing file has the right size but wrong hash"
                    );
                    false
                }
                Err(e) => {
                    warn!(
                        path = %request.target.display(),
                        error = %e,
                        "Could not hash existing file"
                    );
                    false
                }
            },
            _ => true,
        }
    }

    /// One attempt: request, stream into a temp file, verify, commit.
    fn attempt(
        &self,
        request: &TransferRequest<'_>,
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<u64, TransferError> {
        let expected = request.expected_size;
        let dir = parent_dir(request.target);
        fs::create_dir_all(dir).map_err(|source| TransferError::Write {
            path: dir.to_path_buf(),
            source,
        })?;

        trace!(url = request.url, phase = ?TransferPhase::Requested);
        let mut response = self.transport.get(request.url)?;
        if !response.is_success() {
            return Err(TransferError::Status {
                url: request.url.to_string(),
                status: response.status,
            });
        }
        if let Some(len) = response.content_length {
            if len != expected {
                return Err(TransferError::SizeMismatch {
                    stage: MismatchStage::Header,
                    expected,
                    actual: len,
                });
            }
        }

        trace!(url = request.url, phase = ?TransferPhase::Streaming);
        let mut temp = part_file(dir, request.target)?;
        let mut hasher = StreamHasher::new(self.config.verify_hash && request.sha256.is_some());
        let mut buffer = vec![0u8; self.config.chunk_size];
        let mut written = 0u64;

        loop {
            let n = match response.body().read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(TransferError::Read {
                        url: request.url.to_string(),
                        source,
                    })
                }
            };

            temp.write_all(&buffer[..n])
                .map_err(|source| TransferError::Write {
                    path: temp.path().to_path_buf(),
                    source,
                })?;
            hasher.update(&buffer[..n]);
            written += n as u64;

            if written > expected {
                return Err(TransferError::SizeMismatch {
                    stage: MismatchStage::Stream,
                    expected,
                    actual: written,
                });
            }
            if let Some(cb) = progress {
                cb(written, expected);
            }
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
        }

        trace!(url = request.url, phase = ?TransferPhase::Verifying);
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TransferError::Write { path, source }
        };
        temp.as_file().sync_all().map_err(write_err(temp.path()))?;
        let on_disk = temp
            .as_file()
            .metadata()
            .map_err(write_err(temp.path()))?
            .len();
        if on_disk != expected {
            return Err(TransferError::SizeMismatch {
                stage: MismatchStage::Stream,
                expected,
                actual: on_disk,
            });
        }
        if let (Some(expected_hash), Some(actual)) = (request.sha256, hasher.finish()) {
            if !checksums_match(expected_hash, &actual) {
                return Err(TransferError::ChecksumMismatch {
                    filename: file_name(request.target),
                    expected: expected_hash.to_string(),
                    actual,
                });
            }
        }

        temp.persist(request.target)
            .map_err(|e| TransferError::Write {
                path: request.target.to_path_buf(),
                source: e.error,
            })?;
        trace!(path = %request.target.display(), phase = ?TransferPhase::Committed);
        Ok(written)
    }

    fn sleep_before_retry(&self, attempt: u32) {
        let deadline = Instant::now() + self.config.delay_after(attempt);
        while !self.cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Hidden staging file in the target's directory, removed on drop.
fn part_file(dir: &Path, target: &Path) -> Result<NamedTempFile, TransferError> {
    tempfile::Builder::new()
        .prefix(&part_prefix(target))
        .suffix(PART_SUFFIX)
        .tempfile_in(dir)
        .map_err(|source| TransferError::Write {
            path: dir.to_path_buf(),
            source,
        })
}

fn part_prefix(target: &Path) -> String {
    format!(".{}.", file_name(target))
}

/// Whether `name` is a staging file of `target`: `.<file>.<random>.part`.
fn is_part_of(name: &str, target: &Path) -> bool {
    name.strip_prefix(part_prefix(target).as_str())
        .and_then(|rest| rest.strip_suffix(PART_SUFFIX))
        .is_some_and(|random| {
            !random.is_empty() && random.chars().all(|c| c.is_ascii_alphanumeric())
        })
}

/// Delete staging files left behind by a process that died mid-transfer.
fn remove_stale_parts(target: &Path) {
    let Ok(entries) = fs::read_dir(parent_dir(target)) else {
        return;
    };
    for entry in entries.flatten() {
        if !is_part_of(&entry.file_name().to_string_lossy(), target) {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale partial download"),
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Could not remove stale partial download"
            ),
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
