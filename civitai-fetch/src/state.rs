//! Persistent record of which model versions have been fully downloaded.
//!
//! The store is a JSON object keyed by model id:
//!
//! ```json
//! {"4201": {"version_id": 130072, "file_name": "realisticVision_v51.safetensors",
//!           "downloaded_at": "2026-10-17T09:12:44Z"}}
//! ```
//!
//! Flushes rewrite the whole file through a temp file and rename, so a crash
//! mid-flush leaves the previous contents intact.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Default state file name inside the output directory.
pub const STATE_FILENAME: &str = "memory.json";

/// Errors reading or writing the state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write state file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("state file {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// The last fully downloaded version of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub version_id: u64,
    #[serde(default)]
    pub file_name: String,
    pub downloaded_at: DateTime<Utc>,
}

/// In-memory view of the state file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    records: BTreeMap<u64, DownloadRecord>,
    dirty: bool,
}

impl StateStore {
    /// An empty store that will flush to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Load the store, treating a missing file as empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(source) => return Err(StateError::Read { path, source }),
        };

        let records = if content.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&content).map_err(|e| StateError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?
        };

        Ok(Self {
            path,
            records,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether there are changes not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, model_id: u64) -> Option<&DownloadRecord> {
        self.records.get(&model_id)
    }

    /// Whether `version_id` is the recorded version of `model_id`.
    pub fn is_current(&self, model_id: u64, version_id: u64) -> bool {
        self.records
            .get(&model_id)
            .is_some_and(|r| r.version_id == version_id)
    }

    /// Record a completed download.
    pub fn record(&mut self, model_id: u64, version_id: u64, file_name: impl Into<String>) {
        self.records.insert(
            model_id,
            DownloadRecord {
                version_id,
                file_name: file_name.into(),
                downloaded_at: Utc::now(),
            },
        );
        self.dirty = true;
    }

    /// Write the whole store to disk if anything changed.
    pub fn flush(&mut self) -> Result<(), StateError> {
        if !self.dirty {
            return Ok(());
        }

        let write_err = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_vec_pretty(&self.records)
            .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(write_err)?;

        let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
        temp.write_all(&json).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(&self.path).map_err(|e| write_err(e.error))?;

        debug!(path = %self.path.display(), records = self.records.len(), "State flushed");
        self.dirty = false;
        Ok(())
    }
}
