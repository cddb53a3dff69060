//! SHA-256 helpers for optional payload verification.
//!
//! The catalog publishes uppercase hex digests while `sha2` formats lowercase,
//! so comparisons ignore ASCII case.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Calculate the lowercase hex SHA-256 of a file.
pub fn calculate_file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare two hex digests, ignoring case and surrounding whitespace.
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Incremental hasher fed chunk by chunk while a payload streams.
#[derive(Default)]
pub struct StreamHasher {
    inner: Option<Sha256>,
}

impl StreamHasher {
    /// A hasher that only does work when `enabled`.
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: enabled.then(Sha256::new),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        if let Some(hasher) = self.inner.as_mut() {
            hasher.update(chunk);
        }
    }

    /// Hex digest, or `None` when hashing was disabled.
    pub fn finish(self) -> Option<String> {
        self.inner.map(|h| format!("{:x}", h.finalize()))
    }
}
