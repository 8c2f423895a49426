//! Artifact reads that tolerate writers still holding the file

use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

use crate::config::RetryPolicy;
use crate::error::ReloadError;

/// Read the whole artifact, retrying with backoff while it is missing,
/// locked or empty.
///
/// An empty file is treated as a writer that truncated but has not written
/// yet; it is never handed to the loader.
pub fn read_artifact(path: &Path, policy: &RetryPolicy) -> Result<Vec<u8>, ReloadError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_reason = String::new();

    for attempt in 1..=attempts {
        match std::fs::read(path) {
            Ok(bytes) if !bytes.is_empty() => return Ok(bytes),
            Ok(_) => last_reason = "artifact is empty".to_string(),
            Err(e) => last_reason = e.to_string(),
        }
        if attempt < attempts {
            let delay = policy.backoff(attempt);
            debug!(
                "Read of {:?} failed ({}), retry {}/{} in {:?}",
                path,
                last_reason,
                attempt,
                attempts - 1,
                delay
            );
            std::thread::sleep(delay);
        }
    }

    Err(ReloadError::Read {
        path: path.to_path_buf(),
        attempts,
        reason: last_reason,
    })
}

/// Hex SHA-256 of artifact bytes
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
