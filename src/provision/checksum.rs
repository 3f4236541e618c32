//! SHA-256 integrity checks for downloaded payloads

use sha2::{Digest, Sha256};

use crate::error::{Result, RunnerError};

/// Hex-encoded SHA-256 of `content`.
pub fn compute_sha256_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Compare `content` against an expected hex digest (case-insensitive).
pub fn verify_checksum(content: &[u8], expected: &str, url: &str) -> Result<()> {
    let actual = compute_sha256_checksum(content);
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(RunnerError::provision(format!(
            "Checksum verification failed for {url}: expected {}, got {actual}",
            expected.trim()
        )));
    }
    Ok(())
}
