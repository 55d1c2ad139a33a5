//! Hashing utilities for package digests and tree fingerprints.

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute SHA256 hash of a string.
pub fn sha256_str(s: &str) -> String {
    sha256_bytes(s.as_bytes())
}

/// Compute SHA256 hash of the canonical JSON form of a value.
///
/// Map ordering must be deterministic (e.g. `BTreeMap`) for the digest to be stable.
pub fn sha256_json<T: serde::Serialize>(value: &T) -> serde_json::Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(sha256_bytes(&bytes))
}
