//! Hashing utilities
//!
//! `url_hash` is the on-disk key of every per-file artifact, so it has to be
//! stable across runs and platforms: SHA-256 over the UTF-8 bytes of the url,
//! lowercase hex.

use sha2::{Digest, Sha256};

/// Compute the artifact key of a source url
///
/// Returns `None` for a missing or blank url instead of failing, so listings
/// with holes can still be hashed row by row.
pub fn url_hash(url: Option<&str>) -> Option<String> {
    match url {
        Some(url) if !url.trim().is_empty() => Some(sha256_hex(url.as_bytes())),
        _ => None,
    }
}

/// SHA-256 of an in-memory buffer, lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
