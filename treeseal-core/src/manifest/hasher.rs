//! SHA-256 digests for tracked files and manifest bytes
//!
//! Digests are plain lowercase hex with no algorithm prefix, matching the
//! `sha256sum` output format the manifest mirrors.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{IntegrityError, Result};

/// Hash raw bytes
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash a file's contents
pub async fn hash_file(path: &Path) -> Result<String> {
    let contents = tokio::fs::read(path)
        .await
        .map_err(|e| IntegrityError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(hash_bytes(&contents))
}

/// True for a 64-character lowercase hex string
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
