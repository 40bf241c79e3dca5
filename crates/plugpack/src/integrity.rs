//! Artifact integrity digests

use std::{fs, path::Path};

use sha2::{Digest, Sha256};

use crate::error::{BuildError, BuildResult};

/// SHA-256 of `bytes` as 64 lowercase hex characters
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest the file at `path` as it exists on disk.
///
/// Reads the persisted bytes rather than trusting an in-memory copy, so the
/// result always describes what a consumer will download.
pub fn digest_file(path: &Path) -> BuildResult<String> {
    let bytes = fs::read(path).map_err(|source| BuildError::Digest {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(digest_bytes(&bytes))
}

/// Whether `value` has the shape of a digest produced here
pub fn is_digest(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
