//! Content-addressed artifact storage.
//!
//! Crate archives are stored under the data directory keyed by their
//! sha256 checksum with a two-character fan-out (`artifacts/ab/cdef...`),
//! so identical archives synced from different remotes or repositories
//! occupy one file. Writes verify the checksum before anything lands on
//! disk and go through a temp-file rename, so a partially written archive
//! is never visible under its final name.

use crate::error::{AppError, AppResult};
use crate::sha256_hash;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Filesystem store for crate archives, addressed by sha256 checksum.
pub struct ArtifactStore {
    root: PathBuf,
}

/// Checksums come from upstream index files and publish payloads; only a
/// 64-character hex digest may ever become a storage path component.
fn is_valid_checksum(cksum: &str) -> bool {
    cksum.len() == 64 && cksum.chars().all(|c| c.is_ascii_hexdigit())
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            root: data_dir.as_ref().join("artifacts"),
        }
    }

    /// On-disk path for a checksum.
    pub fn path_for(&self, cksum: &str) -> PathBuf {
        if cksum.len() > 2 {
            self.root.join(&cksum[..2]).join(&cksum[2..])
        } else {
            self.root.join(cksum)
        }
    }

    /// Whether an archive with this checksum is already present.
    pub async fn contains(&self, cksum: &str) -> bool {
        if !is_valid_checksum(cksum) {
            return false;
        }
        fs::try_exists(self.path_for(cksum)).await.unwrap_or(false)
    }

    /// Store archive bytes under their checksum.
    ///
    /// The actual digest of `data` must match `cksum`; a mismatch fails
    /// without writing. Storing bytes that are already present is a no-op.
    pub async fn put(&self, cksum: &str, data: &[u8]) -> AppResult<PathBuf> {
        if !is_valid_checksum(cksum) {
            return Err(AppError::BadRequest(format!(
                "Invalid checksum format: {cksum}"
            )));
        }
        let actual = sha256_hash(data);
        if actual != cksum {
            return Err(AppError::BadRequest(format!(
                "Checksum mismatch: expected {cksum}, got {actual}"
            )));
        }

        let path = self.path_for(cksum);
        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(cksum = %cksum, "Artifact already present");
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;

        info!(cksum = %cksum, size = data.len(), "Artifact stored");
        Ok(path)
    }

    /// Read archive bytes by checksum.
    pub async fn get(&self, cksum: &str) -> AppResult<Vec<u8>> {
        if !self.contains(cksum).await {
            return Err(AppError::NotFound(format!(
                "Artifact with checksum {cksum} not found"
            )));
        }
        Ok(fs::read(self.path_for(cksum)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_verifies_checksum_and_dedups() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        let data = b"crate bytes";
        let cksum = sha256_hash(data);

        assert!(!store.contains(&cksum).await);
        store.put(&cksum, data).await.unwrap();
        assert!(store.contains(&cksum).await);

        // Second put of the same bytes is a no-op.
        store.put(&cksum, data).await.unwrap();
        assert_eq!(store.get(&cksum).await.unwrap(), data);

        // A mismatched digest never lands on disk.
        let wrong = "a".repeat(64);
        assert!(store.put(&wrong, data).await.is_err());
        assert!(!store.contains(&wrong).await);

        // Non-hex checksums are rejected before touching the filesystem.
        assert!(store.put("deadbeef", data).await.is_err());
        assert!(!store.contains("deadbeef").await);
    }

    #[tokio::test]
    async fn paths_fan_out_by_prefix() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.path_for("abcdef");
        assert!(path.ends_with("artifacts/ab/cdef"));
    }
}
