//! Environment fingerprinting
//!
//! Content-addressable identity of an execution environment: the runtime
//! version plus the lockfile bytes (or the manifest bytes when no lockfile
//! exists). Equal fingerprints mean the dependency manager was handed the
//! same inputs.

use crate::error::EnvError;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, warn};

/// Source of the fingerprint's dependency input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashSource {
    /// Computed from the lockfile (reproducible resolution)
    Lockfile,
    /// Computed from the manifest (no lockfile present)
    Manifest,
}

/// Environment fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentHash {
    /// SHA-256 hex digest
    pub hash: String,
    /// Which dependency file fed the digest
    pub source: HashSource,
}

impl std::fmt::Display for EnvironmentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl EnvironmentHash {
    /// Get short hash (first 12 characters)
    pub fn short(&self) -> &str {
        &self.hash[..12.min(self.hash.len())]
    }
}

/// Fingerprint from in-memory inputs.
pub fn fingerprint(runtime_version: &str, dependency_bytes: &[u8], source: HashSource) -> EnvironmentHash {
    let mut hasher = Sha256::new();
    hasher.update(runtime_version.trim().as_bytes());
    hasher.update(b"\0");
    hasher.update(dependency_bytes);
    EnvironmentHash {
        hash: hex::encode(hasher.finalize()),
        source,
    }
}

/// Fingerprint a project directory's dependency files.
///
/// Prefers `lockfile`; falls back to `manifest` with a warning since
/// manifest-only resolution is not reproducible.
pub fn fingerprint_files(
    runtime_version: &str,
    manifest: &Path,
    lockfile: &Path,
) -> Result<EnvironmentHash> {
    if lockfile.exists() {
        debug!(path = %lockfile.display(), "fingerprinting from lockfile");
        let bytes = std::fs::read(lockfile)?;
        return Ok(fingerprint(runtime_version, &bytes, HashSource::Lockfile));
    }
    if manifest.exists() {
        warn!(path = %manifest.display(), "no lockfile, fingerprinting from manifest");
        let bytes = std::fs::read(manifest)?;
        return Ok(fingerprint(runtime_version, &bytes, HashSource::Manifest));
    }
    Err(EnvError::ManifestNotFound(manifest.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_hash() {
        let a = fingerprint("Python 3.11.4", b"lock", HashSource::Lockfile);
        let b = fingerprint("Python 3.11.4\n", b"lock", HashSource::Lockfile);
        assert_eq!(a, b);
        assert_eq!(a.hash.len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn runtime_change_changes_hash() {
        let a = fingerprint("Python 3.11.4", b"lock", HashSource::Lockfile);
        let b = fingerprint("Python 3.12.0", b"lock", HashSource::Lockfile);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn lockfile_preferred_over_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("pyproject.toml");
        let lock = dir.path().join("poetry.lock");
        std::fs::write(&manifest, b"[tool.poetry]\n").unwrap();

        let from_manifest = fingerprint_files("3.11", &manifest, &lock).unwrap();
        assert_eq!(from_manifest.source, HashSource::Manifest);

        std::fs::write(&lock, b"[[package]]\n").unwrap();
        let from_lock = fingerprint_files("3.11", &manifest, &lock).unwrap();
        assert_eq!(from_lock.source, HashSource::Lockfile);
        assert_ne!(from_lock.hash, from_manifest.hash);
    }

    #[test]
    fn nothing_to_hash_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = fingerprint_files(
            "3.11",
            &dir.path().join("pyproject.toml"),
            &dir.path().join("poetry.lock"),
        )
        .unwrap_err();
        assert!(matches!(err, EnvError::ManifestNotFound(_)));
    }
}
