//! Error types for tagship-env

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading a project's dependency files
#[derive(Error, Debug)]
pub enum EnvError {
    /// Manifest file missing
    #[error("Dependency manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    /// Manifest parsed but its content is unusable
    #[error("Invalid dependency manifest: {0}")]
    InvalidManifest(String),

    /// Lockfile parsed but its content is unusable
    #[error("Invalid lockfile: {0}")]
    InvalidLockfile(String),

    /// TOML syntax error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
