//! tagship-env: dependency files and environment identity
//!
//! Reads the project's dependency manifest and lockfile and derives a
//! content-addressable fingerprint for the execution environment built from
//! them. Installing anything is the provisioner's job; this crate only reads.

pub mod error;
pub mod fingerprint;
pub mod lockfile;
pub mod manifest;

pub use error::EnvError;
pub use fingerprint::{fingerprint, fingerprint_files, EnvironmentHash, HashSource};
pub use lockfile::{LockedPackage, Lockfile};
pub use manifest::{normalize_name, Dependency, DependencyManifest, ManifestLayout};

/// Result type for tagship-env operations
pub type Result<T> = std::result::Result<T, EnvError>;
