//! Lockfile parsing
//!
//! The lockfile pins every resolved package to a concrete version. The
//! installed dependency set of an execution environment is read from here
//! after resolution, so two runs against the same lockfile report the same
//! set.

use crate::error::EnvError;
use crate::manifest::{normalize_name, DependencyManifest};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A resolved package pinned by the lockfile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct RawLockfile {
    #[serde(default)]
    package: Vec<LockedPackage>,
}

/// Parsed lockfile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    pub packages: Vec<LockedPackage>,
}

impl Lockfile {
    /// Load a lockfile from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse `[[package]]` entries with `name` / `version` keys.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawLockfile = toml::from_str(content)?;
        for pkg in &raw.package {
            if pkg.name.trim().is_empty() || pkg.version.trim().is_empty() {
                return Err(EnvError::InvalidLockfile(format!(
                    "package entry with empty name or version: {:?}",
                    pkg
                )));
            }
        }
        Ok(Self {
            packages: raw.package,
        })
    }

    /// Resolved name → version map, keyed by normalized name.
    pub fn installed_set(&self) -> BTreeMap<String, String> {
        self.packages
            .iter()
            .map(|p| (normalize_name(&p.name), p.version.clone()))
            .collect()
    }

    /// Direct dependencies the manifest declares but the lockfile does not pin.
    ///
    /// A non-empty result means the lockfile is stale with respect to the
    /// manifest.
    pub fn unpinned<'a>(&self, manifest: &'a DependencyManifest) -> Vec<&'a str> {
        let installed = self.installed_set();
        manifest
            .dependencies
            .iter()
            .filter(|d| !installed.contains_key(&d.normalized_name()))
            .map(|d| d.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = r#"
[[package]]
name = "requests"
version = "2.31.0"
description = "Python HTTP for Humans."
optional = false

[[package]]
name = "Charset_Normalizer"
version = "3.3.2"

[metadata]
lock-version = "2.0"
"#;

    #[test]
    fn installed_set_is_normalized() {
        let lock = Lockfile::parse(LOCK).unwrap();
        let set = lock.installed_set();
        assert_eq!(set.get("requests").map(String::as_str), Some("2.31.0"));
        assert_eq!(set.get("charset-normalizer").map(String::as_str), Some("3.3.2"));
    }

    #[test]
    fn unpinned_reports_stale_entries() {
        let lock = Lockfile::parse(LOCK).unwrap();
        let manifest = DependencyManifest::parse(
            r#"
[tool.poetry]
name = "demo"
version = "0.1.0"
[tool.poetry.dependencies]
python = "^3.10"
requests = "^2.31"
click = "^8"
"#,
        )
        .unwrap();
        assert_eq!(lock.unpinned(&manifest), vec!["click"]);
    }

    #[test]
    fn empty_lockfile_has_no_packages() {
        let lock = Lockfile::parse("").unwrap();
        assert!(lock.packages.is_empty());
    }

    #[test]
    fn blank_version_is_invalid() {
        let err = Lockfile::parse("[[package]]\nname = \"x\"\nversion = \"\"\n").unwrap_err();
        assert!(matches!(err, EnvError::InvalidLockfile(_)));
    }
}
