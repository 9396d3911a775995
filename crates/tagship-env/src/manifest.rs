//! Dependency manifest parsing
//!
//! Reads the project's declarative manifest (`pyproject.toml`) in PEP 621
//! layout (`[project]`), Poetry layout (`[tool.poetry]`), or both. The
//! manifest is only read, never written: the dependency manager owns it.

use crate::error::EnvError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// A single declared dependency with its version constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Package name as declared
    pub name: String,
    /// Version constraint (e.g. "^2.31", ">=1.0,<2"); "*" when unconstrained
    pub constraint: String,
}

impl Dependency {
    pub fn new(name: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: constraint.into(),
        }
    }

    /// Normalized package name (lowercase, `_`/`.` folded to `-`).
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Which manifest layout the file used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestLayout {
    Poetry,
    Pep621,
}

/// Project metadata and declared dependencies, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyManifest {
    pub layout: ManifestLayout,
    /// Project name, if declared
    pub name: Option<String>,
    /// Project version, if declared
    pub version: Option<String>,
    /// Runtime constraint (Poetry's `python = "^3.9"` entry), kept apart from packages
    pub runtime_constraint: Option<String>,
    /// Direct dependencies
    pub dependencies: Vec<Dependency>,
}

impl DependencyManifest {
    /// Load a manifest from disk.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EnvError::ManifestNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let manifest = Self::parse(&content)?;
        debug!(
            path = %path.display(),
            dependencies = manifest.dependencies.len(),
            "loaded dependency manifest"
        );
        Ok(manifest)
    }

    /// Parse manifest content.
    ///
    /// `[project]` is authoritative when present. `[tool.poetry]` fills in
    /// whatever it leaves out: Poetry 2 projects keep metadata under
    /// `[project]` and only build settings under `[tool.poetry]`, while
    /// older ones may still declare dependencies there.
    pub fn parse(content: &str) -> Result<Self> {
        let doc: toml::Table = content.parse()?;

        let poetry = doc
            .get("tool")
            .and_then(|t| t.get("poetry"))
            .and_then(|p| p.as_table())
            .map(Self::from_poetry);

        match (doc.get("project").and_then(|p| p.as_table()), poetry) {
            (Some(project), poetry) => {
                let mut manifest = Self::from_pep621(project)?;
                if let Some(poetry) = poetry {
                    manifest.fill_from(poetry);
                }
                Ok(manifest)
            }
            (None, Some(poetry)) => Ok(poetry),
            (None, None) => Err(EnvError::InvalidManifest(
                "neither [tool.poetry] nor [project] table present".to_string(),
            )),
        }
    }

    fn fill_from(&mut self, poetry: Self) {
        self.name = self.name.take().or(poetry.name);
        self.version = self.version.take().or(poetry.version);
        self.runtime_constraint = self.runtime_constraint.take().or(poetry.runtime_constraint);
        if self.dependencies.is_empty() {
            self.dependencies = poetry.dependencies;
        }
    }

    fn from_poetry(poetry: &toml::Table) -> Self {
        let mut runtime_constraint = None;
        let mut dependencies = Vec::new();

        if let Some(deps) = poetry.get("dependencies").and_then(|d| d.as_table()) {
            for (name, spec) in deps {
                let constraint = poetry_constraint(spec);
                if name == "python" {
                    runtime_constraint = Some(constraint);
                } else {
                    dependencies.push(Dependency::new(name.clone(), constraint));
                }
            }
        }

        Self {
            layout: ManifestLayout::Poetry,
            name: string_field(poetry, "name"),
            version: string_field(poetry, "version"),
            runtime_constraint,
            dependencies,
        }
    }

    fn from_pep621(project: &toml::Table) -> Result<Self> {
        let mut dependencies = Vec::new();
        if let Some(deps) = project.get("dependencies") {
            let entries = deps.as_array().ok_or_else(|| {
                EnvError::InvalidManifest("[project].dependencies must be an array".to_string())
            })?;
            for entry in entries {
                let requirement = entry.as_str().ok_or_else(|| {
                    EnvError::InvalidManifest(format!("dependency entry is not a string: {entry}"))
                })?;
                dependencies.push(parse_requirement(requirement)?);
            }
        }

        Ok(Self {
            layout: ManifestLayout::Pep621,
            name: string_field(project, "name"),
            version: string_field(project, "version"),
            runtime_constraint: string_field(project, "requires-python"),
            dependencies,
        })
    }

    /// Whether the project declares the metadata a build needs.
    pub fn has_build_metadata(&self) -> bool {
        matches!(&self.name, Some(n) if !n.trim().is_empty())
            && matches!(&self.version, Some(v) if !v.trim().is_empty())
    }
}

/// Normalize a package name the way Python packaging compares them.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .replace(['_', '.'], "-")
}

fn string_field(table: &toml::Table, key: &str) -> Option<String> {
    table.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn poetry_constraint(spec: &toml::Value) -> String {
    match spec {
        toml::Value::String(s) => s.clone(),
        toml::Value::Table(t) => t
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| t.get("git").and_then(|v| v.as_str()).map(|g| format!("git+{g}")))
            .or_else(|| t.get("path").and_then(|v| v.as_str()).map(|p| format!("path:{p}")))
            .unwrap_or_else(|| "*".to_string()),
        _ => "*".to_string(),
    }
}

/// Split a PEP 508 requirement string into name and constraint.
fn parse_requirement(requirement: &str) -> Result<Dependency> {
    let trimmed = requirement.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .unwrap_or(trimmed.len());
    let (name, rest) = trimmed.split_at(split);
    if name.is_empty() {
        return Err(EnvError::InvalidManifest(format!(
            "cannot read package name from requirement '{requirement}'"
        )));
    }
    let constraint = rest.trim();
    Ok(Dependency::new(
        name,
        if constraint.is_empty() { "*" } else { constraint },
    ))
}
