//! Build artifacts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Distribution form of a built file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Source archive (`.tar.gz`, `.zip` sdist)
    SourceArchive,
    /// Binary / wheel distribution (`.whl`)
    BinaryDistribution,
}

impl ArtifactKind {
    /// Classify a file in the build output directory by name.
    pub fn classify(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".whl") {
            Some(ArtifactKind::BinaryDistribution)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".zip") {
            Some(ArtifactKind::SourceArchive)
        } else {
            None
        }
    }

    /// MIME type used when uploading the asset.
    pub fn content_type(&self, filename: &str) -> &'static str {
        match self {
            ArtifactKind::BinaryDistribution => "application/zip",
            ArtifactKind::SourceArchive if filename.ends_with(".zip") => "application/zip",
            ArtifactKind::SourceArchive => "application/gzip",
        }
    }
}

/// One built file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub filename: String,
    pub kind: ArtifactKind,
    /// SHA-256 hex of `content`
    pub sha256: String,
    pub size: u64,
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl BuildArtifact {
    pub fn new(filename: impl Into<String>, kind: ArtifactKind, content: Vec<u8>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&content);
        Self {
            filename: filename.into(),
            kind,
            sha256: hex::encode(hasher.finalize()),
            size: content.len() as u64,
            content,
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.kind.content_type(&self.filename)
    }
}

/// Ordered set of built artifacts, sorted by filename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    artifacts: Vec<BuildArtifact>,
}

impl ArtifactSet {
    pub fn new(mut artifacts: Vec<BuildArtifact>) -> Self {
        artifacts.sort_by(|a, b| a.filename.cmp(&b.filename));
        artifacts.dedup_by(|a, b| a.filename == b.filename);
        Self { artifacts }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildArtifact> {
        self.artifacts.iter()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn file_names(&self) -> BTreeSet<String> {
        self.artifacts.iter().map(|a| a.filename.clone()).collect()
    }

    pub fn has_kind(&self, kind: ArtifactKind) -> bool {
        self.artifacts.iter().any(|a| a.kind == kind)
    }

    pub fn total_size(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size).sum()
    }
}

impl<'a> IntoIterator for &'a ArtifactSet {
    type Item = &'a BuildArtifact;
    type IntoIter = std::slice::Iter<'a, BuildArtifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.artifacts.iter()
    }
}
