//! Filesystem release publisher for dry runs and local mirrors.

use crate::domain::{ReleaseRecord, ReleaseRequest};
use crate::error::PublishError;
use crate::stages::ReleasePublisher;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Writes each release to `<root>/<tag>/`: the assets plus `release.json`.
///
/// An existing `<root>/<tag>` directory means the release already exists.
#[derive(Debug, Clone)]
pub struct FsReleasePublisher {
    root: PathBuf,
}

impl FsReleasePublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read back a published release record.
    pub async fn load(&self, tag: &str) -> Result<ReleaseRecord, PublishError> {
        let path = self.root.join(tag).join("release.json");
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PublishError::unavailable(format!("{}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| PublishError::unavailable(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl ReleasePublisher for FsReleasePublisher {
    async fn publish(&self, request: &ReleaseRequest) -> Result<ReleaseRecord, PublishError> {
        let tag = &request.tag_name;
        if tag.is_empty() || tag.contains(['/', '\\']) || tag.starts_with('.') {
            return Err(PublishError::unavailable(format!("unusable tag name '{tag}'")));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PublishError::unavailable(format!("{}: {e}", self.root.display())))?;

        let dir = self.root.join(tag);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(PublishError::duplicate(format!(
                    "release for {tag} already exists at {}",
                    dir.display()
                )));
            }
            Err(e) => {
                return Err(PublishError::unavailable(format!("{}: {e}", dir.display())));
            }
        }

        let mut uploaded = Vec::new();
        for artifact in &request.artifacts {
            let path = dir.join(&artifact.filename);
            if let Err(e) = tokio::fs::write(&path, &artifact.content).await {
                return Err(
                    PublishError::unavailable(format!("{}: {e}", path.display()))
                        .with_progress(Some(tag.clone()), uploaded),
                );
            }
            debug!(asset = %artifact.filename, bytes = artifact.size, "asset written");
            uploaded.push(artifact.filename.clone());
        }

        let record = ReleaseRecord {
            id: tag.clone(),
            tag_name: tag.clone(),
            draft: request.flags.draft,
            prerelease: request.flags.prerelease,
            assets: uploaded.clone(),
            url: Some(format!("file://{}", dir.display())),
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&record).map_err(|e| {
            PublishError::unavailable(e.to_string()).with_progress(Some(tag.clone()), uploaded.clone())
        })?;
        tokio::fs::write(dir.join("release.json"), json)
            .await
            .map_err(|e| {
                PublishError::unavailable(e.to_string()).with_progress(Some(tag.clone()), uploaded)
            })?;

        info!(tag = %tag, assets = record.assets.len(), dir = %dir.display(), "release written");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactKind, ArtifactSet, BuildArtifact, ReleaseFlags};
    use crate::error::PublishErrorKind;

    fn request(tag: &str) -> ReleaseRequest {
        ReleaseRequest {
            tag_name: tag.to_string(),
            flags: ReleaseFlags::default(),
            artifacts: ArtifactSet::new(vec![
                BuildArtifact::new("pkg-1.0.0.tar.gz", ArtifactKind::SourceArchive, b"sdist".to_vec()),
                BuildArtifact::new(
                    "pkg-1.0.0-py3-none-any.whl",
                    ArtifactKind::BinaryDistribution,
                    b"wheel".to_vec(),
                ),
            ]),
        }
    }

    #[tokio::test]
    async fn writes_assets_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = FsReleasePublisher::new(dir.path());

        let record = publisher.publish(&request("v1.0.0")).await.unwrap();
        assert_eq!(record.tag_name, "v1.0.0");
        assert_eq!(record.assets.len(), 2);
        assert!(!record.draft && !record.prerelease);

        let sdist = std::fs::read(dir.path().join("v1.0.0/pkg-1.0.0.tar.gz")).unwrap();
        assert_eq!(sdist, b"sdist");
        assert_eq!(publisher.load("v1.0.0").await.unwrap(), record);
    }

    #[tokio::test]
    async fn second_publish_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = FsReleasePublisher::new(dir.path());
        publisher.publish(&request("v1.0.0")).await.unwrap();

        let err = publisher.publish(&request("v1.0.0")).await.unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::DuplicateRelease);
        assert!(!err.is_partial());
    }

    #[tokio::test]
    async fn path_like_tags_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = FsReleasePublisher::new(dir.path());
        let err = publisher.publish(&request("../escape")).await.unwrap_err();
        assert_eq!(err.kind, PublishErrorKind::Unavailable);
    }
}
