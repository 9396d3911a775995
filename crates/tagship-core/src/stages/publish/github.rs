//! GitHub Releases publisher.

use crate::config::PublishConfig;
use crate::domain::{ReleaseRecord, ReleaseRequest};
use crate::error::{PublishError, PublishErrorKind};
use crate::stages::ReleasePublisher;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const API_VERSION: &str = "2022-11-28";

/// Connection settings for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    pub uploads_url: String,
    /// `owner/repo`
    pub repository: Option<String>,
    pub token: Option<String>,
}

impl GitHubConfig {
    pub fn from_publish_config(config: &PublishConfig) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            uploads_url: config.uploads_url.trim_end_matches('/').to_string(),
            repository: config.repository.clone(),
            token: config.token.clone(),
        }
    }
}

#[derive(Serialize)]
struct CreateRelease<'a> {
    tag_name: &'a str,
    name: &'a str,
    draft: bool,
    prerelease: bool,
}

#[derive(Deserialize)]
struct CreatedRelease {
    id: u64,
    html_url: Option<String>,
}

/// Creates the release, then uploads each artifact as an asset.
///
/// Missing credentials are reported when publishing, not at construction,
/// so runs that never reach publishing do not need them.
pub struct GitHubReleasePublisher {
    config: GitHubConfig,
    client: reqwest::Client,
}

impl GitHubReleasePublisher {
    pub fn new(config: GitHubConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tagship/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PublishError::unavailable(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn credentials(&self) -> Result<(&str, &str), PublishError> {
        let token = self
            .config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PublishError::forbidden("no GitHub token configured"))?;
        let repo = self
            .config
            .repository
            .as_deref()
            .ok_or_else(|| PublishError::unavailable("no GitHub repository configured"))?;
        Ok((token, repo))
    }

    async fn create_release(
        &self,
        token: &str,
        repo: &str,
        request: &ReleaseRequest,
    ) -> Result<CreatedRelease, PublishError> {
        let url = format!("{}/repos/{}/releases", self.config.api_url, repo);
        let body = CreateRelease {
            tag_name: &request.tag_name,
            name: &request.tag_name,
            draft: request.flags.draft,
            prerelease: request.flags.prerelease,
        };

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::unavailable(format!("create release: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text, "create release"));
        }
        response
            .json::<CreatedRelease>()
            .await
            .map_err(|e| PublishError::unavailable(format!("create release response: {e}")))
    }

    async fn upload_asset(
        &self,
        token: &str,
        repo: &str,
        release_id: u64,
        filename: &str,
        content_type: &str,
        content: Vec<u8>,
    ) -> Result<(), PublishError> {
        let url = format!(
            "{}/repos/{}/releases/{}/assets",
            self.config.uploads_url, repo, release_id
        );
        let response = self
            .client
            .post(&url)
            .query(&[("name", filename)])
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header(CONTENT_TYPE, content_type)
            .body(content)
            .send()
            .await
            .map_err(|e| PublishError::unavailable(format!("upload {filename}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text, &format!("upload {filename}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ReleasePublisher for GitHubReleasePublisher {
    async fn publish(&self, request: &ReleaseRequest) -> Result<ReleaseRecord, PublishError> {
        let (token, repo) = self.credentials()?;
        let created = self.create_release(token, repo, request).await?;
        let release_id = created.id.to_string();
        info!(tag = %request.tag_name, release_id = %release_id, "release created");

        let mut uploaded = Vec::new();
        for artifact in &request.artifacts {
            if let Err(e) = self
                .upload_asset(
                    token,
                    repo,
                    created.id,
                    &artifact.filename,
                    artifact.content_type(),
                    artifact.content.clone(),
                )
                .await
            {
                return Err(e.with_progress(Some(release_id), uploaded));
            }
            debug!(asset = %artifact.filename, bytes = artifact.size, "asset uploaded");
            uploaded.push(artifact.filename.clone());
        }

        Ok(ReleaseRecord {
            id: release_id,
            tag_name: request.tag_name.clone(),
            draft: request.flags.draft,
            prerelease: request.flags.prerelease,
            assets: uploaded,
            url: created.html_url,
            created_at: Utc::now(),
        })
    }
}

/// Map a non-success API status to the publish error taxonomy.
fn status_error(status: StatusCode, body: &str, action: &str) -> PublishError {
    let message = format!("{action}: HTTP {status}: {}", body.trim());
    let kind = match status.as_u16() {
        // GitHub answers 404 for repositories the token cannot see.
        401 | 403 | 404 => PublishErrorKind::Forbidden,
        422 if body.contains("already_exists") => PublishErrorKind::DuplicateRelease,
        _ => PublishErrorKind::Unavailable,
    };
    PublishError::new(kind, message)
}
