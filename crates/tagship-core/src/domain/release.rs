//! Release requests and the records the hosting platform returns.

use super::artifact::ArtifactSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visibility flags of a release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFlags {
    pub draft: bool,
    pub prerelease: bool,
}

/// What the publisher is asked to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    /// Always the trigger event's ref name
    pub tag_name: String,
    pub flags: ReleaseFlags,
    pub artifacts: ArtifactSet,
}

/// A release created on the hosting platform. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    /// Platform identifier
    pub id: String,
    pub tag_name: String,
    pub draft: bool,
    pub prerelease: bool,
    /// Attached asset file names, in upload order
    pub assets: Vec<String>,
    /// Human-facing URL, when the platform provides one
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}
