//! Trigger matching and release classification.

use crate::config::{ConfigError, TriggerConfig};
use crate::domain::{MatchDecision, MismatchReason, RefKind, ReleaseFlags, TagVersion, TriggerEvent};
use regex::Regex;
use tracing::debug;

/// Decides whether a trigger event starts a release. Pure; malformed names
/// are mismatches, never errors.
#[derive(Debug, Clone, Default)]
pub struct TriggerMatcher {
    allow_prerelease: bool,
    extra_pattern: Option<Regex>,
}

impl TriggerMatcher {
    /// Strict `v<major>.<minor>.<patch>` matcher.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TriggerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            allow_prerelease: config.allow_prerelease_tags,
            extra_pattern: config.tag_regex()?,
        })
    }

    pub fn allow_prerelease(mut self, allow: bool) -> Self {
        self.allow_prerelease = allow;
        self
    }

    pub fn evaluate(&self, event: &TriggerEvent) -> MatchDecision {
        if event.ref_kind != RefKind::Tag {
            debug!(ref_name = %event.ref_name, "not a tag push");
            return MatchDecision::Skip(MismatchReason::NotATag);
        }
        let Some(version) = TagVersion::parse(&event.ref_name, self.allow_prerelease) else {
            return MatchDecision::Skip(MismatchReason::PatternMismatch);
        };
        if let Some(pattern) = &self.extra_pattern {
            if !pattern.is_match(&event.ref_name) {
                debug!(ref_name = %event.ref_name, pattern = %pattern, "custom tag pattern rejected");
                return MatchDecision::Skip(MismatchReason::PatternMismatch);
            }
        }
        MatchDecision::Proceed(version)
    }
}

/// Chooses the draft / prerelease flags of a release.
pub trait ReleaseClassifier: Send + Sync {
    fn classify(&self, version: &TagVersion) -> ReleaseFlags;
}

/// Every release is a published, stable release.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysStable;

impl ReleaseClassifier for AlwaysStable {
    fn classify(&self, _version: &TagVersion) -> ReleaseFlags {
        ReleaseFlags::default()
    }
}

/// Tags with a `-suffix` become pre-releases.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixPrerelease;

impl ReleaseClassifier for SuffixPrerelease {
    fn classify(&self, version: &TagVersion) -> ReleaseFlags {
        ReleaseFlags {
            draft: false,
            prerelease: version.is_prerelease(),
        }
    }
}
