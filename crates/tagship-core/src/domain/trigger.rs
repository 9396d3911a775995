//! Trigger events and release tag versions.

use serde::{Deserialize, Serialize};

/// Kind of git ref that was pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Branch,
    Tag,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Branch => "branch",
            RefKind::Tag => "tag",
        }
    }
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RefKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tag" | "tags" => Ok(RefKind::Tag),
            "branch" | "head" | "heads" => Ok(RefKind::Branch),
            other => Err(format!("unknown ref kind '{other}' (expected tag or branch)")),
        }
    }
}

/// A ref push delivered by the version-control system. Consumed once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Short ref name, e.g. `v1.2.3` or `main`
    pub ref_name: String,
    pub ref_kind: RefKind,
}

impl TriggerEvent {
    pub fn new(ref_name: impl Into<String>, ref_kind: RefKind) -> Self {
        Self {
            ref_name: ref_name.into(),
            ref_kind,
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self::new(name, RefKind::Tag)
    }

    pub fn branch(name: impl Into<String>) -> Self {
        Self::new(name, RefKind::Branch)
    }

    /// Parse a fully qualified ref as exported by CI systems
    /// (`refs/tags/v1.2.3`, `refs/heads/main`).
    ///
    /// Returns `None` for other ref namespaces (`refs/pull/...`, notes).
    pub fn from_git_ref(full_ref: &str) -> Option<Self> {
        let full_ref = full_ref.trim();
        if let Some(name) = full_ref.strip_prefix("refs/tags/") {
            return Some(Self::tag(name));
        }
        if let Some(name) = full_ref.strip_prefix("refs/heads/") {
            return Some(Self::branch(name));
        }
        None
    }
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.ref_kind, self.ref_name)
    }
}

/// Version carried by a release tag: `v<major>.<minor>.<patch>[-<pre>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl TagVersion {
    /// Structural parse of a tag name.
    ///
    /// Requires a leading `v` and exactly three dot-separated components of
    /// one or more ASCII digits. A `-suffix` is accepted only when
    /// `allow_pre` is set; the suffix must be non-empty and made of
    /// `[0-9A-Za-z.-]`. Build metadata (`+...`) is never accepted.
    pub fn parse(tag: &str, allow_pre: bool) -> Option<Self> {
        let rest = tag.strip_prefix('v')?;
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => {
                if !allow_pre || pre.is_empty() || !pre.chars().all(is_pre_char) {
                    return None;
                }
                (core, Some(pre.to_string()))
            }
            None => (rest, None),
        };

        let mut parts = core.split('.');
        let major = numeric(parts.next()?)?;
        let minor = numeric(parts.next()?)?;
        let patch = numeric(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }
}

impl std::fmt::Display for TagVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

/// Why a trigger did not start a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    /// The pushed ref is a branch
    NotATag,
    /// Tag name is not a release version
    PatternMismatch,
}

impl std::fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MismatchReason::NotATag => f.write_str("ref is not a tag"),
            MismatchReason::PatternMismatch => f.write_str("tag does not match release pattern"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    Proceed(TagVersion),
    Skip(MismatchReason),
}

impl MatchDecision {
    pub fn proceeds(&self) -> bool {
        matches!(self, MatchDecision::Proceed(_))
    }
}

/// Digits only. Components wider than `u64` saturate instead of failing,
/// so the decision to release depends on the tag's shape alone.
fn numeric(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(part.parse().unwrap_or(u64::MAX))
}

fn is_pre_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_refs_are_split_by_namespace() {
        assert_eq!(
            TriggerEvent::from_git_ref("refs/tags/v1.2.3"),
            Some(TriggerEvent::tag("v1.2.3"))
        );
        assert_eq!(
            TriggerEvent::from_git_ref("refs/heads/feature/x"),
            Some(TriggerEvent::branch("feature/x"))
        );
        assert_eq!(TriggerEvent::from_git_ref("refs/pull/7/merge"), None);
    }

    #[test]
    fn strict_parse() {
        let v = TagVersion::parse("v10.0.42", false).unwrap();
        assert_eq!((v.major, v.minor, v.patch), (10, 0, 42));
        assert!(v.pre.is_none());

        let huge = TagVersion::parse("v18446744073709551616.0.0", false).unwrap();
        assert_eq!(huge.major, u64::MAX);
        assert!(TagVersion::parse("v1.99999999999999999999999.3", false).is_some());

        for bad in ["1.2.3", "v1.2", "v1.2.3.4", "v1..3", "v1.2.x", "V1.2.3", "v+1.2.3", "v1.2.3+build"] {
            assert!(TagVersion::parse(bad, false).is_none(), "{bad}");
        }
    }

    #[test]
    fn prerelease_suffix_needs_opt_in() {
        assert!(TagVersion::parse("v1.0.0-rc1", false).is_none());

        let v = TagVersion::parse("v1.0.0-rc.1", true).unwrap();
        assert_eq!(v.pre.as_deref(), Some("rc.1"));
        assert!(v.is_prerelease());
        assert_eq!(v.to_string(), "v1.0.0-rc.1");

        assert!(TagVersion::parse("v1.0.0-", true).is_none());
        assert!(TagVersion::parse("v1.0.0-rc_1", true).is_none());
    }

    #[test]
    fn ref_kind_from_str() {
        assert_eq!("tag".parse::<RefKind>().unwrap(), RefKind::Tag);
        assert_eq!("Branch".parse::<RefKind>().unwrap(), RefKind::Branch);
        assert!("commit".parse::<RefKind>().is_err());
    }
}
